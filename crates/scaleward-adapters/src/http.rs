//! Minimal HTTP/1 client over hyper, one connection per request.
//!
//! Every backend here talks to a handful of plain-HTTP endpoints inside the
//! cluster, a few times per cycle. A fresh connection per call keeps the
//! client stateless.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};

/// Budget for one request, connect included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("scaleward/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    /// Fail unless the status is 2xx.
    pub fn error_for_status(self, url: &str) -> AdapterResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(AdapterError::Http {
                url: url.to_string(),
                message: format!(
                    "status {}: {}",
                    self.status,
                    String::from_utf8_lossy(&self.body).trim()
                ),
            })
        }
    }
}

pub async fn get(url: &str) -> AdapterResult<HttpResponse> {
    request(Method::GET, url, None, Bytes::new(), DEFAULT_REQUEST_TIMEOUT).await
}

pub async fn post(url: &str, content_type: &str, body: impl Into<Bytes>) -> AdapterResult<HttpResponse> {
    request(
        Method::POST,
        url,
        Some(content_type),
        body.into(),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .await
}

/// Send one request and collect the whole response body.
pub async fn request(
    method: Method,
    url: &str,
    content_type: Option<&str>,
    body: Bytes,
    timeout: Duration,
) -> AdapterResult<HttpResponse> {
    let http_err = |message: String| AdapterError::Http {
        url: url.to_string(),
        message,
    };

    let uri: Uri = url.parse().map_err(|e| http_err(format!("invalid url: {e}")))?;
    if uri.scheme_str().is_some_and(|s| s != "http") {
        return Err(http_err("only plain http endpoints are supported".to_string()));
    }
    let host = uri
        .host()
        .ok_or_else(|| http_err("url has no host".to_string()))?
        .to_string();
    let port = uri.port_u16().unwrap_or(80);
    let authority = format!("{host}:{port}");
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .map_err(|e| http_err(format!("connect failed: {e}")))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| http_err(format!("handshake failed: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(path.as_str())
            .header("host", authority.as_str())
            .header("user-agent", USER_AGENT);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let req = builder
            .body(Full::new(body))
            .map_err(|e| http_err(format!("invalid request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| http_err(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| http_err(format!("reading body failed: {e}")))?
            .to_bytes();
        Ok::<_, AdapterError>(HttpResponse { status, body })
    };

    let resp = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| http_err(format!("timed out after {}ms", timeout.as_millis())))??;
    debug!(%method, %url, status = %resp.status, "http exchange");
    Ok(resp)
}

/// Join an endpoint and a path without doubling the slash.
pub fn join(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn joins_paths() {
        assert_eq!(join("http://h:1/", "/api"), "http://h:1/api");
        assert_eq!(join("http://h:1", "api"), "http://h:1/api");
    }

    #[tokio::test]
    async fn get_collects_body() {
        let (base, server) =
            serve_once("HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello").await;
        let resp = get(&join(&base, "/healthz?x=1")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"hello");
        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /healthz?x=1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _server) =
            serve_once("HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\nboom").await;
        let err = post(&base, "text/plain", "x")
            .await
            .unwrap()
            .error_for_status(&base)
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn https_is_rejected() {
        let err = get("https://example.invalid/").await.unwrap_err();
        assert!(matches!(err, AdapterError::Http { .. }));
    }
}
