//! HTTP client for the optimizer advisory service.
//!
//! Requests carry YAML bodies; advice comes back as JSON.

use serde::Serialize;
use tracing::debug;

use crate::error::AdapterResult;
use crate::http;

const YAML: &str = "application/x-yaml";

#[derive(Debug, Clone)]
pub struct OptimizerClient {
    endpoint: String,
}

impl OptimizerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, method: &str) -> String {
        http::join(&self.endpoint, &format!("/optimizer/{method}"))
    }

    /// `POST /optimizer/init` with the initialization parameters.
    pub async fn init<T: Serialize>(&self, params: &T) -> AdapterResult<()> {
        self.post_yaml("init", params).await
    }

    /// `POST /optimizer/sample` with one cycle's measurements.
    pub async fn sample<T: Serialize>(&self, sample: &T) -> AdapterResult<()> {
        self.post_yaml("sample", sample).await
    }

    /// `GET /optimizer/advice`.
    pub async fn advice(&self) -> AdapterResult<serde_json::Value> {
        let url = self.url("advice");
        let resp = http::get(&url).await?.error_for_status(&url)?;
        let advice: serde_json::Value = serde_json::from_slice(&resp.body)?;
        debug!(%url, %advice, "(O) advice received");
        Ok(advice)
    }

    async fn post_yaml<T: Serialize>(&self, method: &str, body: &T) -> AdapterResult<()> {
        let url = self.url(method);
        let body = serde_yaml::to_string(body)?;
        debug!(%url, "(O) calling optimizer {method}");
        let resp = http::post(&url, YAML, body).await?.error_for_status(&url)?;
        debug!(%url, status = %resp.status, "(O) optimizer responded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;

    #[test]
    fn urls_are_rooted_at_the_optimizer_path() {
        let client = OptimizerClient::new("http://optimizer:12345/");
        assert_eq!(client.url("advice"), "http://optimizer:12345/optimizer/advice");
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let client = OptimizerClient::new("http://127.0.0.1:1");
        assert!(matches!(client.advice().await, Err(AdapterError::Http { .. })));
        assert!(client.init(&serde_json::json!({"a": 1})).await.is_err());
    }
}
