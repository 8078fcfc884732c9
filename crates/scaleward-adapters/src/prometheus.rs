//! Prometheus as a metrics source.
//!
//! Queries go through the instant-query API. Exporter targets and alert
//! rules are written to files Prometheus watches (`file_sd` targets and a
//! rules file), followed by `POST /-/reload`.

use std::path::{Path, PathBuf};

use scaleward_policy::AlertRule;
use scaleward_policy::config::PrometheusConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AdapterResult, MetricError, MetricResult};
use crate::http;
use crate::infra::BoxFuture;
use crate::metrics::MetricsSource;

/// Group name the policy's alert rules are written under.
const RULE_GROUP: &str = "scaleward";

pub struct PrometheusSource {
    endpoint: String,
    targets_file: Option<PathBuf>,
    rules_file: Option<PathBuf>,
    dryrun: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct TargetGroup<'a> {
    targets: &'a [String],
}

#[derive(Debug, Serialize)]
struct RuleFile<'a> {
    groups: Vec<RuleGroup<'a>>,
}

#[derive(Debug, Serialize)]
struct RuleGroup<'a> {
    name: &'static str,
    rules: &'a [AlertRule],
}

impl PrometheusSource {
    /// `dryrun` only suppresses configuration changes; queries still run.
    pub fn new(config: &PrometheusConfig, dryrun: bool) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            targets_file: config.targets_file.clone(),
            rules_file: config.rules_file.clone(),
            dryrun,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, query: &str) -> MetricResult<f64> {
        let url = query_url(&self.endpoint, query);
        let fail = |message: String| MetricError::Query {
            query: query.to_string(),
            message,
        };
        let resp = http::get(&url).await.map_err(|e| fail(e.to_string()))?;
        let parsed: QueryResponse =
            serde_json::from_slice(&resp.body).map_err(|e| fail(format!("malformed response: {e}")))?;
        let value = extract_value(query, parsed)?;
        debug!(%query, value, "prometheus query resolved");
        Ok(value)
    }

    async fn write_and_reload(&self, path: &Path, content: String, what: &str) -> AdapterResult<()> {
        if self.dryrun {
            info!(path = %path.display(), "dry-run: would update prometheus {what}");
            return Ok(());
        }
        tokio::fs::write(path, content).await?;
        self.reload().await?;
        info!(path = %path.display(), "prometheus {what} updated");
        Ok(())
    }

    async fn reload(&self) -> AdapterResult<()> {
        let url = http::join(&self.endpoint, "/-/reload");
        http::post(&url, "text/plain", "").await?.error_for_status(&url)?;
        Ok(())
    }

    async fn write_targets(&self, targets: &[String]) -> AdapterResult<()> {
        let Some(path) = &self.targets_file else {
            debug!("no prometheus targets file configured, skipping source update");
            return Ok(());
        };
        let groups: Vec<TargetGroup<'_>> = if targets.is_empty() {
            Vec::new()
        } else {
            vec![TargetGroup { targets }]
        };
        let content = serde_json::to_string_pretty(&groups)?;
        self.write_and_reload(path, content, "targets").await
    }

    async fn write_rules(&self, rules: &[AlertRule]) -> AdapterResult<()> {
        let Some(path) = &self.rules_file else {
            debug!("no prometheus rules file configured, skipping alert rule update");
            return Ok(());
        };
        let file = RuleFile {
            groups: if rules.is_empty() {
                Vec::new()
            } else {
                vec![RuleGroup {
                    name: RULE_GROUP,
                    rules,
                }]
            },
        };
        let content = serde_yaml::to_string(&file)?;
        self.write_and_reload(path, content, "alert rules").await
    }
}

fn query_url(endpoint: &str, query: &str) -> String {
    http::join(
        endpoint,
        &format!("/api/v1/query?query={}", urlencoding::encode(query)),
    )
}

/// Pull the single scalar out of an instant-query response.
fn extract_value(query: &str, response: QueryResponse) -> MetricResult<f64> {
    let no_value = |message: String| MetricError::NoValue {
        query: query.to_string(),
        message,
    };
    if response.status != "success" {
        return Err(MetricError::Query {
            query: query.to_string(),
            message: response.error.unwrap_or_else(|| response.status.clone()),
        });
    }
    let data = response
        .data
        .ok_or_else(|| no_value("response carries no data".to_string()))?;

    let sample = match data.result_type.as_str() {
        "vector" => {
            let series = data
                .result
                .as_array()
                .ok_or_else(|| no_value("vector result is not a list".to_string()))?;
            match series.as_slice() {
                [one] => one
                    .get("value")
                    .cloned()
                    .ok_or_else(|| no_value("series without a value".to_string()))?,
                [] => return Err(no_value("no results".to_string())),
                many => return Err(no_value(format!("{} results, expected one", many.len()))),
            }
        }
        "scalar" | "string" => data.result,
        other => return Err(no_value(format!("unsupported result type {other}"))),
    };

    // A sample is `[timestamp, "value"]`.
    let text = sample
        .get(1)
        .and_then(|v| v.as_str())
        .ok_or_else(|| no_value(format!("unrecognised sample {sample}")))?;
    text.parse::<f64>()
        .map_err(|_| no_value(format!("value {text:?} is not a number")))
}

impl MetricsSource for PrometheusSource {
    fn resolve<'a>(&'a self, query: &'a str) -> BoxFuture<'a, MetricResult<f64>> {
        Box::pin(self.query(query))
    }

    fn register_sources<'a>(&'a self, sources: &'a [String]) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.write_targets(sources))
    }

    fn deregister_sources(&self) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(self.write_targets(&[]))
    }

    fn register_alert_rules<'a>(&'a self, rules: &'a [AlertRule]) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(self.write_rules(rules))
    }

    fn clear_alert_rules(&self) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(self.write_rules(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn query_is_percent_encoded() {
        assert_eq!(
            query_url("http://prom:9090/", "avg(cpu{job=\"x\"})"),
            "http://prom:9090/api/v1/query?query=avg%28cpu%7Bjob%3D%22x%22%7D%29"
        );
        assert_eq!(
            query_url("http://prom:9090", "a b"),
            "http://prom:9090/api/v1/query?query=a%20b"
        );
    }

    #[test]
    fn single_vector_sample() {
        let r = response(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [
                {"metric": {}, "value": [1700000000.1, "42.5"]}
            ]}
        }));
        assert_eq!(extract_value("q", r).unwrap(), 42.5);
    }

    #[test]
    fn scalar_sample() {
        let r = response(json!({
            "status": "success",
            "data": {"resultType": "scalar", "result": [1700000000.1, "3"]}
        }));
        assert_eq!(extract_value("q", r).unwrap(), 3.0);
    }

    #[test]
    fn empty_and_ambiguous_vectors_fail() {
        let empty = response(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": []}
        }));
        assert!(matches!(extract_value("q", empty), Err(MetricError::NoValue { .. })));

        let many = response(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [
                {"metric": {"a": "1"}, "value": [1.0, "1"]},
                {"metric": {"a": "2"}, "value": [1.0, "2"]}
            ]}
        }));
        let err = extract_value("q", many).unwrap_err();
        assert!(err.to_string().contains("2 results"));
    }

    #[test]
    fn error_status_is_a_query_failure() {
        let r = response(json!({"status": "error", "error": "parse error"}));
        let err = extract_value("q", r).unwrap_err();
        assert!(matches!(err, MetricError::Query { .. }));
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn dryrun_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let targets = dir.path().join("targets.json");
        let config = PrometheusConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            targets_file: Some(targets.clone()),
            rules_file: None,
        };
        let source = PrometheusSource::new(&config, true);
        source
            .register_sources(&["exporter:9100".to_string()])
            .await
            .unwrap();
        assert!(!targets.exists());
        // No rules file configured: nothing to do.
        source.clear_alert_rules().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_query_error() {
        let config = PrometheusConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            targets_file: None,
            rules_file: None,
        };
        let source = PrometheusSource::new(&config, false);
        assert!(matches!(
            source.resolve("up").await,
            Err(MetricError::Query { .. })
        ));
    }
}
