//! Metric sources: where query expressions turn into numbers.

use std::collections::HashMap;

use scaleward_policy::AlertRule;
use tracing::debug;

use crate::error::{AdapterResult, MetricError, MetricResult};
use crate::infra::BoxFuture;

/// A queryable metrics backend.
///
/// `resolve` is called once per metric a rule mentions, every cycle.
/// Registration hooks run once at session start and stop; sources that
/// have nothing to register keep the default no-ops.
pub trait MetricsSource: Send + Sync {
    fn resolve<'a>(&'a self, query: &'a str) -> BoxFuture<'a, MetricResult<f64>>;

    /// Start scraping these exporter endpoints.
    fn register_sources<'a>(&'a self, sources: &'a [String]) -> BoxFuture<'a, AdapterResult<()>> {
        let _ = sources;
        Box::pin(async { Ok(()) })
    }

    fn deregister_sources(&self) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Install the policy's alert rules.
    fn register_alert_rules<'a>(&'a self, rules: &'a [AlertRule]) -> BoxFuture<'a, AdapterResult<()>> {
        let _ = rules;
        Box::pin(async { Ok(()) })
    }

    fn clear_alert_rules(&self) -> BoxFuture<'_, AdapterResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Fixed query results, for offline evaluation and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMetrics {
    values: HashMap<String, f64>,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: impl Into<String>, value: f64) -> Self {
        self.values.insert(query.into(), value);
        self
    }

    pub fn insert(&mut self, query: impl Into<String>, value: f64) {
        self.values.insert(query.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for StaticMetrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl MetricsSource for StaticMetrics {
    fn resolve<'a>(&'a self, query: &'a str) -> BoxFuture<'a, MetricResult<f64>> {
        Box::pin(async move {
            let value = self.values.get(query).copied().ok_or_else(|| MetricError::NoValue {
                query: query.to_string(),
                message: "no static value supplied".to_string(),
            })?;
            debug!(%query, value, "static metric");
            Ok(value)
        })
    }
}
