//! Error types for external collaborators.

use thiserror::Error;

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure of an infrastructure or optimizer call.
///
/// The control loop logs these and leaves the target's desired state
/// unchanged until the next cycle. Nothing retries them.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("http request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub(crate) fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for AdapterError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// A single metric query could not be resolved to a scalar.
///
/// Per metric, never fatal to the cycle: the affected target is skipped.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("query `{query}` failed: {message}")]
    Query { query: String, message: String },

    #[error("query `{query}` returned no usable value: {message}")]
    NoValue { query: String, message: String },

    #[error("metrics backend unavailable: {0}")]
    Unavailable(String),
}

pub type MetricResult<T> = Result<T, MetricError>;

impl From<AdapterError> for MetricError {
    fn from(e: AdapterError) -> Self {
        MetricError::Unavailable(e.to_string())
    }
}
