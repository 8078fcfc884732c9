//! Error types for policy and configuration loading.

use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors raised while loading a policy or the daemon configuration.
///
/// Any of these is fatal at session start: the control loop never begins.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy document is empty")]
    Empty,

    #[error("malformed policy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),

    #[error("malformed configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("unknown dry-run component: {0}")]
    UnknownComponent(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
