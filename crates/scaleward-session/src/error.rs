//! Session error types.

use scaleward_policy::PolicyError;
use thiserror::Error;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that reach the caller of a session.
///
/// Per-target and per-metric failures never show up here: the controller
/// logs them and carries on with the cycle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("a session is already running")]
    AlreadyRunning,

    #[error("no session is running")]
    NotRunning,

    #[error("session task is gone: {0}")]
    Closed(String),
}
