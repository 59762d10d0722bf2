//! FlowPilot error types.

use thiserror::Error;

/// Errors surfaced synchronously across crate boundaries.
///
/// Anything that goes wrong *inside* a running pipeline is recorded on the
/// flow itself (see [`crate::flow::ErrorTag`]) and never travels through
/// this type.
#[derive(Debug, Error)]
pub enum FlowPilotError {
    /// Malformed schedule parameters.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown flow or schedule id.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    /// Persistence failure in one of the JSON stores.
    #[error("store error: {0}")]
    Store(String),

    /// Unexpected fault inside the job executor.
    #[error("executor error: {0}")]
    Executor(String),

    /// Fault inside a single dispatcher tick.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowPilotError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FlowPilotError>;
