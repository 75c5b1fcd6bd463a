//! Transfer error taxonomy.

use std::time::Duration;

use prism_ova_transfer::ChunkError;

/// Errors produced while moving one artifact or driving one remote task.
///
/// Everything except [`TransferError::InvalidConfiguration`] raised at batch
/// start is captured into the failing item's outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("remote rejected request: {0}")]
    RemoteRejected(String),

    #[error("remote task {task_id} failed: {reason}")]
    RemoteTaskFailed { task_id: String, reason: String },

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("timed out after {waited:?} waiting for task {task_id}")]
    Timeout { task_id: String, waited: Duration },

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// Only connection-level chunk failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }

    /// Short machine-friendly cause name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::Io(_) => "IOError",
            Self::RemoteRejected(_) => "RemoteRejected",
            Self::RemoteTaskFailed { .. } => "RemoteTaskFailed",
            Self::Transfer(_) => "TransferError",
            Self::Timeout { .. } => "Timeout",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl From<ChunkError> for TransferError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::InvalidConfiguration(msg) => Self::InvalidConfiguration(msg),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
