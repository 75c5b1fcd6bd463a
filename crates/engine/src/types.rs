//! Data types for the transfer flow.

use std::path::PathBuf;
use std::time::Duration;

use prism_ova_protocol::TaskStatus;
use prism_ova_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT, DEFAULT_MAX_TASK_WAIT, DEFAULT_POLL_INTERVAL,
    DEFAULT_UPLOAD_CONCURRENCY,
};

use crate::client::DependentSpecBuilder;
use crate::error::TransferError;

/// Lifecycle state of one transfer item.
///
/// Declaration order is the forward order; `Failed` is terminal and reachable
/// from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransferState {
    Pending,
    Checksumming,
    Registering,
    Uploading,
    Concatenating,
    Validating,
    UploadDone,
    CreatingDependent,
    MonitoringDependent,
    Completed,
    Failed,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Checksumming => "CHECKSUMMING",
            Self::Registering => "REGISTERING",
            Self::Uploading => "UPLOADING",
            Self::Concatenating => "CONCATENATING",
            Self::Validating => "VALIDATING",
            Self::UploadDone => "UPLOAD_DONE",
            Self::CreatingDependent => "CREATING_DEPENDENT",
            Self::MonitoringDependent => "MONITORING_DEPENDENT",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward moves only, except that any live state may fail.
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next > *self
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One artifact being moved, owned by the orchestrator for a single run.
#[derive(Debug, Clone)]
pub struct TransferItem {
    pub local_path: PathBuf,
    pub remote_name: String,
    pub size_bytes: u64,
    pub whole_file_checksum: Option<String>,
    /// Set only once registration succeeded.
    pub remote_entity_id: Option<String>,
    pub state: TransferState,
    pub progress_percent: u8,
}

impl TransferItem {
    pub fn new(local_path: PathBuf, remote_name: String) -> Self {
        Self {
            local_path,
            remote_name,
            size_bytes: 0,
            whole_file_checksum: None,
            remote_entity_id: None,
            state: TransferState::Pending,
            progress_percent: 0,
        }
    }

    /// Moves to `next`, resetting the phase percentage.
    ///
    /// Returns `false` (and leaves the item untouched) for a backward move.
    pub fn advance(&mut self, next: TransferState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        self.progress_percent = if next == TransferState::Completed { 100 } else { 0 };
        true
    }
}

/// A work item handed in by the caller.
pub struct WorkItem {
    pub local_path: PathBuf,
    pub remote_name: String,
    /// Builds a dependent entity (e.g. a VM) once the upload validated.
    pub dependent: Option<Box<dyn DependentSpecBuilder>>,
}

impl WorkItem {
    pub fn upload(local_path: impl Into<PathBuf>, remote_name: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_name: remote_name.into(),
            dependent: None,
        }
    }

    pub fn with_dependent(mut self, builder: Box<dyn DependentSpecBuilder>) -> Self {
        self.dependent = Some(builder);
        self
    }
}

/// What a remote task is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTaskKind {
    Export,
    UploadValidate,
    EntityCreate,
}

/// Handle to an asynchronous remote operation.
///
/// Owned by the call site that submitted it; the poller updates it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTask {
    pub task_id: String,
    pub kind: RemoteTaskKind,
    pub status: TaskStatus,
    pub percent_complete: u8,
}

impl RemoteTask {
    pub fn new(task_id: impl Into<String>, kind: RemoteTaskKind) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            status: TaskStatus::Queued,
            percent_complete: 0,
        }
    }
}

/// Final result of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalOutcome {
    pub remote_name: String,
    /// `Completed` or `Failed`.
    pub state: TransferState,
    pub remote_entity_id: Option<String>,
    pub dependent_entity_id: Option<String>,
    pub error: Option<TransferError>,
}

impl TerminalOutcome {
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Completed
    }
}

/// Bounded polling of a remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Upper bound on elapsed time, not on the number of polls.
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_TASK_WAIT,
        }
    }
}

/// Retry policy for chunk uploads that hit connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// A single chunk PUT still unanswered after this long counts as a
    /// connection failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            attempt_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

/// Settings for [`crate::TransferOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub chunk_size: u64,
    pub concurrency: usize,
    pub poll: PollPolicy,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidConfiguration(
                "upload concurrency must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(TransferError::InvalidConfiguration(
                "retry attempts must be at least 1".into(),
            ));
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(TransferError::InvalidConfiguration(
                "chunk timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Event published to progress consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress {
        item_id: String,
        phase: String,
        percent: u8,
    },
    Finished(TerminalOutcome),
}
