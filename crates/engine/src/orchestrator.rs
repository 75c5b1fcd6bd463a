//! Transfer orchestrator.
//!
//! Drives each work item through checksum, registration, chunked upload,
//! concatenation and validation, then optionally a dependent create. Items
//! run one after another; chunks of one item upload concurrently.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use prism_ova_transfer::{
    ChunkPayload, ChunkRange, ConfirmedBytes, plan_ranges, read_chunk, whole_file_checksum,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{DependentSpecBuilder, TransferClient};
use crate::error::TransferError;
use crate::poller::{TaskPoller, require_success};
use crate::progress::ProgressReporter;
use crate::types::{
    OrchestratorConfig, RemoteTask, RemoteTaskKind, TerminalOutcome, TransferItem, TransferState,
    WorkItem,
};

/// Cancels whichever item is currently running.
///
/// Clone it into a signal handler; each new item gets a fresh token, so a
/// cancellation never spills over to the next item.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the item in progress, if any.
    pub fn cancel_current(&self) {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    /// Installs and returns a fresh token for the next item.
    pub(crate) fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }
}

/// Runs work items against one remote.
pub struct TransferOrchestrator<'a> {
    client: &'a dyn TransferClient,
    reporter: &'a dyn ProgressReporter,
    config: OrchestratorConfig,
    cancel: CancelHandle,
}

impl<'a> TransferOrchestrator<'a> {
    pub fn new(
        client: &'a dyn TransferClient,
        reporter: &'a dyn ProgressReporter,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            reporter,
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// Returns a handle that cancels the current item.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs every item in order and returns one outcome per item.
    ///
    /// Only a bad configuration or an empty batch is an error here; item
    /// failures are reported in their outcomes and never stop the batch.
    pub async fn run_batch(
        &self,
        items: Vec<WorkItem>,
    ) -> Result<Vec<TerminalOutcome>, TransferError> {
        self.config.validate()?;
        if items.is_empty() {
            return Err(TransferError::InvalidConfiguration(
                "no items to transfer".into(),
            ));
        }

        let total = items.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            debug!(item = %item.remote_name, index = index + 1, total, "starting item");
            outcomes.push(self.run(item).await);
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(total, failed, "batch finished");
        Ok(outcomes)
    }

    /// Runs one item to a terminal outcome.
    pub async fn run(&self, work: WorkItem) -> TerminalOutcome {
        let cancel = self.cancel.arm();
        let mut item = TransferItem::new(work.local_path, work.remote_name);

        let result = self
            .drive(&mut item, work.dependent.as_deref(), &cancel)
            .await;

        let outcome = match result {
            Ok(dependent_entity_id) => {
                item.advance(TransferState::Completed);
                self.report(&item);
                info!(
                    item = %item.remote_name,
                    entity = ?item.remote_entity_id,
                    dependent = ?dependent_entity_id,
                    "transfer completed"
                );
                TerminalOutcome {
                    remote_name: item.remote_name.clone(),
                    state: TransferState::Completed,
                    remote_entity_id: item.remote_entity_id.clone(),
                    dependent_entity_id,
                    error: None,
                }
            }
            Err(e) => {
                let failed_in = item.state;
                item.advance(TransferState::Failed);
                error!(
                    item = %item.remote_name,
                    phase = %failed_in,
                    cause = e.kind(),
                    error = %e,
                    "transfer failed"
                );
                TerminalOutcome {
                    remote_name: item.remote_name.clone(),
                    state: TransferState::Failed,
                    remote_entity_id: item.remote_entity_id.clone(),
                    dependent_entity_id: None,
                    error: Some(e),
                }
            }
        };

        self.reporter.on_finished(&outcome);
        outcome
    }

    async fn drive(
        &self,
        item: &mut TransferItem,
        dependent: Option<&dyn DependentSpecBuilder>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, TransferError> {
        // 1. Checksum
        self.enter(item, TransferState::Checksumming, cancel)?;
        let size = tokio::fs::metadata(&item.local_path).await?.len();
        item.size_bytes = size;
        let ranges = plan_ranges(size, self.config.chunk_size)?;
        let checksum = cancellable(cancel, checksum_file(&item.local_path)).await?;
        item.whole_file_checksum = Some(checksum.clone());
        debug!(item = %item.remote_name, size, chunks = ranges.len(), %checksum, "checksummed");

        // 2. Register
        self.enter(item, TransferState::Registering, cancel)?;
        let task_id = cancellable(
            cancel,
            self.client
                .register_entity(&item.remote_name, size, &checksum),
        )
        .await?;
        let entity_id = cancellable(
            cancel,
            self.client.await_entity_id(&task_id, &self.config.poll),
        )
        .await?;
        item.remote_entity_id = Some(entity_id.clone());
        debug!(item = %item.remote_name, entity = %entity_id, "registered");

        // 3. Upload
        self.enter(item, TransferState::Uploading, cancel)?;
        self.upload_chunks(item, &entity_id, ranges, cancel).await?;
        let size_now = tokio::fs::metadata(&item.local_path).await?.len();
        if size_now != size {
            return Err(TransferError::Io(format!(
                "{} changed size during upload ({size} -> {size_now} bytes)",
                item.local_path.display()
            )));
        }

        // 4. Concatenate
        self.enter(item, TransferState::Concatenating, cancel)?;
        let task_id = cancellable(cancel, self.client.concatenate(&entity_id)).await?;

        // 5. Validate
        self.enter(item, TransferState::Validating, cancel)?;
        let mut task = RemoteTask::new(task_id, RemoteTaskKind::UploadValidate);
        self.await_task(item, &mut task, cancel).await?;

        self.enter(item, TransferState::UploadDone, cancel)?;
        item.progress_percent = 100;
        self.report(item);

        let Some(builder) = dependent else {
            return Ok(None);
        };

        // 6. Dependent create
        self.enter(item, TransferState::CreatingDependent, cancel)?;
        let payload = cancellable(cancel, builder.build(&entity_id)).await?;
        let created = cancellable(cancel, self.client.create_dependent_entity(&payload)).await?;
        info!(
            item = %item.remote_name,
            dependent = %created.entity_id,
            task = %created.task_id,
            "dependent entity submitted"
        );

        self.enter(item, TransferState::MonitoringDependent, cancel)?;
        let mut task = RemoteTask::new(created.task_id, RemoteTaskKind::EntityCreate);
        self.await_task(item, &mut task, cancel).await?;

        Ok(Some(created.entity_id))
    }

    /// Uploads all chunks with bounded concurrency.
    ///
    /// Returns only once every byte is confirmed; the first failing chunk
    /// (after retries) drops the remaining uploads and fails the item.
    async fn upload_chunks(
        &self,
        item: &mut TransferItem,
        entity_id: &str,
        ranges: Vec<ChunkRange>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let confirmed = ConfirmedBytes::new(item.size_bytes);
        let limit = self.config.concurrency.max(1);
        let path = item.local_path.clone();
        let mut pending = ranges.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < limit && !cancel.is_cancelled() {
                let Some(range) = pending.next() else {
                    break;
                };
                in_flight.push(self.upload_chunk(&path, entity_id, range));
            }
            if cancel.is_cancelled() {
                warn!(
                    item = %item.remote_name,
                    confirmed = confirmed.confirmed(),
                    in_flight = in_flight.len(),
                    "upload cancelled"
                );
                return Err(TransferError::Cancelled);
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                next = in_flight.next() => next,
            };
            let Some(result) = next else {
                break;
            };
            let range = result?;
            item.progress_percent = confirmed.confirm(range.length);
            self.report(item);
        }

        if !confirmed.is_complete() {
            return Err(TransferError::Transfer(format!(
                "only {} of {} bytes confirmed",
                confirmed.confirmed(),
                confirmed.total()
            )));
        }
        Ok(())
    }

    /// Reads, hashes and sends one chunk, retrying connection failures and
    /// attempts that outlive `attempt_timeout`.
    async fn upload_chunk(
        &self,
        path: &Path,
        entity_id: &str,
        range: ChunkRange,
    ) -> Result<ChunkRange, TransferError> {
        let payload = read_payload(path, range).await?;
        let data = Bytes::from(payload.data);
        let retry = self.config.retry;
        let mut backoff = retry.initial_backoff;
        let mut attempt = 1;

        loop {
            let put = self
                .client
                .put_chunk(entity_id, range, &payload.checksum, data.clone());
            let sent = match tokio::time::timeout(retry.attempt_timeout, put).await {
                Ok(sent) => sent,
                Err(_) => Err(TransferError::Transfer(format!(
                    "chunk at offset {} not acknowledged within {:?}",
                    range.offset, retry.attempt_timeout
                ))),
            };
            match sent {
                Ok(()) => return Ok(range),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    warn!(
                        entity = %entity_id,
                        offset = range.offset,
                        attempt,
                        error = %e,
                        "chunk upload failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(retry.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Polls a remote task, mirroring its percentage into the item.
    async fn await_task(
        &self,
        item: &TransferItem,
        task: &mut RemoteTask,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let poller = TaskPoller::new(self.client, self.config.poll);
        let item_id = item.remote_name.clone();
        let phase = item.state.as_str();
        let task_id = task.task_id.clone();

        let snapshot = cancellable(
            cancel,
            poller.await_completion(task, |percent| {
                self.reporter.on_progress(&item_id, phase, percent);
            }),
        )
        .await?;
        require_success(&task_id, &snapshot)
    }

    /// Moves the item to `state` and tells the reporter.
    fn enter(
        &self,
        item: &mut TransferItem,
        state: TransferState,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        item.advance(state);
        self.report(item);
        Ok(())
    }

    fn report(&self, item: &TransferItem) {
        self.reporter
            .on_progress(&item.remote_name, item.state.as_str(), item.progress_percent);
    }
}

/// Races `fut` against cancellation of the current item.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, TransferError>>,
) -> Result<T, TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = fut => result,
    }
}

async fn checksum_file(path: &Path) -> Result<String, TransferError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || whole_file_checksum(&path))
        .await
        .map_err(|e| TransferError::Io(format!("task join error: {e}")))?
        .map_err(TransferError::from)
}

async fn read_payload(path: &Path, range: ChunkRange) -> Result<ChunkPayload, TransferError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_chunk(&path, range))
        .await
        .map_err(|e| TransferError::Io(format!("task join error: {e}")))?
        .map_err(TransferError::from)
}
