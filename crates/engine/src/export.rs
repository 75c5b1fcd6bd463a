//! VM export and OVA download.
//!
//! The reverse direction of [`crate::TransferOrchestrator`]: ask Prism to
//! export each VM to an OVA, wait for the export task, then stream the OVA
//! into a local directory.

use std::path::{Path, PathBuf};

use prism_ova_protocol::TaskResponse;
use prism_ova_protocol::constants::{DEFAULT_EXPORT_DISK_FORMAT, KIND_OVA};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::ExportClient;
use crate::error::TransferError;
use crate::orchestrator::{CancelHandle, cancellable};
use crate::poller::{TaskPoller, require_success};
use crate::progress::ProgressReporter;
use crate::types::{PollPolicy, RemoteTask, RemoteTaskKind};

/// Phase name reported while the export task runs.
pub const PHASE_EXPORTING: &str = "EXPORTING";
/// Phase name reported while the OVA streams to disk.
pub const PHASE_DOWNLOADING: &str = "DOWNLOADING";

/// One VM to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub vm_id: String,
    pub vm_name: String,
    pub project_name: Option<String>,
    /// Name given to the OVA entity on Prism.
    pub ova_name: String,
}

/// Result of exporting one VM.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub request: ExportRequest,
    pub task_id: Option<String>,
    pub ova_entity_id: Option<String>,
    /// Set only once the OVA is fully on disk.
    pub local_path: Option<PathBuf>,
    pub bytes: u64,
    pub error: Option<TransferError>,
}

impl ExportOutcome {
    fn new(request: ExportRequest) -> Self {
        Self {
            request,
            task_id: None,
            ova_entity_id: None,
            local_path: None,
            bytes: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.local_path.is_some()
    }
}

/// Exports VMs one at a time into a restore point directory.
pub struct ExportRunner<'a> {
    client: &'a dyn ExportClient,
    reporter: &'a dyn ProgressReporter,
    poll: PollPolicy,
    disk_format: String,
    cancel: CancelHandle,
}

impl<'a> ExportRunner<'a> {
    pub fn new(
        client: &'a dyn ExportClient,
        reporter: &'a dyn ProgressReporter,
        poll: PollPolicy,
    ) -> Self {
        Self {
            client,
            reporter,
            poll,
            disk_format: DEFAULT_EXPORT_DISK_FORMAT.to_string(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Exports every request into `dir`; one VM failing never stops the rest.
    pub async fn run_batch(&self, requests: Vec<ExportRequest>, dir: &Path) -> Vec<ExportOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.run(request, dir).await);
        }
        outcomes
    }

    /// Exports one VM to `<dir>/<vm_id>.ova`.
    pub async fn run(&self, request: ExportRequest, dir: &Path) -> ExportOutcome {
        let cancel = self.cancel.arm();
        let mut outcome = ExportOutcome::new(request);

        match self.drive(&mut outcome, dir, &cancel).await {
            Ok(()) => info!(
                vm = %outcome.request.vm_name,
                ova = ?outcome.ova_entity_id,
                bytes = outcome.bytes,
                "export completed"
            ),
            Err(e) => {
                error!(
                    vm = %outcome.request.vm_name,
                    cause = e.kind(),
                    error = %e,
                    "export failed"
                );
                outcome.error = Some(e);
            }
        }
        outcome
    }

    async fn drive(
        &self,
        outcome: &mut ExportOutcome,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let item_id = outcome.request.vm_name.clone();
        self.reporter.on_progress(&item_id, PHASE_EXPORTING, 0);

        let task_id = cancellable(
            cancel,
            self.client.submit_export(
                &outcome.request.vm_id,
                &outcome.request.ova_name,
                &self.disk_format,
            ),
        )
        .await?;
        outcome.task_id = Some(task_id.clone());
        debug!(vm = %item_id, task = %task_id, "export submitted");

        let mut task = RemoteTask::new(task_id.clone(), RemoteTaskKind::Export);
        let poller = TaskPoller::new(self.client, self.poll);
        let snapshot = cancellable(
            cancel,
            poller.await_completion(&mut task, |percent| {
                self.reporter.on_progress(&item_id, PHASE_EXPORTING, percent);
            }),
        )
        .await?;
        require_success(&task_id, &snapshot)?;
        self.reporter.on_progress(&item_id, PHASE_EXPORTING, 100);

        let ova_id = match ova_from_task(&snapshot) {
            Some(id) => id,
            None => cancellable(cancel, self.client.find_artifact(&outcome.request.ova_name))
                .await?
                .ok_or_else(|| {
                    TransferError::RemoteRejected(format!(
                        "export task {task_id} produced no OVA named {}",
                        outcome.request.ova_name
                    ))
                })?,
        };
        outcome.ova_entity_id = Some(ova_id.clone());

        tokio::fs::create_dir_all(dir).await?;
        let dest = dir.join(format!("{}.ova", outcome.request.vm_id));
        self.reporter.on_progress(&item_id, PHASE_DOWNLOADING, 0);
        let on_bytes = |written: u64, total: Option<u64>| {
            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = (written.min(total) * 100 / total) as u8;
                self.reporter.on_progress(&item_id, PHASE_DOWNLOADING, percent);
            }
        };
        outcome.bytes = cancellable(
            cancel,
            self.client.download_artifact(&ova_id, &dest, &on_bytes),
        )
        .await?;
        self.reporter.on_progress(&item_id, PHASE_DOWNLOADING, 100);
        outcome.local_path = Some(dest);
        Ok(())
    }
}

/// The OVA produced by an export task, if the task names it.
fn ova_from_task(snapshot: &TaskResponse) -> Option<String> {
    snapshot.entity_of_kind(KIND_OVA).map(|r| r.uuid.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CreatedEntity, TransferClient};
    use bytes::Bytes;
    use futures_util::future::BoxFuture;
    use prism_ova_protocol::{EntityCreateRequest, EntityReference, TaskStatus};
    use prism_ova_transfer::ChunkRange;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::types::TransferEvent;

    /// Export tasks succeed; `vm-bad` fails, `vm-noref` omits the OVA reference.
    #[derive(Default)]
    struct FakeExports {
        downloads: Mutex<Vec<(String, PathBuf)>>,
        cancel_on_submit: Option<CancelHandle>,
    }

    impl TransferClient for FakeExports {
        fn register_entity<'a>(
            &'a self,
            _name: &'a str,
            _size_bytes: u64,
            _checksum: &'a str,
        ) -> BoxFuture<'a, Result<String, TransferError>> {
            unreachable!()
        }

        fn task_status<'a>(
            &'a self,
            task_id: &'a str,
        ) -> BoxFuture<'a, Result<TaskResponse, TransferError>> {
            Box::pin(async move {
                let vm = task_id.trim_start_matches("export:");
                let (status, refs) = match vm {
                    "vm-bad" => (TaskStatus::Failed, vec![]),
                    "vm-noref" => (TaskStatus::Succeeded, vec![]),
                    _ => (
                        TaskStatus::Succeeded,
                        vec![
                            EntityReference::new("vm", vm),
                            EntityReference::new("ova", &format!("ova-{vm}")),
                        ],
                    ),
                };
                Ok(TaskResponse {
                    uuid: task_id.into(),
                    status,
                    percentage_complete: 100,
                    entity_reference_list: refs,
                    error_detail: Some("disk busy".into()).filter(|_| vm == "vm-bad"),
                    progress_message: None,
                })
            })
        }

        fn put_chunk<'a>(
            &'a self,
            _entity_id: &'a str,
            _range: ChunkRange,
            _checksum: &'a str,
            _data: Bytes,
        ) -> BoxFuture<'a, Result<(), TransferError>> {
            unreachable!()
        }

        fn concatenate<'a>(
            &'a self,
            _entity_id: &'a str,
        ) -> BoxFuture<'a, Result<String, TransferError>> {
            unreachable!()
        }

        fn create_dependent_entity<'a>(
            &'a self,
            _payload: &'a EntityCreateRequest,
        ) -> BoxFuture<'a, Result<CreatedEntity, TransferError>> {
            unreachable!()
        }
    }

    impl ExportClient for FakeExports {
        fn submit_export<'a>(
            &'a self,
            vm_id: &'a str,
            _ova_name: &'a str,
            disk_format: &'a str,
        ) -> BoxFuture<'a, Result<String, TransferError>> {
            Box::pin(async move {
                assert_eq!(disk_format, "QCOW2");
                if let Some(handle) = &self.cancel_on_submit {
                    handle.cancel_current();
                }
                Ok(format!("export:{vm_id}"))
            })
        }

        fn find_artifact<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, TransferError>> {
            Box::pin(async move { Ok(Some(format!("listed-{name}"))) })
        }

        fn download_artifact<'a>(
            &'a self,
            entity_id: &'a str,
            dest: &'a Path,
            on_bytes: &'a (dyn Fn(u64, Option<u64>) + Send + Sync),
        ) -> BoxFuture<'a, Result<u64, TransferError>> {
            Box::pin(async move {
                tokio::fs::write(dest, b"ova-bytes").await?;
                on_bytes(4, Some(9));
                on_bytes(9, Some(9));
                self.downloads
                    .lock()
                    .unwrap()
                    .push((entity_id.to_string(), dest.to_path_buf()));
                Ok(9)
            })
        }
    }

    fn request(vm_id: &str) -> ExportRequest {
        ExportRequest {
            vm_id: vm_id.into(),
            vm_name: format!("name-{vm_id}"),
            project_name: None,
            ova_name: format!("{vm_id}-backup"),
        }
    }

    fn poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exports_and_downloads_each_vm() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeExports::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = ExportRunner::new(&client, &tx, poll());

        let outcomes = runner
            .run_batch(vec![request("vm-1"), request("vm-bad"), request("vm-2")], dir.path())
            .await;

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].ova_entity_id.as_deref(), Some("ova-vm-1"));
        assert_eq!(outcomes[0].local_path, Some(dir.path().join("vm-1.ova")));
        assert_eq!(outcomes[0].bytes, 9);
        assert!(dir.path().join("vm-1.ova").exists());

        assert!(!outcomes[1].is_success());
        assert_eq!(
            outcomes[1].error,
            Some(TransferError::RemoteTaskFailed {
                task_id: "export:vm-bad".into(),
                reason: "disk busy".into()
            })
        );
        assert!(outcomes[2].is_success());
        assert_eq!(client.downloads.lock().unwrap().len(), 2);

        let mut download_pcts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::Progress { item_id, phase, percent } = event
                && item_id == "name-vm-1"
                && phase == PHASE_DOWNLOADING
            {
                download_pcts.push(percent);
            }
        }
        assert_eq!(download_pcts, vec![0, 44, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_listing_ovas_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeExports::default();
        let runner = ExportRunner::new(&client, &crate::NoopReporter, poll());

        let outcome = runner.run(request("vm-noref"), dir.path()).await;
        assert!(outcome.is_success());
        assert_eq!(
            outcome.ova_entity_id.as_deref(),
            Some("listed-vm-noref-backup")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let runner_handle = CancelHandle::new();
        let client = FakeExports {
            cancel_on_submit: Some(runner_handle.clone()),
            ..Default::default()
        };
        let mut runner = ExportRunner::new(&client, &crate::NoopReporter, poll());
        runner.cancel = runner_handle;

        let outcome = runner.run(request("vm-1"), dir.path()).await;
        assert_eq!(outcome.error, Some(TransferError::Cancelled));
        assert!(outcome.local_path.is_none());
        assert!(client.downloads.lock().unwrap().is_empty());
    }
}
