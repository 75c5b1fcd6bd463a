//! Bounded polling of remote tasks.
//!
//! Every wait on a remote task goes through [`poll_until`], so every wait
//! carries the same elapsed-time limit.

use prism_ova_protocol::constants::KIND_OVA;
use prism_ova_protocol::{TaskResponse, TaskStatus};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::client::TransferClient;
use crate::error::TransferError;
use crate::types::{PollPolicy, RemoteTask};

/// Turns a remote task identifier into a terminal status.
pub struct TaskPoller<'a, C: TransferClient + ?Sized> {
    client: &'a C,
    policy: PollPolicy,
}

impl<'a, C: TransferClient + ?Sized> TaskPoller<'a, C> {
    pub fn new(client: &'a C, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    /// Polls `task` until it succeeds or fails, updating the handle in place.
    ///
    /// `on_progress` receives the remote percentage after every non-terminal
    /// poll. A `FAILED` task is returned as `Ok`; callers decide what it
    /// means. Exceeding `max_wait` fails with [`TransferError::Timeout`].
    pub async fn await_completion(
        &self,
        task: &mut RemoteTask,
        mut on_progress: impl FnMut(u8) + Send,
    ) -> Result<TaskResponse, TransferError> {
        let task_id = task.task_id.clone();
        let snapshot = poll_until(self.client, &task_id, &self.policy, |snap| {
            task.status = snap.status.clone();
            task.percent_complete = snap.percentage_complete;
            if snap.status.is_terminal() {
                return Some(Ok(snap.clone()));
            }
            on_progress(snap.percentage_complete);
            None
        })
        .await?;
        debug!(task = %task_id, kind = ?task.kind, status = %snapshot.status, "task finished");
        Ok(snapshot)
    }
}

/// Converts a terminal snapshot into `Ok` only when it succeeded.
pub fn require_success(task_id: &str, snapshot: &TaskResponse) -> Result<(), TransferError> {
    match snapshot.status {
        TaskStatus::Succeeded => Ok(()),
        _ => Err(TransferError::RemoteTaskFailed {
            task_id: task_id.to_string(),
            reason: snapshot
                .error_detail
                .clone()
                .unwrap_or_else(|| format!("task ended with status {}", snapshot.status)),
        }),
    }
}

/// Polls a registration task until it carries the new entity's reference.
///
/// The reference may appear before the task reports success; it is taken as
/// soon as it shows up.
pub async fn await_entity_id<C: TransferClient + ?Sized>(
    client: &C,
    task_id: &str,
    policy: &PollPolicy,
) -> Result<String, TransferError> {
    poll_until(client, task_id, policy, |snap| {
        if let Some(entity) = snap
            .entity_of_kind(KIND_OVA)
            .or_else(|| snap.entity_reference_list.first())
        {
            return Some(Ok(entity.uuid.clone()));
        }
        match snap.status {
            TaskStatus::Failed => Some(Err(TransferError::RemoteTaskFailed {
                task_id: task_id.to_string(),
                reason: snap
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "registration failed".into()),
            })),
            TaskStatus::Succeeded => Some(Err(TransferError::RemoteRejected(format!(
                "task {task_id} succeeded without an entity reference"
            )))),
            _ => None,
        }
    })
    .await
}

/// Fetches `task_id` until `check` yields a result or `max_wait` elapses.
///
/// Unknown statuses keep the loop going. Connection failures while fetching
/// are retried until the deadline; any other fetch error ends the wait. A
/// fetch that is still pending at the deadline also times out.
async fn poll_until<C, T, F>(
    client: &C,
    task_id: &str,
    policy: &PollPolicy,
    mut check: F,
) -> Result<T, TransferError>
where
    C: TransferClient + ?Sized,
    F: FnMut(&TaskResponse) -> Option<Result<T, TransferError>>,
{
    let started = Instant::now();
    loop {
        let remaining = policy.max_wait.saturating_sub(started.elapsed());
        let fetched = match timeout(remaining, client.task_status(task_id)).await {
            Ok(fetched) => fetched,
            Err(_) => {
                return Err(TransferError::Timeout {
                    task_id: task_id.to_string(),
                    waited: started.elapsed(),
                });
            }
        };
        match fetched {
            Ok(snap) => {
                if let TaskStatus::Other(status) = &snap.status {
                    warn!(task = %task_id, %status, "unexpected task status, still polling");
                }
                if let Some(result) = check(&snap) {
                    return result;
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(task = %task_id, error = %e, "task status fetch failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.max_wait {
            return Err(TransferError::Timeout {
                task_id: task_id.to_string(),
                waited: elapsed,
            });
        }
        sleep(policy.interval.min(policy.max_wait - elapsed)).await;
    }
}
