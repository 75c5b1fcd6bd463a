//! Remote seams used by the engine.
//!
//! `TransferClient` is implemented for the Prism HTTP client in
//! [`crate::prism`]; tests implement it with in-memory fakes. No retry logic
//! lives behind these traits: implementations surface raw failures.

use std::path::Path;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use prism_ova_protocol::{EntityCreateRequest, TaskResponse};
use prism_ova_transfer::ChunkRange;

use crate::error::TransferError;
use crate::types::PollPolicy;

/// Identifiers returned when a dependent entity is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEntity {
    pub entity_id: String,
    pub task_id: String,
}

/// Remote calls that make up an upload and a dependent create.
pub trait TransferClient: Send + Sync {
    /// Registers a new artifact. Returns the registration task id.
    fn register_entity<'a>(
        &'a self,
        name: &'a str,
        size_bytes: u64,
        checksum: &'a str,
    ) -> BoxFuture<'a, Result<String, TransferError>>;

    /// Fetches the current state of a remote task.
    fn task_status<'a>(&'a self, task_id: &'a str)
    -> BoxFuture<'a, Result<TaskResponse, TransferError>>;

    /// Sends one chunk. Re-sending the same range and bytes is safe.
    fn put_chunk<'a>(
        &'a self,
        entity_id: &'a str,
        range: ChunkRange,
        checksum: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), TransferError>>;

    /// Signals that every chunk was sent. Returns the validation task id.
    fn concatenate<'a>(&'a self, entity_id: &'a str) -> BoxFuture<'a, Result<String, TransferError>>;

    /// Creates an entity derived from an uploaded artifact.
    fn create_dependent_entity<'a>(
        &'a self,
        payload: &'a EntityCreateRequest,
    ) -> BoxFuture<'a, Result<CreatedEntity, TransferError>>;

    /// Waits for a registration task to name the new entity.
    fn await_entity_id<'a>(
        &'a self,
        task_id: &'a str,
        policy: &'a PollPolicy,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(crate::poller::await_entity_id(self, task_id, policy))
    }
}

/// Export-side calls, on top of task polling.
pub trait ExportClient: TransferClient {
    /// Starts exporting a VM to an artifact named `ova_name`. Returns the task id.
    fn submit_export<'a>(
        &'a self,
        vm_id: &'a str,
        ova_name: &'a str,
        disk_format: &'a str,
    ) -> BoxFuture<'a, Result<String, TransferError>>;

    /// Looks up an artifact id by its name.
    fn find_artifact<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TransferError>>;

    /// Streams an artifact to `dest`, reporting `(written, total)` as bytes land.
    fn download_artifact<'a>(
        &'a self,
        entity_id: &'a str,
        dest: &'a Path,
        on_bytes: &'a (dyn Fn(u64, Option<u64>) + Send + Sync),
    ) -> BoxFuture<'a, Result<u64, TransferError>>;
}

/// Builds the create payload of a dependent entity from an uploaded artifact.
pub trait DependentSpecBuilder: Send + Sync {
    fn build<'a>(
        &'a self,
        uploaded_entity_id: &'a str,
    ) -> BoxFuture<'a, Result<EntityCreateRequest, TransferError>>;
}

/// Source of the VM definition embedded in an uploaded artifact.
pub trait VmSpecSource: Send + Sync {
    fn artifact_vm_spec<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> BoxFuture<'a, Result<serde_json::Value, TransferError>>;
}
