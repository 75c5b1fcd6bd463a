//! OVA transfer orchestration against Prism Central.
//!
//! This crate holds the **business logic** for moving OVA artifacts in and
//! out of Prism. It talks to the remote only through the [`TransferClient`]
//! and [`ExportClient`] traits; [`prism`] implements them for the HTTP
//! client, tests implement them in memory.
//!
//! # Upload pipeline
//!
//! 1. **Checksum**: stream the whole file through SHA-1 and plan chunk ranges
//! 2. **Register**: create the OVA entity and wait for its id
//! 3. **Upload**: send chunks with bounded concurrency and retries
//! 4. **Concatenate**: once every byte is confirmed, ask Prism to assemble
//! 5. **Validate**: poll the validation task
//! 6. **Dependent** (optional): create a VM from the OVA and wait for it

pub mod client;
pub mod error;
pub mod export;
pub mod lookup;
pub mod orchestrator;
pub mod poller;
pub mod prism;
pub mod progress;
pub mod restore;
pub mod types;

pub use client::{CreatedEntity, DependentSpecBuilder, ExportClient, TransferClient, VmSpecSource};
pub use error::TransferError;
pub use export::{ExportOutcome, ExportRequest, ExportRunner};
pub use lookup::NameLookup;
pub use orchestrator::{CancelHandle, TransferOrchestrator};
pub use poller::{TaskPoller, require_success};
pub use progress::{NoopReporter, ProgressReporter};
pub use restore::{RestoreSpec, VmRestoreBuilder};
pub use types::{
    OrchestratorConfig, PollPolicy, RemoteTask, RemoteTaskKind, RetryPolicy, TerminalOutcome,
    TransferEvent, TransferItem, TransferState, WorkItem,
};
