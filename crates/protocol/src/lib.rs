//! Wire types for the Prism Central v3 REST API.
//!
//! Only the OVA, VM, task, subnet and project shapes needed to move OVA
//! artifacts and drive their asynchronous tasks are modelled here.

pub mod constants;
pub mod messages;
pub mod types;

pub use messages::{
    EntityCreateRequest, EntityCreateResponse, ListRequest, ListResponse, NamedEntity,
    OvaCreateRequest, TaskReference, TaskResponse, VmEntity, VmExportRequest,
};
pub use types::{Checksum, EntityReference, TaskStatus};
