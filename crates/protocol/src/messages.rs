use serde::{Deserialize, Serialize};

use crate::types::{Checksum, EntityReference, TaskStatus};

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Registers a new OVA upload (`POST /ovas`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OvaCreateRequest {
    pub name: String,
    pub upload_length: u64,
    pub checksum: Checksum,
}

/// Exports a VM to an OVA (`POST /vms/{uuid}/export`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmExportRequest {
    pub disk_file_format: String,
    pub name: String,
}

/// Body for the `*/list` endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub length: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub offset: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

impl ListRequest {
    pub fn new(kind: &str, length: u32) -> Self {
        Self {
            kind: kind.to_string(),
            length,
            offset: 0,
            filter: String::new(),
        }
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Entity-create payload (`POST /vms`).
///
/// `spec` and `metadata` are opaque to the transfer core; callers build them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCreateRequest {
    pub api_version: String,
    pub metadata: serde_json::Value,
    pub spec: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response carrying only a task identifier (create, concatenate, export).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskReference {
    #[serde(default)]
    pub task_uuid: Option<String>,
}

/// A polled task (`GET /tasks/{uuid}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub uuid: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub percentage_complete: u8,
    #[serde(default)]
    pub entity_reference_list: Vec<EntityReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
}

impl TaskResponse {
    /// First referenced entity of the given kind (any kind if `kind` is empty).
    pub fn entity_of_kind(&self, kind: &str) -> Option<&EntityReference> {
        self.entity_reference_list
            .iter()
            .find(|r| kind.is_empty() || r.kind.is_empty() || r.kind == kind)
    }
}

/// Response to an entity-create request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityCreateResponse {
    #[serde(default)]
    pub metadata: EntityMetadata,
    #[serde(default)]
    pub status: CreateStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub execution_context: ExecutionContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub task_uuid: Option<String>,
}

/// Common `metadata` block of Prism entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_reference: Option<EntityReference>,
}

/// Paged response of a `*/list` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub entities: Vec<T>,
    #[serde(default)]
    pub metadata: ListMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListMetadata {
    #[serde(default)]
    pub total_matches: u32,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A VM as returned by `POST /vms/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmEntity {
    #[serde(default)]
    pub metadata: EntityMetadata,
    #[serde(default)]
    pub status: VmStatusBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmStatusBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_reference: Option<EntityReference>,
    #[serde(default)]
    pub resources: VmResources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmResources {
    #[serde(default)]
    pub power_state: String,
    #[serde(default)]
    pub memory_size_mib: u64,
    #[serde(default)]
    pub num_vcpus_per_socket: u32,
    #[serde(default)]
    pub num_sockets: u32,
}

impl VmEntity {
    pub fn uuid(&self) -> &str {
        &self.metadata.uuid
    }

    pub fn name(&self) -> &str {
        &self.status.name
    }

    /// Project name, if the VM belongs to one.
    pub fn project_name(&self) -> Option<&str> {
        self.metadata
            .project_reference
            .as_ref()
            .and_then(|r| r.name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.status
            .cluster_reference
            .as_ref()
            .and_then(|r| r.name.as_deref())
    }

    /// vCPUs per socket times sockets (a missing socket count counts as one).
    pub fn total_vcpus(&self) -> u32 {
        let r = &self.status.resources;
        r.num_vcpus_per_socket * r.num_sockets.max(1)
    }
}

/// Any entity where only name and uuid matter (subnets, projects, OVAs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedEntity {
    #[serde(default)]
    pub metadata: EntityMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NameBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<NameBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<NameBody>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameBody {
    #[serde(default)]
    pub name: String,
}

impl NamedEntity {
    pub fn uuid(&self) -> &str {
        &self.metadata.uuid
    }

    /// Name from `status`, then `spec`, then `info`; empty if none is set.
    pub fn name(&self) -> &str {
        [&self.status, &self.spec, &self.info]
            .into_iter()
            .flatten()
            .map(|b| b.name.as_str())
            .find(|n| !n.is_empty())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ova_create_request_wire_shape() {
        let req = OvaCreateRequest {
            name: "backup-vm1".into(),
            upload_length: 262_144_000,
            checksum: Checksum::sha1("deadbeef"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["name"], "backup-vm1");
        assert_eq!(json["upload_length"], 262_144_000u64);
        assert_eq!(json["checksum"]["checksum_algorithm"], "SHA_1");
        assert_eq!(json["checksum"]["checksum_value"], "deadbeef");
    }

    #[test]
    fn task_response_decodes_entity_reference() {
        let json = r#"{
            "uuid": "t-1",
            "status": "RUNNING",
            "percentage_complete": 40,
            "entity_reference_list": [{"kind": "ova", "uuid": "ova-9"}]
        }"#;
        let task: TaskResponse = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.percentage_complete, 40);
        assert_eq!(task.entity_of_kind("ova").unwrap().uuid, "ova-9");
        assert!(task.entity_of_kind("vm").is_none());
    }

    #[test]
    fn task_response_minimal() {
        let task: TaskResponse = serde_json::from_str(r#"{"status":"QUEUED"}"#).unwrap();
        assert_eq!(task.percentage_complete, 0);
        assert!(task.entity_reference_list.is_empty());
        assert!(task.error_detail.is_none());
    }

    #[test]
    fn list_request_omits_defaults() {
        let json = serde_json::to_string(&ListRequest::new("vm", 1000)).unwrap();
        assert_eq!(json, r#"{"kind":"vm","length":1000}"#);
    }

    #[test]
    fn vm_entity_helpers() {
        let json = r#"{
            "metadata": {"uuid": "vm-1", "project_reference": {"kind": "project", "uuid": "p-1", "name": "prod"}},
            "status": {
                "name": "web01",
                "cluster_reference": {"kind": "cluster", "uuid": "c-1", "name": "c1"},
                "resources": {"power_state": "ON", "memory_size_mib": 4096, "num_vcpus_per_socket": 2, "num_sockets": 2}
            }
        }"#;
        let vm: VmEntity = serde_json::from_str(json).unwrap();
        assert_eq!(vm.uuid(), "vm-1");
        assert_eq!(vm.name(), "web01");
        assert_eq!(vm.project_name(), Some("prod"));
        assert_eq!(vm.cluster_name(), Some("c1"));
        assert_eq!(vm.total_vcpus(), 4);
    }

    #[test]
    fn named_entity_prefers_status_name() {
        let json = r#"{"metadata":{"uuid":"s-1"},"spec":{"name":"from-spec"},"status":{"name":"vlan10"}}"#;
        let e: NamedEntity = serde_json::from_str(json).unwrap();
        assert_eq!(e.name(), "vlan10");

        let json = r#"{"metadata":{"uuid":"o-1"},"info":{"name":"backup.ova"}}"#;
        let e: NamedEntity = serde_json::from_str(json).unwrap();
        assert_eq!(e.name(), "backup.ova");
    }

    #[test]
    fn entity_create_response_task_uuid() {
        let json = r#"{"metadata":{"uuid":"vm-new"},"status":{"state":"PENDING","execution_context":{"task_uuid":"t-7"}}}"#;
        let r: EntityCreateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.metadata.uuid, "vm-new");
        assert_eq!(r.status.execution_context.task_uuid.as_deref(), Some("t-7"));
    }
}
