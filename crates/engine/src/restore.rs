//! Builds VM create payloads from uploaded OVAs.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use prism_ova_protocol::constants::{API_VERSION, KIND_VM};
use prism_ova_protocol::EntityCreateRequest;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{DependentSpecBuilder, VmSpecSource};
use crate::error::TransferError;
use crate::lookup::NameLookup;

/// How a restored VM should differ from the one captured in the OVA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSpec {
    pub vm_name: String,
    /// Project name; the VM stays unassigned when `None`.
    pub project: Option<String>,
    /// Subnet name every NIC is attached to; NICs keep theirs when `None`.
    pub subnet: Option<String>,
}

/// [`DependentSpecBuilder`] that turns an uploaded OVA into a VM.
pub struct VmRestoreBuilder {
    source: Arc<dyn VmSpecSource>,
    lookup: Arc<NameLookup>,
    spec: RestoreSpec,
}

impl VmRestoreBuilder {
    pub fn new(source: Arc<dyn VmSpecSource>, lookup: Arc<NameLookup>, spec: RestoreSpec) -> Self {
        Self {
            source,
            lookup,
            spec,
        }
    }
}

impl DependentSpecBuilder for VmRestoreBuilder {
    fn build<'a>(
        &'a self,
        uploaded_entity_id: &'a str,
    ) -> BoxFuture<'a, Result<EntityCreateRequest, TransferError>> {
        Box::pin(async move {
            let raw = self.source.artifact_vm_spec(uploaded_entity_id).await?;
            let request = vm_create_request(raw, &self.spec, &self.lookup)?;
            debug!(ova = %uploaded_entity_id, vm = %self.spec.vm_name, "VM create payload built");
            Ok(request)
        })
    }
}

/// Rewrites an OVA's VM spec into a create request.
pub fn vm_create_request(
    raw: Value,
    restore: &RestoreSpec,
    lookup: &NameLookup,
) -> Result<EntityCreateRequest, TransferError> {
    let mut spec = unwrap_spec(raw)?;
    spec["name"] = Value::String(restore.vm_name.clone());

    if let Some(subnet) = &restore.subnet {
        let uuid = lookup.subnet(subnet)?;
        if let Some(nics) = spec
            .pointer_mut("/resources/nic_list")
            .and_then(Value::as_array_mut)
        {
            for nic in nics {
                nic["subnet_reference"] = json!({"kind": "subnet", "uuid": uuid, "name": subnet});
            }
        }
    }

    let mut metadata = json!({"kind": KIND_VM});
    if let Some(project) = &restore.project {
        let uuid = lookup.project(project)?;
        metadata["project_reference"] = json!({"kind": "project", "uuid": uuid, "name": project});
    }

    Ok(EntityCreateRequest {
        api_version: API_VERSION.to_string(),
        metadata,
        spec,
    })
}

/// Accepts `{vm_spec: {spec}}`, `{vm_spec: spec}`, `{spec}` or a bare spec.
fn unwrap_spec(raw: Value) -> Result<Value, TransferError> {
    let mut value = raw;
    for key in ["vm_spec", "spec"] {
        if let Some(inner) = value.get_mut(key).map(Value::take) {
            value = inner;
        }
    }
    if !value.is_object() {
        return Err(TransferError::RemoteRejected(
            "OVA VM spec is not an object".into(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_ova_protocol::NamedEntity;

    fn named(uuid: &str, name: &str) -> NamedEntity {
        serde_json::from_value(json!({"metadata": {"uuid": uuid}, "status": {"name": name}}))
            .unwrap()
    }

    fn lookup() -> NameLookup {
        NameLookup::from_entities(&[named("sub-1", "vlan.10")], &[named("proj-1", "finance")])
    }

    fn ova_spec() -> Value {
        json!({
            "vm_spec": {
                "spec": {
                    "name": "web01",
                    "resources": {
                        "num_sockets": 2,
                        "nic_list": [
                            {"subnet_reference": {"kind": "subnet", "uuid": "old"}},
                            {"subnet_reference": {"kind": "subnet", "uuid": "old2"}}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn rewrites_name_subnet_and_project() {
        let restore = RestoreSpec {
            vm_name: "web01-restored".into(),
            project: Some("finance".into()),
            subnet: Some("vlan.10".into()),
        };
        let req = vm_create_request(ova_spec(), &restore, &lookup()).unwrap();

        assert_eq!(req.api_version, "3.1");
        assert_eq!(req.metadata["kind"], "vm");
        assert_eq!(req.metadata["project_reference"]["uuid"], "proj-1");
        assert_eq!(req.spec["name"], "web01-restored");
        assert_eq!(req.spec["resources"]["num_sockets"], 2);
        for nic in req.spec["resources"]["nic_list"].as_array().unwrap() {
            assert_eq!(nic["subnet_reference"]["uuid"], "sub-1");
        }
    }

    #[test]
    fn keeps_nics_without_subnet_override() {
        let restore = RestoreSpec {
            vm_name: "x".into(),
            ..Default::default()
        };
        let req = vm_create_request(ova_spec(), &restore, &lookup()).unwrap();
        assert_eq!(
            req.spec["resources"]["nic_list"][1]["subnet_reference"]["uuid"],
            "old2"
        );
        assert!(req.metadata.get("project_reference").is_none());
    }

    #[test]
    fn unknown_subnet_fails() {
        let restore = RestoreSpec {
            vm_name: "x".into(),
            subnet: Some("nope".into()),
            ..Default::default()
        };
        let err = vm_create_request(ova_spec(), &restore, &lookup()).unwrap_err();
        assert!(matches!(err, TransferError::RemoteRejected(_)));
    }

    #[test]
    fn non_object_spec_is_rejected() {
        let restore = RestoreSpec::default();
        assert!(vm_create_request(json!({"vm_spec": "nope"}), &restore, &lookup()).is_err());
    }

    struct StaticSpec(Value);

    impl VmSpecSource for StaticSpec {
        fn artifact_vm_spec<'a>(
            &'a self,
            entity_id: &'a str,
        ) -> BoxFuture<'a, Result<Value, TransferError>> {
            assert_eq!(entity_id, "ova-7");
            let value = self.0.clone();
            Box::pin(async move { Ok(value) })
        }
    }

    #[tokio::test]
    async fn builder_fetches_spec_for_uploaded_ova() {
        let builder = VmRestoreBuilder::new(
            Arc::new(StaticSpec(ova_spec())),
            Arc::new(lookup()),
            RestoreSpec {
                vm_name: "web01".into(),
                ..Default::default()
            },
        );
        let req = builder.build("ova-7").await.unwrap();
        assert_eq!(req.spec["name"], "web01");
    }
}
