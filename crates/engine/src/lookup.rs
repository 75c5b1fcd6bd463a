//! Name to UUID lookups for subnets and projects.

use std::collections::HashMap;

use prism_ova_client::Client;
use prism_ova_protocol::NamedEntity;
use tracing::debug;

use crate::error::TransferError;

/// Read-only name table, filled once before a batch starts.
#[derive(Debug, Clone, Default)]
pub struct NameLookup {
    subnets: HashMap<String, String>,
    projects: HashMap<String, String>,
}

impl NameLookup {
    pub fn from_entities(subnets: &[NamedEntity], projects: &[NamedEntity]) -> Self {
        Self {
            subnets: index(subnets),
            projects: index(projects),
        }
    }

    /// Lists subnets and projects from Prism.
    pub async fn load(client: &Client) -> Result<Self, TransferError> {
        let subnets = client.list_subnets().await?;
        let projects = client.list_projects().await?;
        debug!(
            subnets = subnets.len(),
            projects = projects.len(),
            "name lookup loaded"
        );
        Ok(Self::from_entities(&subnets, &projects))
    }

    pub fn subnet(&self, name: &str) -> Result<&str, TransferError> {
        resolve(&self.subnets, "subnet", name)
    }

    pub fn project(&self, name: &str) -> Result<&str, TransferError> {
        resolve(&self.projects, "project", name)
    }
}

fn index(entities: &[NamedEntity]) -> HashMap<String, String> {
    entities
        .iter()
        .filter(|e| !e.name().is_empty())
        .map(|e| (e.name().to_string(), e.uuid().to_string()))
        .collect()
}

fn resolve<'a>(
    table: &'a HashMap<String, String>,
    kind: &str,
    name: &str,
) -> Result<&'a str, TransferError> {
    table
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| TransferError::RemoteRejected(format!("unknown {kind} '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(uuid: &str, name: &str) -> NamedEntity {
        serde_json::from_value(serde_json::json!({
            "metadata": {"uuid": uuid},
            "status": {"name": name}
        }))
        .unwrap()
    }

    #[test]
    fn resolves_known_names() {
        let lookup = NameLookup::from_entities(
            &[entity("s-1", "vlan.10"), entity("s-2", "vlan.20")],
            &[entity("p-1", "default")],
        );
        assert_eq!(lookup.subnet("vlan.20").unwrap(), "s-2");
        assert_eq!(lookup.project("default").unwrap(), "p-1");
        assert!(lookup.subnet("vlan.30").is_err());
    }

    #[test]
    fn unknown_name_is_rejected() {
        let lookup = NameLookup::from_entities(&[entity("s-1", "vlan.10")], &[]);
        let err = lookup.subnet("vlan.99").unwrap_err();
        assert_eq!(
            err,
            TransferError::RemoteRejected("unknown subnet 'vlan.99'".into())
        );
        assert!(lookup.project("default").is_err());
    }
}
