//! Command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use prism_ova_client::Client;
use prism_ova_engine::{
    CancelHandle, ExportOutcome, ExportRequest, ExportRunner, NameLookup, RestoreSpec,
    TerminalOutcome, TransferOrchestrator, VmRestoreBuilder, WorkItem,
};
use prism_ova_protocol::VmEntity;
use prism_ova_protocol::constants::INTERNAL_PROJECT;
use tracing::{info, warn};

use crate::config::{Config, Credentials};
use crate::reporter::BarReporter;
use crate::restore_points::{self, TaskRecord};
use crate::{Command, RestorePointAction};

pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::RestorePoints { action } => restore_point_command(action, &config),
        Command::Vms => {
            let client = connect(&config)?;
            print_vms(&visible_vms(&client).await?);
            Ok(())
        }
        Command::Export { vms, all } => export(&config, &vms, all).await,
        Command::Upload { files, name } => upload(&config, files, name).await,
        Command::Restore {
            restore_point,
            vms,
            subnet,
            project,
        } => restore(&config, &restore_point, &vms, subnet, project).await,
    }
}

fn connect(config: &Config) -> anyhow::Result<Client> {
    let creds = Credentials::resolve(&config.credentials_file)?;
    let client = Client::new(
        &creds.host,
        &creds.username,
        &creds.password,
        config.insecure_tls,
    )
    .context("creating Prism client")?;
    info!(url = %client.base_url(), user = %creds.username, "connecting to Prism Central");
    Ok(client)
}

/// Cancels the current item on every Ctrl-C until the returned task is aborted.
fn install_ctrl_c(handle: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling current item");
            handle.cancel_current();
        }
    })
}

// ---------------------------------------------------------------------------
// VMs
// ---------------------------------------------------------------------------

/// VMs outside the internal project, sorted by project then name.
async fn visible_vms(client: &Client) -> anyhow::Result<Vec<VmEntity>> {
    let mut vms: Vec<VmEntity> = client
        .list_vms()
        .await
        .context("listing VMs")?
        .into_iter()
        .filter(|vm| vm.project_name().is_some_and(|p| p != INTERNAL_PROJECT))
        .collect();
    vms.sort_by(|a, b| {
        (a.project_name(), a.name()).cmp(&(b.project_name(), b.name()))
    });
    Ok(vms)
}

fn print_vms(vms: &[VmEntity]) {
    println!(
        "{:<32} {:<20} {:<16} {:>5} {:>9} {:<8} UUID",
        "NAME", "PROJECT", "CLUSTER", "VCPU", "MEM(MiB)", "POWER"
    );
    for vm in vms {
        println!(
            "{:<32} {:<20} {:<16} {:>5} {:>9} {:<8} {}",
            vm.name(),
            vm.project_name().unwrap_or("-"),
            vm.cluster_name().unwrap_or("-"),
            vm.total_vcpus(),
            vm.status.resources.memory_size_mib,
            vm.status.resources.power_state,
            vm.uuid()
        );
    }
    println!("{} VMs", vms.len());
}

/// Picks VMs by name or UUID; a name matching several VMs is an error.
fn select_vms(all_vms: &[VmEntity], wanted: &[String]) -> anyhow::Result<Vec<VmEntity>> {
    let mut selected = Vec::with_capacity(wanted.len());
    for key in wanted {
        let matches: Vec<&VmEntity> = all_vms
            .iter()
            .filter(|vm| vm.uuid() == key || vm.name() == key)
            .collect();
        match matches.as_slice() {
            [] => bail!("no VM named '{key}'"),
            [vm] => selected.push((*vm).clone()),
            _ => bail!("'{key}' matches {} VMs; use the UUID", matches.len()),
        }
    }
    Ok(selected)
}

// ---------------------------------------------------------------------------
// Restore points
// ---------------------------------------------------------------------------

fn restore_point_command(action: Option<RestorePointAction>, config: &Config) -> anyhow::Result<()> {
    let root = &config.restore_points_dir;
    match action.unwrap_or(RestorePointAction::List) {
        RestorePointAction::List => {
            let points = restore_points::list(root)?;
            if points.is_empty() {
                println!("no restore points in {}", root.display());
            }
            for p in points {
                println!(
                    "{:<28} {:>4} VMs {:>10.1} MiB",
                    p.name,
                    p.vm_count,
                    p.size_bytes as f64 / 1_048_576.0
                );
            }
        }
        RestorePointAction::Show { name } => {
            for vm in restore_points::contents(root, &name)? {
                println!(
                    "{:<32} {:<20} {:<36} {}",
                    vm.record.vm_name,
                    vm.record.project_name,
                    vm.record.vm_uuid,
                    if vm.ova_exists {
                        format!("{:.1} MiB", vm.ova_size_bytes as f64 / 1_048_576.0)
                    } else {
                        "missing".to_string()
                    }
                );
            }
        }
        RestorePointAction::Delete { names } => {
            for name in names {
                let freed = restore_points::delete(root, &name)?;
                println!("deleted {name} ({:.1} MiB)", freed as f64 / 1_048_576.0);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

async fn export(config: &Config, wanted: &[String], all: bool) -> anyhow::Result<()> {
    let client = connect(config)?;
    let vms = visible_vms(&client).await?;
    let selected = if all { vms } else { select_vms(&vms, wanted)? };
    if selected.is_empty() {
        bail!("no VMs to export");
    }

    let now = chrono::Local::now();
    let dir = restore_points::create(&config.restore_points_dir, now)?;
    let stamp = now.format("%Y%m%d-%H%M%S").to_string();
    info!(restore_point = %dir.display(), vms = selected.len(), "exporting");

    let requests: Vec<ExportRequest> = selected
        .iter()
        .map(|vm| ExportRequest {
            vm_id: vm.uuid().to_string(),
            vm_name: vm.name().to_string(),
            project_name: vm.project_name().map(str::to_string),
            ova_name: format!("{}_{stamp}", vm.name()),
        })
        .collect();

    let reporter = BarReporter::new();
    let runner = ExportRunner::new(&client, &reporter, config.poll_policy());
    let ctrl_c = install_ctrl_c(runner.cancel_handle());
    let outcomes = runner.run_batch(requests, &dir).await;
    ctrl_c.abort();

    for outcome in &outcomes {
        reporter.finish(&outcome.request.vm_name, export_message(outcome));
    }

    let records: Vec<TaskRecord> = outcomes
        .iter()
        .filter(|o| o.task_id.is_some())
        .map(|o| TaskRecord {
            vm_name: o.request.vm_name.clone(),
            vm_uuid: o.request.vm_id.clone(),
            project_name: o.request.project_name.clone().unwrap_or_default(),
            task_uuid: o.task_id.clone().unwrap_or_default(),
            ova_name: o.request.ova_name.clone(),
        })
        .collect();
    restore_points::write_tasks(&dir.join(restore_points::TASKS_FILE), &records)?;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    summarize("export", outcomes.len(), failed)
}

fn export_message(outcome: &ExportOutcome) -> String {
    match (&outcome.error, &outcome.local_path) {
        (Some(e), _) => format!("failed: {e}"),
        (None, Some(path)) => format!("saved {}", path.display()),
        (None, None) => "incomplete".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Upload and restore
// ---------------------------------------------------------------------------

async fn upload(
    config: &Config,
    files: Vec<PathBuf>,
    name: Option<String>,
) -> anyhow::Result<()> {
    if name.is_some() && files.len() > 1 {
        bail!("--name only applies when uploading a single file");
    }

    let items = files
        .into_iter()
        .map(|path| {
            let remote = match &name {
                Some(n) => n.clone(),
                None => file_stem(&path)?,
            };
            Ok(WorkItem::upload(path, remote))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let client = connect(config)?;
    let outcomes = run_transfers(config, &client, items).await?;
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    summarize("upload", outcomes.len(), failed)
}

async fn restore(
    config: &Config,
    restore_point: &str,
    wanted: &[String],
    subnet: Option<String>,
    project: Option<String>,
) -> anyhow::Result<()> {
    let mut vms = restore_points::contents(&config.restore_points_dir, restore_point)?;
    if !wanted.is_empty() {
        vms.retain(|vm| {
            wanted
                .iter()
                .any(|w| *w == vm.record.vm_name || *w == vm.record.vm_uuid)
        });
    }
    for vm in vms.iter().filter(|vm| !vm.ova_exists) {
        warn!(vm = %vm.record.vm_name, path = %vm.ova_path.display(), "OVA missing, skipping");
    }
    vms.retain(|vm| vm.ova_exists);
    if vms.is_empty() {
        bail!("nothing to restore from {restore_point}");
    }

    let client = Arc::new(connect(config)?);
    let lookup = Arc::new(NameLookup::load(&client).await?);
    let stamp = restore_point.trim_start_matches(restore_points::PREFIX);

    let items = vms
        .into_iter()
        .map(|vm| {
            let recorded_project =
                Some(vm.record.project_name.clone()).filter(|p| !p.is_empty());
            let spec = RestoreSpec {
                vm_name: vm.record.vm_name.clone(),
                project: project.clone().or(recorded_project),
                subnet: subnet.clone(),
            };
            let builder = VmRestoreBuilder::new(client.clone(), lookup.clone(), spec);
            WorkItem::upload(vm.ova_path, format!("{}_restore_{stamp}", vm.record.vm_name))
                .with_dependent(Box::new(builder))
        })
        .collect();

    let outcomes = run_transfers(config, &client, items).await?;
    for o in outcomes.iter().filter(|o| o.is_success()) {
        println!(
            "{} restored as VM {}",
            o.remote_name,
            o.dependent_entity_id.as_deref().unwrap_or("?")
        );
    }
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    summarize("restore", outcomes.len(), failed)
}

async fn run_transfers(
    config: &Config,
    client: &Client,
    items: Vec<WorkItem>,
) -> anyhow::Result<Vec<TerminalOutcome>> {
    let reporter = BarReporter::new();
    for item in &items {
        let size = std::fs::metadata(&item.local_path).map(|m| m.len()).unwrap_or(0);
        reporter.expect_item(&item.remote_name, size);
    }

    let orchestrator = TransferOrchestrator::new(client, &reporter, config.orchestrator());
    let ctrl_c = install_ctrl_c(orchestrator.cancel_handle());
    let outcomes = orchestrator.run_batch(items).await;
    ctrl_c.abort();
    Ok(outcomes?)
}

fn file_stem(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .with_context(|| format!("cannot derive an OVA name from {}", path.display()))
}

fn summarize(what: &str, total: usize, failed: usize) -> anyhow::Result<()> {
    if failed > 0 {
        bail!("{failed} of {total} {what} items failed");
    }
    info!(total, "{what} finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(uuid: &str, name: &str, project: &str) -> VmEntity {
        serde_json::from_value(serde_json::json!({
            "metadata": {
                "uuid": uuid,
                "project_reference": {"kind": "project", "uuid": "p", "name": project}
            },
            "status": {"name": name, "resources": {}}
        }))
        .unwrap()
    }

    #[test]
    fn selects_by_name_or_uuid() {
        let vms = vec![vm("u1", "web", "a"), vm("u2", "db", "a")];
        let picked = select_vms(&vms, &["db".into(), "u1".into()]).unwrap();
        assert_eq!(picked[0].uuid(), "u2");
        assert_eq!(picked[1].name(), "web");
    }

    #[test]
    fn ambiguous_or_unknown_names_fail() {
        let vms = vec![vm("u1", "web", "a"), vm("u2", "web", "b")];
        assert!(select_vms(&vms, &["web".into()]).is_err());
        assert!(select_vms(&vms, &["nope".into()]).is_err());
        assert!(select_vms(&vms, &["u2".into()]).is_ok());
    }

    #[test]
    fn file_stem_names_uploads() {
        assert_eq!(file_stem(Path::new("/tmp/web01.ova")).unwrap(), "web01");
        assert!(file_stem(Path::new("/")).is_err());
    }

    #[test]
    fn summary_fails_on_any_failure() {
        assert!(summarize("upload", 3, 0).is_ok());
        assert!(summarize("upload", 3, 1).is_err());
    }
}
