//! Local restore points.
//!
//! A restore point is a `vm-export-<YYYYmmdd-HHMMSS>` directory holding one
//! `<vm_uuid>.ova` per exported VM and a `vm_export_tasks.csv` index.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, Local};

pub const PREFIX: &str = "vm-export-";
pub const TASKS_FILE: &str = "vm_export_tasks.csv";
const TASKS_HEADER: &str = "VM_NAME,VM_UUID,PROJECT_NAME,TASK_UUID,OVA_NAME";

/// Summary of one restore point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePoint {
    pub name: String,
    pub path: PathBuf,
    pub vm_count: usize,
    pub size_bytes: u64,
}

impl RestorePoint {
    /// The `YYYYmmdd-HHMMSS` part of the name.
    pub fn timestamp(&self) -> &str {
        self.name.trim_start_matches(PREFIX)
    }
}

/// One row of `vm_export_tasks.csv`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRecord {
    pub vm_name: String,
    pub vm_uuid: String,
    pub project_name: String,
    pub task_uuid: String,
    pub ova_name: String,
}

impl TaskRecord {
    fn to_line(&self) -> String {
        [
            &self.vm_name,
            &self.vm_uuid,
            &self.project_name,
            &self.task_uuid,
            &self.ova_name,
        ]
        .iter()
        .map(|f| f.replace([',', '\n', '\r'], " "))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn from_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(',').collect();
        if parts.len() < 3 {
            return None;
        }
        let field = |i: usize| parts.get(i).map(|s| s.to_string()).unwrap_or_default();
        Some(Self {
            vm_name: field(0),
            vm_uuid: field(1),
            project_name: field(2),
            task_uuid: field(3),
            ova_name: field(4),
        })
    }
}

/// A VM recorded in a restore point, with its OVA's presence on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePointVm {
    pub record: TaskRecord,
    pub ova_path: PathBuf,
    pub ova_exists: bool,
    pub ova_size_bytes: u64,
}

/// Lists restore points under `root`, newest first.
pub fn list(root: &Path) -> anyhow::Result<Vec<RestorePoint>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut points = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(PREFIX) || !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        let vm_count = read_tasks(&path.join(TASKS_FILE))
            .map(|rows| rows.len())
            .unwrap_or(0);
        points.push(RestorePoint {
            name,
            size_bytes: ova_bytes(&path),
            path,
            vm_count,
        });
    }
    points.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(points)
}

/// Resolves a restore point by name, rejecting anything outside `root`.
pub fn locate(root: &Path, name: &str) -> anyhow::Result<PathBuf> {
    if !name.starts_with(PREFIX) || name.contains(['/', '\\']) || name.contains("..") {
        bail!("invalid restore point name '{name}'");
    }
    let path = root.join(name);
    if !path.is_dir() {
        bail!("restore point '{name}' not found in {}", root.display());
    }
    Ok(path)
}

/// Lists the VMs recorded in a restore point.
pub fn contents(root: &Path, name: &str) -> anyhow::Result<Vec<RestorePointVm>> {
    let path = locate(root, name)?;
    let tasks = path.join(TASKS_FILE);
    if !tasks.exists() {
        return Ok(Vec::new());
    }
    let vms = read_tasks(&tasks)?
        .into_iter()
        .map(|record| {
            let ova_path = path.join(format!("{}.ova", record.vm_uuid));
            let size = std::fs::metadata(&ova_path).map(|m| m.len()).ok();
            RestorePointVm {
                record,
                ova_path,
                ova_exists: size.is_some(),
                ova_size_bytes: size.unwrap_or(0),
            }
        })
        .collect();
    Ok(vms)
}

/// Creates a fresh restore point directory stamped with `now`.
pub fn create(root: &Path, now: DateTime<Local>) -> anyhow::Result<PathBuf> {
    let path = root.join(format!("{PREFIX}{}", now.format("%Y%m%d-%H%M%S")));
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating restore point {}", path.display()))?;
    Ok(path)
}

/// Deletes a restore point. Returns the bytes of OVA data removed.
pub fn delete(root: &Path, name: &str) -> anyhow::Result<u64> {
    let path = locate(root, name)?;
    let size = ova_bytes(&path);
    std::fs::remove_dir_all(&path)
        .with_context(|| format!("deleting restore point {}", path.display()))?;
    tracing::info!(restore_point = %name, bytes = size, "restore point deleted");
    Ok(size)
}

pub fn write_tasks(path: &Path, records: &[TaskRecord]) -> anyhow::Result<()> {
    let mut out = String::from(TASKS_HEADER);
    out.push('\n');
    for record in records {
        out.push_str(&record.to_line());
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn read_tasks(path: &Path) -> anyhow::Result<Vec<TaskRecord>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content
        .lines()
        .skip(1)
        .filter_map(TaskRecord::from_line)
        .collect())
}

/// Total size of the `.ova` files directly inside `dir`.
fn ova_bytes(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "ova"))
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
