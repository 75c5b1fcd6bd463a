//! prism-ova entry point.

mod app;
mod config;
mod reporter;
mod restore_points;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Back up and restore Prism Central VMs as OVA files.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Alternate configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List VMs, grouped by project
    Vms,

    /// List, inspect or delete local restore points
    RestorePoints {
        #[command(subcommand)]
        action: Option<RestorePointAction>,
    },

    /// Export VMs to OVAs and download them into a new restore point
    Export {
        /// VM name or UUID (repeatable)
        #[arg(long = "vm", action = clap::ArgAction::Append, required_unless_present = "all")]
        vms: Vec<String>,

        /// Export every VM outside the internal project
        #[arg(long, conflicts_with = "vms")]
        all: bool,
    },

    /// Upload OVA files to Prism
    Upload {
        /// OVA files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remote OVA name (single file only; defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },

    /// Recreate VMs from a restore point
    Restore {
        /// Restore point name (`vm-export-...`)
        restore_point: String,

        /// Restore only these VMs, by name or UUID (repeatable)
        #[arg(long = "vm", action = clap::ArgAction::Append)]
        vms: Vec<String>,

        /// Attach every NIC to this subnet
        #[arg(long)]
        subnet: Option<String>,

        /// Place restored VMs in this project instead of the recorded one
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RestorePointAction {
    /// List restore points (default)
    List,
    /// Show the VMs in a restore point
    Show { name: String },
    /// Delete restore points
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting prism-ova");

    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli.command, config))
}
