//! Command-line argument parsing.

use clap::{Args as ClapArgs, Parser, Subcommand};

/// ramvm - disposable Proxmox test VMs on RAM-backed storage
#[derive(Parser, Debug)]
#[command(name = "ramvm")]
#[command(about = "ramvm - Disposable Proxmox test VMs on RAM-backed storage")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults to ./config.yaml)
    #[arg(short, long, env = "RAMVM_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clone a template snapshot onto RAM storage, start it and report its IP
    Deploy(DeployArgs),

    /// Destroy every VM that lives entirely on the node's RAM storage
    Cleanup(NodeArgs),

    /// Mount the node's RAM storage (tmpfs) if it is not mounted yet
    Storage(StorageArgs),
}

impl Command {
    /// Node requested on the command line, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Command::Deploy(args) => args.node.node.as_deref(),
            Command::Cleanup(args) => args.node.as_deref(),
            Command::Storage(args) => args.node.node.as_deref(),
        }
    }

    pub fn dry_run(&self) -> bool {
        match self {
            Command::Deploy(args) => args.node.dry_run,
            Command::Cleanup(args) => args.dry_run,
            Command::Storage(args) => args.node.dry_run,
        }
    }
}

/// Options shared by every subcommand.
#[derive(ClapArgs, Debug)]
pub struct NodeArgs {
    /// Target node name (as defined in the config file)
    #[arg(long)]
    pub node: Option<String>,

    /// Simulate actions without executing them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(ClapArgs, Debug)]
pub struct DeployArgs {
    /// Template VM ID
    #[arg(long)]
    pub tmpl_id: u32,

    /// Snapshot name of the template
    #[arg(long)]
    pub snap: String,

    /// New VM ID
    #[arg(long)]
    pub new_id: u32,

    /// Memory of the new VM in MiB (overrides deploy.memory)
    #[arg(long)]
    pub memory: Option<u32>,

    /// Destroy an existing VM with the same ID without asking
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub node: NodeArgs,
}

#[derive(ClapArgs, Debug)]
pub struct StorageArgs {
    /// Unmount and remount even if already mounted (data in RAM is lost)
    #[arg(long)]
    pub force_remount: bool,

    #[command(flatten)]
    pub node: NodeArgs,
}
