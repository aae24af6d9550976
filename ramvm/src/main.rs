//! # ramvm
//!
//! Deploys disposable test VMs onto RAM-backed (tmpfs) storage of a Proxmox
//! node over SSH, and cleans them up again.
//!
//! ## Usage
//! ```bash
//! ramvm deploy --tmpl-id 9000 --snap clean --new-id 200 --node pve1
//! ramvm cleanup --node pve1 --dry-run
//! ramvm storage --node pve1
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use ramvm_common::LogFormat;
use ramvm_proxmox::{NodeParams, RemoteExecutor, SshTransport};

mod cli;
mod commands;
mod config;
mod prompt;

use cli::{Args, Command};
use config::Config;
use prompt::TerminalPrompt;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = Args::parse();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("ramvm failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    // Configuration is read before logging so that it can set the level.
    let (config, source) = Config::load_or_default(args.config.as_deref())?;

    let level = args
        .log_level
        .clone()
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    match args.log_format.parse::<LogFormat>()? {
        LogFormat::Pretty => ramvm_common::init_logging(&level)?,
        LogFormat::Json => ramvm_common::init_logging_json(&level)?,
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ramvm");
    match &source {
        Some(path) => info!(config_path = %path.display(), "Configuration loaded"),
        None => warn!(
            path = config::DEFAULT_CONFIG_PATH,
            "Config file not found, continuing with an empty configuration"
        ),
    }

    let node = config.resolve_node(args.command.node())?;
    info!(
        node = %node.name,
        host = %node.host,
        storage = %node.storage,
        storage_path = %node.storage_path,
        "Node resolved"
    );

    let executor = RemoteExecutor::new(Arc::new(SshTransport::new(node.ssh_config())));

    let result = commands::run_interruptible(
        &executor,
        dispatch(&args.command, &config, &node, &executor),
        shutdown_signal(),
    )
    .await;

    if args.command.dry_run() {
        let plan = executor.planned_commands();
        info!(commands = plan.len(), "[DRY-RUN] Plan complete, nothing was executed");
    }

    result
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

async fn dispatch(
    command: &Command,
    config: &Config,
    node: &NodeParams,
    executor: &RemoteExecutor,
) -> Result<u8> {
    match command {
        Command::Deploy(args) => {
            commands::deploy(config, node, executor, &TerminalPrompt, args).await
        }
        Command::Cleanup(args) => commands::cleanup(node, executor, args).await,
        Command::Storage(args) => commands::storage(node, executor, args).await,
    }
}
