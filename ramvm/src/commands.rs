//! Subcommand handlers.
//!
//! Each handler owns the session lifecycle for its command: it connects
//! the executor, runs the operation and closes the session on every path.

use std::future::Future;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use ramvm_proxmox::{
    cleanup_ram_vms, prepare_storage, ConflictResolver, DeployRequest, Deployer, NodeParams,
    RemoteExecutor, StorageOutcome,
};

use crate::cli::{DeployArgs, NodeArgs, StorageArgs};
use crate::config::Config;

/// Process exit codes returned by the handlers.
pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
/// The operator declined to replace an existing VM.
pub const EXIT_ABORTED: u8 = 2;
/// Ctrl+C (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

/// Run `work` until it finishes or `interrupt` resolves.
///
/// On interrupt the unfinished work is dropped, which kills any ssh child
/// still running, and the session is closed. Nothing is rolled back.
pub async fn run_interruptible<W, I>(executor: &RemoteExecutor, work: W, interrupt: I) -> Result<u8>
where
    W: Future<Output = Result<u8>>,
    I: Future<Output = ()>,
{
    tokio::select! {
        result = work => result,
        _ = interrupt => {
            warn!("Interrupted, closing SSH session");
            executor.close().await;
            Ok(EXIT_INTERRUPTED)
        }
    }
}

/// `ramvm deploy`: prints `{"id":…,"ip":…}` on stdout.
pub async fn deploy(
    config: &Config,
    node: &NodeParams,
    executor: &RemoteExecutor,
    resolver: &dyn ConflictResolver,
    args: &DeployArgs,
) -> Result<u8> {
    let request = DeployRequest::new(args.tmpl_id, args.snap.clone(), args.new_id)
        .with_memory(config.memory(args.memory))
        .with_dry_run(args.node.dry_run)
        .with_force(args.force);

    let mut deployer =
        Deployer::new(executor, node, resolver).with_poll_config(config.poll_config());
    let outcome = deployer.run(&request).await.context("Deployment failed")?;

    println!("{}", serde_json::to_string(&outcome)?);

    if outcome.aborted {
        return Ok(EXIT_ABORTED);
    }
    match &outcome.ip {
        Some(ip) => info!(vm_id = outcome.id, ip = %ip, "Deployment complete"),
        None => warn!(vm_id = outcome.id, "Deployment complete, but no IP address was reported"),
    }
    Ok(EXIT_OK)
}

/// `ramvm cleanup`: destroy every VM living entirely on the RAM storage.
pub async fn cleanup(node: &NodeParams, executor: &RemoteExecutor, args: &NodeArgs) -> Result<u8> {
    executor.connect(args.dry_run).await.context("Failed to connect")?;
    let report = cleanup_ram_vms(executor, &node.storage, args.dry_run).await;
    executor.close().await;

    info!(
        scanned = report.scanned,
        destroyed = ?report.destroyed,
        "Cleanup finished"
    );
    for (vm_id, reason) in &report.failed {
        error!(vm_id = vm_id, reason = %reason, "VM could not be cleaned up");
    }

    if report.failed.is_empty() {
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_FAILURE)
    }
}

/// `ramvm storage`: make sure the tmpfs is mounted and laid out.
pub async fn storage(node: &NodeParams, executor: &RemoteExecutor, args: &StorageArgs) -> Result<u8> {
    let dry_run = args.node.dry_run;
    executor.connect(dry_run).await.context("Failed to connect")?;
    let result = prepare_storage(
        executor,
        &node.storage_path,
        node.ram_disk_size_gb,
        dry_run,
        args.force_remount,
    )
    .await;
    executor.close().await;

    match result.context("Storage preparation failed")? {
        StorageOutcome::AlreadyMounted => info!(path = %node.storage_path, "RAM storage already mounted"),
        StorageOutcome::Mounted => info!(path = %node.storage_path, "RAM storage mounted"),
    }
    Ok(EXIT_OK)
}
