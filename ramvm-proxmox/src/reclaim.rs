//! Reclamation of VMs that live entirely in RAM storage.
//!
//! Every VM on the node is classified with [`crate::safety`]; only those
//! whose disks are all strictly confined to the RAM storage are stopped and
//! destroyed with `--purge`. Failures on one VM are logged and the scan
//! moves on.

use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::executor::{ExecOptions, RemoteExecutor};
use crate::qm;
use crate::safety::check_vm_safety;

/// Summary of one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Config files that carried a numeric VM ID
    pub scanned: usize,
    /// VMs destroyed (or, in dry-run, that would have been)
    pub destroyed: Vec<u32>,
    /// VMs whose analysis or purge failed, with the error text
    pub failed: Vec<(u32, String)>,
}

/// VM ID from a path like `/etc/pve/qemu-server/105.conf`.
pub fn vm_id_from_config_path(path: &str) -> Option<u32> {
    let name = path.trim().rsplit('/').next()?;
    let id = name.strip_suffix(".conf").unwrap_or(name);
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// Destroy every VM that is entirely on `storage_name`.
#[instrument(skip(executor))]
pub async fn cleanup_ram_vms(
    executor: &RemoteExecutor,
    storage_name: &str,
    dry_run: bool,
) -> ReclaimReport {
    warn!("Scanning for VMs fully on storage '{}' to purge", storage_name);
    let mut report = ReclaimReport::default();

    let listing = match executor
        .execute(
            &qm::list_vm_configs(),
            ExecOptions::new().dry_run(dry_run).quiet().ignore_errors(),
        )
        .await
    {
        Ok(out) => out,
        Err(e) => {
            warn!(error = %e, "Could not list VM configs");
            String::new()
        }
    };

    if listing.trim().is_empty() {
        info!("No VM configs found");
        return report;
    }

    for conf_path in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(vm_id) = vm_id_from_config_path(conf_path) else {
            continue;
        };
        report.scanned += 1;

        match reclaim_one(executor, vm_id, conf_path, storage_name, dry_run).await {
            Ok(true) => report.destroyed.push(vm_id),
            Ok(false) => {}
            Err(e) => {
                error!(vm_id, error = %e, "Failed to analyze/purge VM {}", conf_path);
                report.failed.push((vm_id, e.to_string()));
            }
        }
    }

    info!(
        scanned = report.scanned,
        destroyed = report.destroyed.len(),
        failed = report.failed.len(),
        "RAM VM scan finished"
    );
    report
}

/// Classify one VM and destroy it if safe. Returns whether it was destroyed.
async fn reclaim_one(
    executor: &RemoteExecutor,
    vm_id: u32,
    conf_path: &str,
    storage_name: &str,
    dry_run: bool,
) -> Result<bool> {
    let config_text = executor
        .execute(
            &qm::read_file(conf_path),
            ExecOptions::new().dry_run(dry_run).silent(),
        )
        .await?;

    if config_text.trim().is_empty() {
        return Ok(false);
    }

    if !check_vm_safety(&vm_id.to_string(), &config_text, storage_name) {
        return Ok(false);
    }

    warn!(
        vm_id,
        "VM is fully on {} and matches safety pattern, destroying", storage_name
    );
    let opts = ExecOptions::new().dry_run(dry_run);
    if let Err(e) = executor.execute(&qm::stop(vm_id), opts.ignore_errors()).await {
        warn!(vm_id, error = %e, "Stop failed, continuing with destroy");
    }
    executor.execute(&qm::destroy(vm_id), opts).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::Arc;

    const SAFE: &str = "scsi0: ram:101/vm-101-disk-0.qcow2,size=10G\nmemory: 2048";
    const PERSISTENT: &str = "scsi0: local-lvm:vm-102-disk-0,size=32G";

    #[test]
    fn test_vm_id_from_config_path() {
        assert_eq!(vm_id_from_config_path("/etc/pve/qemu-server/105.conf"), Some(105));
        assert_eq!(vm_id_from_config_path("105.conf"), Some(105));
        assert_eq!(vm_id_from_config_path("/etc/pve/qemu-server/template.conf"), None);
        assert_eq!(vm_id_from_config_path("/etc/pve/qemu-server/.conf"), None);
        assert_eq!(vm_id_from_config_path("/etc/pve/qemu-server/-1.conf"), None);
        assert_eq!(vm_id_from_config_path("MOCK_OUTPUT_JSON"), None);
    }

    #[tokio::test]
    async fn test_only_safe_vms_are_destroyed() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success(
            "ls /etc/pve/qemu-server",
            "/etc/pve/qemu-server/101.conf\n/etc/pve/qemu-server/102.conf",
        );
        mock.on_success("cat /etc/pve/qemu-server/101.conf", SAFE);
        mock.on_success("cat /etc/pve/qemu-server/102.conf", PERSISTENT);
        let executor = RemoteExecutor::new(mock.clone());

        let report = cleanup_ram_vms(&executor, "ram", false).await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.destroyed, vec![101]);
        assert_eq!(mock.count_matching("qm destroy 101 --skiplock --purge"), 1);
        assert_eq!(mock.count_matching("qm stop 102"), 0);
        assert_eq!(mock.count_matching("qm destroy 102"), 0);
        assert!(mock.position("qm stop 101").unwrap() < mock.position("qm destroy 101").unwrap());
    }

    #[tokio::test]
    async fn test_listing_failure_means_nothing_to_scan() {
        let mock = Arc::new(MockTransport::new());
        mock.on_failure("ls /etc/pve", 2, "No such file or directory");
        let executor = RemoteExecutor::new(mock.clone());

        let report = cleanup_ram_vms(&executor, "ram", false).await;
        assert_eq!(report, ReclaimReport::default());
        assert_eq!(mock.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_one_vm_does_not_stop_scan() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success(
            "ls /etc/pve/qemu-server",
            "/etc/pve/qemu-server/101.conf\n/etc/pve/qemu-server/103.conf",
        );
        mock.on_success("cat /etc/pve/qemu-server/101.conf", SAFE);
        mock.on_success(
            "cat /etc/pve/qemu-server/103.conf",
            "scsi0: ram:103/vm-103-disk-0.qcow2,size=4G",
        );
        mock.on_failure("qm destroy 101", 2, "VM is locked (clone)");
        let executor = RemoteExecutor::new(mock.clone());

        let report = cleanup_ram_vms(&executor, "ram", false).await;
        assert_eq!(report.destroyed, vec![103]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 101);
    }

    #[tokio::test]
    async fn test_unreadable_or_empty_config_is_skipped() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success(
            "ls /etc/pve/qemu-server",
            "/etc/pve/qemu-server/104.conf\n/etc/pve/qemu-server/notes.conf",
        );
        mock.on_success("cat /etc/pve/qemu-server/104.conf", "");
        let executor = RemoteExecutor::new(mock.clone());

        let report = cleanup_ram_vms(&executor, "ram", false).await;
        assert_eq!(report.scanned, 1);
        assert!(report.destroyed.is_empty());
        assert_eq!(mock.count_matching("cat /etc/pve/qemu-server/notes.conf"), 0);
    }

    #[tokio::test]
    async fn test_dry_run_scans_nothing_real() {
        let mock = Arc::new(MockTransport::new());
        let executor = RemoteExecutor::new(mock.clone());
        let report = cleanup_ram_vms(&executor, "ram", true).await;
        assert_eq!(report.scanned, 0);
        assert!(mock.commands().is_empty());
        assert_eq!(executor.planned_commands(), vec!["ls /etc/pve/qemu-server/*.conf".to_string()]);
    }
}
