//! RAM-backed (tmpfs) storage preparation.
//!
//! The directory behind a Proxmox `dir` storage is turned into a tmpfs
//! mount. Preparing an already mounted path is a no-op apart from making
//! sure the standard layout exists; only an explicit forced remount throws
//! away what is in RAM.

use tracing::{info, instrument, warn};

use crate::error::{ProxmoxError, Result};
use crate::executor::{ExecOptions, RemoteExecutor};
use crate::qm;

/// What [`prepare_storage`] found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOutcome {
    /// A mount was already present and left untouched
    AlreadyMounted,
    /// A fresh tmpfs was mounted
    Mounted,
}

/// Reject paths that are unsafe to interpolate into a shell command or to
/// mount over.
fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.trim_end_matches('/').is_empty() {
        return Err(ProxmoxError::InvalidInput(format!(
            "storage path must be an absolute path below '/': '{}'",
            path
        )));
    }
    if path
        .chars()
        .any(|c| c.is_whitespace() || "'\"`$;&|<>(){}*?\\".contains(c))
    {
        return Err(ProxmoxError::InvalidInput(format!(
            "storage path contains shell metacharacters: '{}'",
            path
        )));
    }
    Ok(())
}

/// Ask the node whether `path` is a mount point.
async fn is_mounted(executor: &RemoteExecutor, path: &str) -> Result<bool> {
    let out = executor
        .execute(&qm::mount_check(path), ExecOptions::new().silent())
        .await?;
    let line = out.trim();
    if line.is_empty() {
        return Ok(false);
    }
    if !line.contains("tmpfs") {
        warn!(path = %path, mount = %line, "Path is mounted but not as tmpfs");
    }
    Ok(true)
}

/// Ensure `storage_path` is a tmpfs mount with the standard layout.
///
/// * `ram_size_gb` - tmpfs size; `None` uses the kernel default (half of RAM)
/// * `dry_run` - log commands only; the mount check is skipped and the path
///   treated as unmounted
/// * `force_remount` - unmount first, discarding everything stored in RAM
#[instrument(skip(executor), fields(storage_path = %storage_path))]
pub async fn prepare_storage(
    executor: &RemoteExecutor,
    storage_path: &str,
    ram_size_gb: Option<u32>,
    dry_run: bool,
    force_remount: bool,
) -> Result<StorageOutcome> {
    validate_path(storage_path)?;
    info!("Checking RAM storage at {}", storage_path);

    let mounted = if dry_run {
        false
    } else {
        is_mounted(executor, storage_path).await?
    };

    let opts = ExecOptions::new().dry_run(dry_run);

    if mounted && !force_remount {
        info!("Storage {} is already mounted, skipping remount", storage_path);
        executor
            .execute(&qm::mkdir_layout(storage_path), opts.silent())
            .await?;
        return Ok(StorageOutcome::AlreadyMounted);
    }

    if force_remount {
        warn!("Force remount requested, data in {} will be lost", storage_path);
        if let Err(e) = executor
            .execute(&qm::unmount(storage_path), opts.ignore_errors())
            .await
        {
            warn!(error = %e, "Unmount failed, continuing");
        }
    }

    match ram_size_gb {
        Some(size) => info!("Mounting tmpfs ({}GB) -> {}", size, storage_path),
        None => info!("Mounting tmpfs (default size) -> {}", storage_path),
    }
    executor.execute(&qm::mkdir(storage_path), opts).await?;
    executor
        .execute(&qm::mount_tmpfs(storage_path, ram_size_gb), opts)
        .await?;
    executor
        .execute(&qm::mkdir_layout(storage_path), opts)
        .await?;

    info!("RAM storage ready");
    Ok(StorageOutcome::Mounted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::Arc;

    const MOUNT_LINE: &str = "tmpfs on /mnt/ram type tmpfs (rw,relatime,size=16777216k)";

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/mnt/ram").is_ok());
        assert!(validate_path("/var/lib/vz/ram_stor").is_ok());
        assert!(validate_path("mnt/ram").is_err());
        assert!(validate_path("/").is_err());
        assert!(validate_path("//").is_err());
        assert!(validate_path("/mnt/ram; rm -rf /").is_err());
        assert!(validate_path("/mnt/$(id)").is_err());
    }

    #[tokio::test]
    async fn test_fresh_mount_sequence() {
        let mock = Arc::new(MockTransport::new());
        let executor = RemoteExecutor::new(mock.clone());

        let outcome = prepare_storage(&executor, "/mnt/ram", Some(32), false, false)
            .await
            .unwrap();

        assert_eq!(outcome, StorageOutcome::Mounted);
        assert_eq!(
            mock.commands(),
            vec![
                "mount | grep ' /mnt/ram ' || true".to_string(),
                "mkdir -p /mnt/ram".to_string(),
                "mount -t tmpfs -o size=32G tmpfs /mnt/ram".to_string(),
                "mkdir -p /mnt/ram/{images,snippets,iso,dump}".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_already_mounted_only_ensures_layout() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success("mount | grep", MOUNT_LINE);
        let executor = RemoteExecutor::new(mock.clone());

        let outcome = prepare_storage(&executor, "/mnt/ram", Some(32), false, false)
            .await
            .unwrap();

        assert_eq!(outcome, StorageOutcome::AlreadyMounted);
        assert_eq!(mock.count_matching("mount -t tmpfs"), 0);
        assert_eq!(mock.count_matching("{images,snippets,iso,dump}"), 1);
    }

    #[tokio::test]
    async fn test_force_remount_tolerates_umount_failure() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success("mount | grep", MOUNT_LINE);
        mock.on_failure("umount", 32, "target is busy");
        let executor = RemoteExecutor::new(mock.clone());

        let outcome = prepare_storage(&executor, "/mnt/ram", None, false, true)
            .await
            .unwrap();

        assert_eq!(outcome, StorageOutcome::Mounted);
        let umount = mock.position("umount").unwrap();
        let mount = mock.position("mount -t tmpfs tmpfs /mnt/ram").unwrap();
        assert!(umount < mount);
    }

    #[tokio::test]
    async fn test_mount_failure_is_fatal() {
        let mock = Arc::new(MockTransport::new());
        mock.on_failure("mount -t tmpfs", 32, "mount: permission denied");
        let executor = RemoteExecutor::new(mock.clone());

        let err = prepare_storage(&executor, "/mnt/ram", Some(8), false, false)
            .await
            .unwrap_err();
        assert_eq!(err.stderr(), Some("mount: permission denied"));
        assert_eq!(mock.count_matching("{images"), 0);
    }

    #[tokio::test]
    async fn test_invalid_path_issues_no_commands() {
        let mock = Arc::new(MockTransport::new());
        let executor = RemoteExecutor::new(mock.clone());
        assert!(prepare_storage(&executor, "relative", Some(8), false, false)
            .await
            .is_err());
        assert!(mock.commands().is_empty());
    }
}
