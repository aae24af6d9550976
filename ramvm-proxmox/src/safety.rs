//! Disk safety classification.
//!
//! Decides whether a VM lives entirely on one RAM-backed storage and may
//! therefore be destroyed without losing persistent data. The check is a
//! deliberately strict textual pattern, not a parser of Proxmox volume
//! syntax: every non-CD-ROM disk must start with `<storage>:` and mention
//! `disk`, `size` and `qcow2`. Anything else makes the VM ineligible.

use std::fmt;

use tracing::{debug, warn};

use crate::vm_config::VmConfig;

/// Substrings every destructible disk value must contain.
pub const REQUIRED_DISK_MARKERS: [&str; 3] = ["disk", "size", "qcow2"];

/// Outcome of classifying one VM against a storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// Every real disk is on the storage and matches the pattern
    Safe,
    /// No disk other than CD-ROMs
    NoDisks,
    /// A disk lives on another storage
    ForeignStorage { key: String },
    /// A disk is on the storage but does not match the strict pattern
    PatternMismatch { key: String },
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyVerdict::Safe)
    }
}

impl fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "all disks on target storage"),
            Self::NoDisks => write!(f, "no disks besides CD-ROM"),
            Self::ForeignStorage { key } => write!(f, "disk '{}' is on another storage", key),
            Self::PatternMismatch { key } => write!(
                f,
                "disk '{}' matches storage but not strict pattern (disk+size+qcow2)",
                key
            ),
        }
    }
}

/// Classify a parsed configuration against `target_storage`.
///
/// Scanning stops at the first disqualifying disk.
pub fn classify(config: &VmConfig, target_storage: &str) -> SafetyVerdict {
    let prefix = format!("{}:", target_storage);
    let mut disk_found = false;

    for disk in config.disks().filter(|d| !d.is_cdrom()) {
        disk_found = true;

        if !disk.value.starts_with(&prefix) {
            return SafetyVerdict::ForeignStorage {
                key: disk.key.to_string(),
            };
        }

        if !REQUIRED_DISK_MARKERS.iter().all(|m| disk.value.contains(m)) {
            return SafetyVerdict::PatternMismatch {
                key: disk.key.to_string(),
            };
        }
    }

    if disk_found {
        SafetyVerdict::Safe
    } else {
        SafetyVerdict::NoDisks
    }
}

/// True if VM `vm_id` may be destroyed: it has at least one real disk and
/// all of them are on `target_storage` in the strict pattern.
pub fn check_vm_safety(vm_id: &str, config_text: &str, target_storage: &str) -> bool {
    let verdict = classify(&VmConfig::parse(config_text), target_storage);
    match &verdict {
        SafetyVerdict::Safe => {}
        SafetyVerdict::PatternMismatch { .. } => {
            warn!(vm_id = %vm_id, "VM skipped: {}", verdict)
        }
        _ => debug!(vm_id = %vm_id, "VM skipped: {}", verdict),
    }
    verdict.is_safe()
}
