//! Parser for Proxmox `qemu-server/<vmid>.conf` files.
//!
//! The format is flat `key: value` text. Only the first colon separates the
//! key, so values such as `ram:100/vm-100-disk-0.qcow2` survive intact.
//! Snapshot sections (`[snapname]`) have no colon and are skipped, as are
//! blank lines, comments and any other line without a colon.
//!
//! Section headers are dropped but their contents are not: keys of a
//! snapshot or `[PENDING]` section land in the same flat map and, coming
//! later in the file, overwrite the live values. A VM whose snapshot lists
//! different disks than its current config is therefore classified by the
//! snapshot's disks.

use std::fmt;

/// Bus prefixes that mark a configuration key as a disk slot.
pub const DISK_KEY_PREFIXES: [&str; 5] = ["scsi", "ide", "sata", "virtio", "efidisk"];

/// Parsed VM configuration.
///
/// Keys keep the order in which they first appeared; a repeated key
/// overwrites the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmConfig {
    entries: Vec<(String, String)>,
}

impl VmConfig {
    /// Parse configuration text. Never fails; unparseable lines are dropped.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                config.insert(key.trim(), value.trim());
            }
        }
        config
    }

    /// Insert or overwrite a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key names a disk slot, CD-ROMs included.
    pub fn disks(&self) -> impl Iterator<Item = DiskEntry<'_>> {
        self.iter()
            .filter(|(key, _)| is_disk_key(key))
            .map(|(key, value)| DiskEntry { key, value })
    }
}

impl fmt::Display for VmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

/// A configuration entry that names a disk slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskEntry<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

impl DiskEntry<'_> {
    pub fn is_cdrom(&self) -> bool {
        is_cdrom(self.value)
    }
}

/// True if `key` starts with one of the disk bus prefixes.
pub fn is_disk_key(key: &str) -> bool {
    DISK_KEY_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// True if a disk value refers to CD-ROM media or an ISO image.
pub fn is_cdrom(value: &str) -> bool {
    value.contains("media=cdrom") || value.contains(".iso")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# managed by ramvm
agent: 1
boot: order=scsi0;ide2
cores: 4
ide2: local:iso/debian-12.iso,media=cdrom
memory: 8192
scsi0: ram:200/vm-200-disk-0.qcow2,size=32G,ssd=1

[pre-upgrade]
scsi0: local-lvm:vm-200-disk-0,size=32G
";

    #[test]
    fn test_parse_splits_on_first_colon_only() {
        let config = VmConfig::parse("scsi0: ram:100/vm-100-disk-0.qcow2,size=32G");
        assert_eq!(config.get("scsi0"), Some("ram:100/vm-100-disk-0.qcow2,size=32G"));
    }

    #[test]
    fn test_parse_skips_comments_blanks_and_sections() {
        let config = VmConfig::parse("# comment\n\n[snap]\nnot a pair\nmemory: 1024\n");
        assert_eq!(config.len(), 1);
        assert_eq!(config.get("memory"), Some("1024"));
    }

    #[test]
    fn test_duplicate_key_last_wins_in_place() {
        let config = VmConfig::parse(SAMPLE);
        assert_eq!(config.get("scsi0"), Some("local-lvm:vm-200-disk-0,size=32G"));
        let keys: Vec<&str> = config.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["agent", "boot", "cores", "ide2", "memory", "scsi0"]);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let config = VmConfig::parse("   cores :   2   \n");
        assert_eq!(config.get("cores"), Some("2"));
    }

    #[test]
    fn test_reparse_of_display_is_stable() {
        let config = VmConfig::parse(SAMPLE);
        let reparsed = VmConfig::parse(&config.to_string());
        assert_eq!(config, reparsed);
        assert_eq!(VmConfig::parse(&reparsed.to_string()), reparsed);
    }

    #[test]
    fn test_disk_keys() {
        for key in ["scsi0", "ide2", "sata1", "virtio3", "efidisk0"] {
            assert!(is_disk_key(key), "{key}");
        }
        for key in ["memory", "net0", "tpmstate0", "unused0", "boot"] {
            assert!(!is_disk_key(key), "{key}");
        }
    }

    #[test]
    fn test_cdrom_detection() {
        assert!(is_cdrom("local:iso/image.iso,media=cdrom"));
        assert!(is_cdrom("none,media=cdrom"));
        assert!(is_cdrom("local:iso/virtio-win.iso"));
        assert!(!is_cdrom("ram:100/vm-100-disk-0.qcow2,size=32G"));
    }

    #[test]
    fn test_disks_view() {
        let config = VmConfig::parse(SAMPLE);
        let disks: Vec<DiskEntry> = config.disks().collect();
        assert_eq!(disks.len(), 2);
        assert!(disks[0].is_cdrom());
        assert_eq!(disks[1].key, "scsi0");
    }
}
