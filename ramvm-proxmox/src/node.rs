//! Connection and storage parameters of one Proxmox node.

use std::path::PathBuf;

use crate::ssh::SshConfig;

/// Everything the deployment flow needs to know about a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeParams {
    /// Node name as used on the command line
    pub name: String,
    /// Hostname or IP address
    pub host: String,
    /// SSH login user
    pub user: String,
    /// SSH private key
    pub key_path: PathBuf,
    /// SSH port, when not 22
    pub ssh_port: Option<u16>,
    /// Proxmox storage ID backed by tmpfs (e.g. `ram`)
    pub storage: String,
    /// Directory behind that storage (e.g. `/mnt/ram_stor`)
    pub storage_path: String,
    /// tmpfs size; `None` leaves the kernel default
    pub ram_disk_size_gb: Option<u32>,
}

impl NodeParams {
    pub fn ssh_config(&self) -> SshConfig {
        let mut config = SshConfig::new(self.host.clone(), self.user.clone(), self.key_path.clone());
        config.port = self.ssh_port;
        config
    }
}
