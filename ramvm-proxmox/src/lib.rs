//! # ramvm Proxmox
//!
//! RAM-storage safety and VM lifecycle logic for Proxmox nodes driven over
//! SSH.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   Deployer (deploy)                  │
//! │ exists? → resolve conflict → storage → clone → start │
//! └──────┬──────────────┬───────────────┬─────────────┬──┘
//!        ▼              ▼               ▼             ▼
//!  cleanup_ram_vms  prepare_storage  wait_for_ip   qm::*
//!   (reclaim)        (storage)       (network)
//!        │
//!        ▼
//!  check_vm_safety (safety) ← VmConfig (vm_config)
//!
//!          all remote I/O: RemoteExecutor → Transport
//!                            (SshTransport | MockTransport)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ramvm_proxmox::{DeclineAll, DeployRequest, Deployer, RemoteExecutor, SshTransport};
//!
//! let executor = RemoteExecutor::new(Arc::new(SshTransport::new(node.ssh_config())));
//! let mut deployer = Deployer::new(&executor, &node, &DeclineAll);
//! let outcome = deployer.run(&DeployRequest::new(9000, "clean", 200)).await?;
//! println!("{:?}", outcome.ip);
//! ```

pub mod deploy;
pub mod error;
pub mod executor;
pub mod mock;
pub mod network;
pub mod node;
pub mod qm;
pub mod reclaim;
pub mod safety;
pub mod ssh;
pub mod storage;
pub mod transport;
pub mod vm_config;

pub use deploy::{
    ConflictResolver, DeclineAll, DeployOutcome, DeployRequest, DeployState, Deployer,
    DEFAULT_MEMORY_MIB,
};
pub use error::{ProxmoxError, Result};
pub use executor::{ExecOptions, Probe, RemoteExecutor, DRY_RUN_OUTPUT};
pub use mock::MockTransport;
pub use network::{
    parse_interfaces, select_ip, wait_for_ip, GuestInterface, GuestIpAddress, IpAddressType,
    PollConfig, DRY_RUN_IP,
};
pub use node::NodeParams;
pub use reclaim::{cleanup_ram_vms, ReclaimReport};
pub use safety::{check_vm_safety, classify, SafetyVerdict};
pub use ssh::{SshConfig, SshTransport};
pub use storage::{prepare_storage, StorageOutcome};
pub use transport::{CommandOutput, Transport};
pub use vm_config::{is_cdrom, is_disk_key, DiskEntry, VmConfig};
