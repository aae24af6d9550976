//! Error types for remote Proxmox operations.

use thiserror::Error;

/// Errors that can occur while driving a Proxmox node.
#[derive(Error, Debug)]
pub enum ProxmoxError {
    /// Failed to open the remote session.
    #[error("Failed to connect to {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    /// The transport itself failed (ssh could not be spawned, connection dropped).
    #[error("Transport failure while running '{command}': {reason}")]
    Transport { command: String, reason: String },

    /// A remote command exited with a non-zero status.
    #[error("Command failed (exit {exit_code}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The guest agent returned something that is not a list of interfaces.
    #[error("Malformed guest agent response: {0}")]
    GuestAgent(String),

    /// A VM blocks the deployment and is not provably RAM-only.
    #[error("Refusing to destroy VM {vm_id}: {reason}")]
    UnsafeToDestroy { vm_id: u32, reason: String },

    /// Input rejected before any remote action.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ProxmoxError {
    /// Remote stderr captured for a failed command, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type alias for Proxmox operations.
pub type Result<T> = std::result::Result<T, ProxmoxError>;
