//! SSH transport backed by the system OpenSSH client.
//!
//! `connect` starts a multiplexing master (`ControlMaster`) in the
//! background; every `run` reuses that authenticated session through the
//! control socket, and `close` tells the master to exit. Host keys are
//! accepted on first use and pinned afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProxmoxError, Result};
use crate::transport::{CommandOutput, Transport};

/// Exit status ssh itself uses for connection and protocol errors.
const SSH_FAILURE_EXIT: i32 = 255;

/// Seconds ssh waits for the TCP connection.
const CONNECT_TIMEOUT_SECS: u32 = 10;

/// Seconds the master lingers after the last client disconnects.
const CONTROL_PERSIST_SECS: u32 = 600;

/// SSH connection parameters for one node.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Hostname or IP address
    pub host: String,
    /// Login user
    pub user: String,
    /// Private key file
    pub key_path: PathBuf,
    /// Port, when not 22
    pub port: Option<u16>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            key_path: key_path.into(),
            port: None,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Runs commands through `ssh` with a shared control socket.
pub struct SshTransport {
    config: SshConfig,
    control_path: PathBuf,
    connected: AtomicBool,
}

impl SshTransport {
    /// Create a transport with a fresh control socket under the temp dir.
    pub fn new(config: SshConfig) -> Self {
        let control_path =
            std::env::temp_dir().join(format!("ramvm-{}.sock", uuid::Uuid::new_v4().simple()));
        Self::with_control_path(config, control_path)
    }

    /// Create a transport using a caller-chosen control socket.
    pub fn with_control_path(config: SshConfig, control_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            control_path: control_path.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    /// Options shared by every ssh invocation.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.config.key_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        if let Some(port) = self.config.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }

    /// Arguments that start the background master.
    fn master_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPersist={}", CONTROL_PERSIST_SECS),
            "-f".to_string(),
            "-N".to_string(),
            self.config.destination(),
        ]);
        args
    }

    /// Arguments that run `command` over the shared session.
    fn command_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            self.config.destination(),
            "--".to_string(),
            command.to_string(),
        ]);
        args
    }

    /// Arguments that ask the master to exit.
    fn exit_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.config.destination()]);
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn target(&self) -> String {
        self.config.destination()
    }

    #[instrument(skip(self), fields(host = %self.config.host, user = %self.config.user))]
    async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        info!(key = %self.config.key_path.display(), "Opening SSH session");

        let output = Command::new("ssh")
            .args(self.master_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProxmoxError::ConnectionFailed {
                host: self.config.host.clone(),
                reason: format!("failed to execute ssh: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProxmoxError::ConnectionFailed {
                host: self.config.host.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        debug!(control_path = %self.control_path.display(), "SSH master established");
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new("ssh")
            .args(self.command_args(command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProxmoxError::Transport {
                command: command.to_string(),
                reason: format!("failed to execute ssh: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        let exit_code = match output.status.code() {
            Some(SSH_FAILURE_EXIT) => {
                return Err(ProxmoxError::Transport {
                    command: command.to_string(),
                    reason: stderr,
                })
            }
            Some(code) => code,
            None => {
                return Err(ProxmoxError::Transport {
                    command: command.to_string(),
                    reason: "ssh terminated by signal".to_string(),
                })
            }
        };

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let status = Command::new("ssh")
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(s) if s.success() => debug!("SSH session closed"),
            Ok(s) => warn!(status = %s, "SSH master did not acknowledge exit"),
            Err(e) => warn!(error = %e, "Failed to close SSH session"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> SshTransport {
        SshTransport::with_control_path(
            SshConfig::new("192.168.1.10", "root", "/home/op/.ssh/id_ed25519"),
            "/tmp/ramvm-test.sock",
        )
    }

    #[test]
    fn test_command_args_pass_command_as_single_argument() {
        let args = transport().command_args("qm status 200");
        assert_eq!(args.last().unwrap(), "qm status 200");
        assert!(args.contains(&"root@192.168.1.10".to_string()));
        assert!(args.contains(&"ControlPath=/tmp/ramvm-test.sock".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ControlMaster=no".to_string()));
    }

    #[test]
    fn test_master_args_background_without_command() {
        let args = transport().master_args();
        assert!(args.contains(&"-f".to_string()));
        assert!(args.contains(&"-N".to_string()));
        assert!(args.contains(&"ControlMaster=auto".to_string()));
        assert_eq!(args.last().unwrap(), "root@192.168.1.10");
    }

    #[test]
    fn test_custom_port() {
        let mut config = SshConfig::new("pve", "admin", "/k");
        config.port = Some(2222);
        let args = SshTransport::with_control_path(config, "/tmp/x.sock").common_args();
        let idx = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[idx + 1], "2222");
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        assert!(transport().close().await.is_ok());
    }
}
