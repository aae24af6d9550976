//! Remote command execution with dry-run and error policy.
//!
//! [`RemoteExecutor`] sits on top of a [`Transport`] and decides what a
//! non-zero exit means for the caller: an error, an ignored failure, or (via
//! [`RemoteExecutor::probe`]) an explicit "not found" answer.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::error::{ProxmoxError, Result};
use crate::transport::Transport;

/// Payload returned for every command in dry-run mode.
pub const DRY_RUN_OUTPUT: &str = "MOCK_OUTPUT_JSON";

/// Per-command execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Log instead of executing, return [`DRY_RUN_OUTPUT`]
    pub dry_run: bool,
    /// Log captured stdout at info level
    pub print_output: bool,
    /// Treat a non-zero exit as success (stdout is still returned)
    pub ignore_errors: bool,
    /// Log the command line before running it
    pub log_command: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            print_output: true,
            ignore_errors: false,
            log_command: true,
        }
    }
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Do not echo stdout.
    pub fn quiet(mut self) -> Self {
        self.print_output = false;
        self
    }

    /// Do not log the command line either.
    pub fn silent(mut self) -> Self {
        self.print_output = false;
        self.log_command = false;
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }
}

/// Answer to a query whose failure is a legitimate outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The command succeeded; carries its stdout
    Found(String),
    /// The command exited non-zero
    NotFound { exit_code: i32, stderr: String },
}

impl Probe {
    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }
}

/// Executes commands on one remote node.
///
/// Commands skipped because of dry-run are kept as a plan that can be
/// inspected with [`RemoteExecutor::planned_commands`].
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    planned: Arc<Mutex<Vec<String>>>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            planned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Commands that dry-run mode logged instead of executing, in order.
    pub fn planned_commands(&self) -> Vec<String> {
        self.planned
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// `user@host` of the underlying transport.
    pub fn target(&self) -> String {
        self.transport.target()
    }

    /// Open the session. In dry-run mode nothing is contacted.
    pub async fn connect(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            warn!(target_host = %self.target(), "[DRY-RUN] Mock connection");
            return Ok(());
        }
        info!(target_host = %self.target(), "Connecting");
        self.transport.connect().await?;
        debug!("Connection established");
        Ok(())
    }

    /// Close the session. Failures are logged, never returned.
    pub async fn close(&self) {
        match self.transport.close().await {
            Ok(()) => debug!("Connection closed"),
            Err(e) => warn!(error = %e, "Failed to close connection"),
        }
    }

    /// Run `command` under the given policy and return its trimmed stdout.
    pub async fn execute(&self, command: &str, opts: ExecOptions) -> Result<String> {
        if opts.dry_run {
            warn!("[DRY-RUN] Would execute: {}", command);
            match self.planned.lock() {
                Ok(mut planned) => planned.push(command.to_string()),
                Err(poisoned) => poisoned.into_inner().push(command.to_string()),
            }
            return Ok(DRY_RUN_OUTPUT.to_string());
        }

        if opts.log_command {
            info!("Executing: {}", command);
        }

        let output = self.transport.run(command).await?;

        if opts.print_output && !output.stdout.is_empty() {
            info!("--- STDOUT ---\n{}\n--------------", output.stdout);
        }

        if !output.success() {
            if opts.ignore_errors {
                debug!(
                    exit_code = output.exit_code,
                    stderr = %output.stderr,
                    "Command failed (expected/ignored)"
                );
            } else {
                error!(exit_code = output.exit_code, "Command failed: {}", command);
                if !output.stderr.is_empty() {
                    error!("--- STDERR ---\n{}\n--------------", output.stderr);
                }
                return Err(ProxmoxError::CommandFailed {
                    command: command.to_string(),
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                });
            }
        }

        Ok(output.stdout)
    }

    /// Run a query where a non-zero exit means "absent" rather than failure.
    ///
    /// Transport failures are still errors.
    pub async fn probe(&self, command: &str) -> Result<Probe> {
        debug!("Probing: {}", command);
        let output = self.transport.run(command).await?;
        if output.success() {
            Ok(Probe::Found(output.stdout))
        } else {
            debug!(exit_code = output.exit_code, stderr = %output.stderr, "Probe negative");
            Ok(Probe::NotFound {
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn executor(mock: &Arc<MockTransport>) -> RemoteExecutor {
        RemoteExecutor::new(mock.clone())
    }

    #[tokio::test]
    async fn test_dry_run_does_not_touch_transport() {
        let mock = Arc::new(MockTransport::new());
        let exec = executor(&mock);
        let out = exec
            .execute("qm start 200", ExecOptions::new().dry_run(true))
            .await
            .unwrap();
        assert_eq!(out, DRY_RUN_OUTPUT);
        assert!(mock.commands().is_empty());
        assert_eq!(exec.planned_commands(), vec!["qm start 200".to_string()]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error_with_stderr() {
        let mock = Arc::new(MockTransport::new());
        mock.on_failure("qm clone", 25, "snapshot 'x' does not exist");

        let err = executor(&mock)
            .execute("qm clone 100 200", ExecOptions::new())
            .await
            .unwrap_err();
        match err {
            ProxmoxError::CommandFailed { command, exit_code, stderr } => {
                assert_eq!(command, "qm clone 100 200");
                assert_eq!(exit_code, 25);
                assert!(stderr.contains("does not exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ignore_errors_returns_stdout() {
        let mock = Arc::new(MockTransport::new());
        mock.on_failure("qm stop", 2, "not running");
        let out = executor(&mock)
            .execute("qm stop 200", ExecOptions::new().ignore_errors())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_probe_maps_exit_status() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success("qm status 100", "status: running");
        mock.on_failure("qm status 200", 2, "Configuration file does not exist");

        let exec = executor(&mock);
        assert_eq!(
            exec.probe("qm status 100").await.unwrap(),
            Probe::Found("status: running".to_string())
        );
        assert!(!exec.probe("qm status 200").await.unwrap().is_found());
    }

    #[tokio::test]
    async fn test_probe_propagates_transport_errors() {
        let mock = Arc::new(MockTransport::new());
        mock.on_transport_error("qm status", "connection reset");
        assert!(executor(&mock).probe("qm status 1").await.is_err());
    }
}
