//! Remote command transport trait.

use async_trait::async_trait;

use crate::error::Result;

/// Captured result of a single remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, trimmed
    pub stdout: String,
    /// Standard error, trimmed
    pub stderr: String,
    /// Remote exit status
    pub exit_code: i32,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// A failed result with the given exit status and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A channel that runs shell commands on one remote host.
///
/// `run` must not return until the remote exit status is known. A non-zero
/// exit is reported in [`CommandOutput::exit_code`], never as an `Err`;
/// `Err` is reserved for failures of the channel itself.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable target, used in log lines.
    fn target(&self) -> String;

    /// Open the session.
    async fn connect(&self) -> Result<()>;

    /// Run one command and capture its output.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Close the session. Safe to call when never connected.
    async fn close(&self) -> Result<()>;
}
