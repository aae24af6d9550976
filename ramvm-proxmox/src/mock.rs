//! Mock transport for testing and development.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProxmoxError, Result};
use crate::transport::{CommandOutput, Transport};

/// Scripted reply for a matching command.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// The command ran and produced this output
    Output(CommandOutput),
    /// The channel failed before an exit status was known
    TransportError(String),
    /// The command hangs this long, then succeeds with empty output
    Stall(Duration),
}

struct Rule {
    pattern: String,
    replies: VecDeque<MockReply>,
}

#[derive(Default)]
struct MockState {
    rules: Vec<Rule>,
    commands: Vec<String>,
    connect_calls: usize,
    close_calls: usize,
    refuse_connect: bool,
}

/// Mock transport that simulates a Proxmox node in memory.
///
/// Commands are matched against registered substrings in registration
/// order. Each pattern holds a queue of replies; the last reply in a queue
/// repeats forever. Unmatched commands succeed with empty output. Every
/// command is recorded for later assertions.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, pattern: &str, reply: MockReply) {
        let mut state = self.state();
        match state.rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.replies.push_back(reply),
            None => state.rules.push(Rule {
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Reply to commands containing `pattern` with successful `stdout`.
    pub fn on_success(&self, pattern: &str, stdout: &str) -> &Self {
        self.push(pattern, MockReply::Output(CommandOutput::ok(stdout)));
        self
    }

    /// Reply to commands containing `pattern` with a non-zero exit.
    pub fn on_failure(&self, pattern: &str, exit_code: i32, stderr: &str) -> &Self {
        self.push(pattern, MockReply::Output(CommandOutput::failed(exit_code, stderr)));
        self
    }

    /// Fail the channel for commands containing `pattern`.
    pub fn on_transport_error(&self, pattern: &str, reason: &str) -> &Self {
        self.push(pattern, MockReply::TransportError(reason.to_string()));
        self
    }

    /// Let commands containing `pattern` hang for `duration`.
    pub fn on_stall(&self, pattern: &str, duration: Duration) -> &Self {
        self.push(pattern, MockReply::Stall(duration));
        self
    }

    /// Make `connect` fail.
    pub fn refuse_connect(&self) -> &Self {
        self.state().refuse_connect = true;
        self
    }

    /// All commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of recorded commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Index of the first recorded command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.state().commands.iter().position(|c| c.contains(pattern))
    }

    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn target(&self) -> String {
        "mock@localhost".to_string()
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.state();
        state.connect_calls += 1;
        if state.refuse_connect {
            return Err(ProxmoxError::ConnectionFailed {
                host: "localhost".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let reply = {
            let mut state = self.state();
            state.commands.push(command.to_string());
            state
                .rules
                .iter_mut()
                .find(|r| command.contains(&r.pattern))
                .and_then(|rule| {
                    if rule.replies.len() > 1 {
                        rule.replies.pop_front()
                    } else {
                        rule.replies.front().cloned()
                    }
                })
        };

        debug!(command = %command, matched = reply.is_some(), "Mock command");

        match reply {
            Some(MockReply::Output(output)) => Ok(output),
            Some(MockReply::TransportError(reason)) => Err(ProxmoxError::Transport {
                command: command.to_string(),
                reason,
            }),
            Some(MockReply::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(CommandOutput::ok(""))
            }
            None => Ok(CommandOutput::ok("")),
        }
    }

    async fn close(&self) -> Result<()> {
        self.state().close_calls += 1;
        Ok(())
    }
}
