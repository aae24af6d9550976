//! Interactive confirmation before destroying an existing VM.

use std::io::{self, BufRead, Write};
use std::thread;

use async_trait::async_trait;
use ramvm_proxmox::ConflictResolver;
use tokio::sync::oneshot;
use tracing::warn;

/// Asks on the terminal whether an existing VM may be replaced.
///
/// The answer is read on a detached thread so that the runtime keeps
/// polling the Ctrl+C handler while the operator is being asked.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl ConflictResolver for TerminalPrompt {
    async fn confirm_destroy(&self, vm_id: u32) -> bool {
        let (tx, rx) = oneshot::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut stderr = io::stderr();
            let answer = confirm_with(&mut stdin.lock(), &mut stderr, vm_id);
            let _ = tx.send(answer);
        });

        match rx.await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(error = %e, "Could not read confirmation, declining");
                false
            }
            Err(_) => {
                warn!("Confirmation reader exited without an answer, declining");
                false
            }
        }
    }
}

/// Write the question to `output` and read one answer line from `input`.
pub fn confirm_with<R: BufRead, W: Write>(input: &mut R, output: &mut W, vm_id: u32) -> io::Result<bool> {
    write!(output, "VM {vm_id} already exists. Destroy it and continue? (y/N) ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer_is_yes(&answer))
}

pub fn answer_is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
