//! Bounded operator confirmation.

use async_trait::async_trait;
use std::future::Future;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::oneshot;

/// Conventional exit status for a run stopped by SIGINT
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// How a confirmation wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    /// Operator pressed Enter
    Continued,
    /// Nobody answered in time
    TimedOut,
    /// Ctrl-C during the wait
    Interrupted,
}

#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm(&self, message: &str, wait: Duration) -> PromptAnswer;
}

/// Prompt on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl OperatorPrompt for TerminalPrompt {
    async fn confirm(&self, message: &str, wait: Duration) -> PromptAnswer {
        tracing::warn!("{}", message);
        eprintln!(
            "Press Enter to continue now, Ctrl-C to abort; continuing automatically in {}s...",
            wait.as_secs()
        );

        // Detached so a pending read never holds the process open
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            let _ = tx.send(());
        });

        let answer = tokio::select! {
            _ = rx => PromptAnswer::Continued,
            _ = tokio::time::sleep(wait) => PromptAnswer::TimedOut,
            _ = tokio::signal::ctrl_c() => PromptAnswer::Interrupted,
        };
        tracing::debug!(answer = ?answer, "Confirmation wait finished");

        // The SIGINT listener above stays installed for the rest of the
        // process, so a later Ctrl-C has to end the run explicitly.
        if answer != PromptAnswer::Interrupted {
            tokio::spawn(async {
                if let Some(code) = exit_code_on_interrupt(tokio::signal::ctrl_c()).await {
                    std::process::exit(code);
                }
            });
        }
        answer
    }
}

/// Waits for `interrupt`; `Some(exit code)` once it fires, `None` if the
/// listener could not be installed.
pub async fn exit_code_on_interrupt<S>(interrupt: S) -> Option<i32>
where
    S: Future<Output = std::io::Result<()>>,
{
    match interrupt.await {
        Ok(()) => {
            tracing::error!("Interrupted; stopping. The host is left as of the last completed step");
            Some(INTERRUPTED_EXIT_CODE)
        }
        Err(e) => {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_later_interrupt_ends_the_run() {
        let code = exit_code_on_interrupt(std::future::ready(Ok(()))).await;
        assert_eq!(code, Some(INTERRUPTED_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_missing_signal_listener_does_not_exit() {
        let failed = std::future::ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal driver")));
        assert_eq!(exit_code_on_interrupt(failed).await, None);
    }
}
