//! External Command Runner
//!
//! Every host tool (lspci, lsmod, package managers, dracut, the NVIDIA
//! installer, nvidia-smi) is reached through [`CommandRunner`] so the phase
//! logic can be driven by a scripted fake in tests.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ProvisionError, ProvisionResult};

/// Structured result of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `n` non-empty lines of stderr, or stdout when stderr is empty
    pub fn tail(&self, n: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// The seam between phase logic and the host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion and capture its output.
    /// Only a failure to launch is an `Err`; a non-zero exit is an `Ok` outcome.
    async fn run(&self, program: &str, args: &[String]) -> ProvisionResult<CommandOutcome>;
}

/// Runs commands on the real host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> ProvisionResult<CommandOutcome> {
        tracing::debug!(command = %command_line(program, args), "Running command");
        let started = std::time::Instant::now();

        let output = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let outcome = CommandOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            program = program,
            exit_code = ?outcome.exit_code,
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        Ok(outcome)
    }
}

/// Convenience for the common `&[&str]` call sites
pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub mod testing {
    //! Scripted fake runner for unit and phase tests.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Answers commands from a script keyed by the full command line.
    /// Unscripted commands succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: HashMap<String, CommandOutcome>,
        unlaunchable: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, command: &str, outcome: CommandOutcome) -> Self {
            self.responses.insert(command.to_string(), outcome);
            self
        }

        /// Make `program` fail to launch, as if it were not installed
        pub fn missing(mut self, program: &str) -> Self {
            self.unlaunchable.insert(program.to_string());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        pub fn ran(&self, prefix: &str) -> bool {
            self.calls().iter().any(|c| c.starts_with(prefix))
        }

        pub fn position(&self, prefix: &str) -> Option<usize> {
            self.calls().iter().position(|c| c.starts_with(prefix))
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> ProvisionResult<CommandOutcome> {
            let line = command_line(program, args);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(line.clone());
            }
            if self.unlaunchable.contains(program) {
                return Err(ProvisionError::Spawn {
                    program: program.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                });
            }
            Ok(self
                .responses
                .get(&line)
                .cloned()
                .unwrap_or_else(|| CommandOutcome::ok("")))
        }
    }
}
