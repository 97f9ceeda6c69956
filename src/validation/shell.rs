//! Default predicate evaluator backed by the local shell and filesystem.

use super::PredicateEvaluator;
use super::predicate::{Check, CommandOutput, Predicate, excerpt};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Runs command predicates through `<shell> -c` and checks file predicates on disk.
pub struct ShellEvaluator {
    working_dir: PathBuf,
    shell: String,
    command_timeout: Duration,
}

impl ShellEvaluator {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            shell: "sh".to_string(),
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    async fn run_command(&self, run: &str) -> Result<CommandOutput, String> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(run)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn `{}`: {}", run, e))?;

        let output = match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| format!("failed to wait for `{}`: {}", run, e))?,
            Err(_) => {
                return Err(format!(
                    "timed out after {}s",
                    self.command_timeout.as_secs()
                ));
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl PredicateEvaluator for ShellEvaluator {
    async fn evaluate(&self, predicate: &Predicate) -> Check {
        let expected = predicate.expected();
        match predicate {
            Predicate::Command { run, expect } => match self.run_command(run).await {
                Ok(output) => {
                    tracing::debug!(command = %run, exit = ?output.exit_code, "predicate command finished");
                    expect.assess(&output)
                }
                Err(message) => {
                    tracing::warn!(command = %run, %message, "predicate command did not run");
                    Check::fail(message, expected)
                }
            },
            Predicate::FileExists { path } => {
                let full = self.resolve(path);
                match tokio::fs::try_exists(&full).await {
                    Ok(true) => Check::pass(format!("{} exists", full.display()), expected),
                    Ok(false) => Check::fail(format!("{} not found", full.display()), expected),
                    Err(e) => Check::fail(format!("{}: {}", full.display(), e), expected),
                }
            }
            Predicate::FileContains { path, text } => {
                let full = self.resolve(path);
                match tokio::fs::read_to_string(&full).await {
                    Ok(content) if content.contains(text.as_str()) => {
                        Check::pass(format!("{} contains match", full.display()), expected)
                    }
                    Ok(content) => Check::fail(excerpt(&content), expected),
                    Err(e) => Check::fail(format!("{}: {}", full.display(), e), expected),
                }
            }
            Predicate::Always { pass } => {
                if *pass {
                    Check::pass("constant pass", expected)
                } else {
                    Check::fail("constant fail", expected)
                }
            }
        }
    }
}
