//! Predicate definitions for success criteria, checkpoints and gate checks.
//!
//! A `Predicate` describes *what* to check; a [`super::PredicateEvaluator`] decides
//! *how* to observe it. Matching a command's output against an `Expectation` is pure
//! and lives here so every evaluator shares the same rules.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A checkable condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Run a shell command and match its result.
    Command {
        run: String,
        #[serde(default)]
        expect: Expectation,
    },
    /// A path exists (relative paths resolve against the working directory).
    FileExists { path: PathBuf },
    /// A file exists and its content contains `text`.
    FileContains { path: PathBuf, text: String },
    /// Constant result. Used for attested/manual checks.
    Always {
        #[serde(default = "default_pass")]
        pass: bool,
    },
}

fn default_pass() -> bool {
    true
}

impl Predicate {
    /// Shorthand for a command that must exit 0.
    pub fn command(run: impl Into<String>) -> Self {
        Predicate::Command {
            run: run.into(),
            expect: Expectation::default(),
        }
    }

    /// Shorthand for a command whose stdout must contain `text`.
    pub fn command_contains(run: impl Into<String>, text: impl Into<String>) -> Self {
        Predicate::Command {
            run: run.into(),
            expect: Expectation::Contains { text: text.into() },
        }
    }

    /// Human-readable statement of what a passing observation looks like.
    pub fn expected(&self) -> String {
        match self {
            Predicate::Command { run, expect } => format!("`{}` {}", run, expect.describe()),
            Predicate::FileExists { path } => format!("{} exists", path.display()),
            Predicate::FileContains { path, text } => {
                format!("{} contains {:?}", path.display(), text)
            }
            Predicate::Always { pass } => {
                if *pass {
                    "always passes".to_string()
                } else {
                    "always fails".to_string()
                }
            }
        }
    }

    /// Static validation run when a plan is accepted.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::Command { run, expect } => {
                if run.trim().is_empty() {
                    return Err("command predicate has an empty command".to_string());
                }
                expect.validate()
            }
            Predicate::FileContains { text, .. } if text.is_empty() => {
                Err("file_contains predicate has empty text".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// How a command's result is judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Exit status equals `code`.
    ExitCode {
        #[serde(default)]
        code: i32,
    },
    /// Exit 0 and stdout contains `text`.
    Contains { text: String },
    /// Exit 0 and stdout matches the regex `pattern`.
    Matches { pattern: String },
    /// Exit 0, stdout parses as JSON and the value at `pointer` equals `equals`.
    JsonField {
        pointer: String,
        equals: serde_json::Value,
    },
}

impl Default for Expectation {
    fn default() -> Self {
        Expectation::ExitCode { code: 0 }
    }
}

/// Raw result of running a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of checking a single predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub passed: bool,
    pub observed: String,
    pub expected: String,
}

impl Check {
    pub fn pass(observed: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            passed: true,
            observed: observed.into(),
            expected: expected.into(),
        }
    }

    pub fn fail(observed: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            passed: false,
            observed: observed.into(),
            expected: expected.into(),
        }
    }
}

/// Longest observed excerpt kept in results and the audit log.
const OBSERVED_LIMIT: usize = 400;

pub(crate) fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= OBSERVED_LIMIT {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(OBSERVED_LIMIT).collect();
    format!("{}…", cut)
}

impl Expectation {
    pub fn describe(&self) -> String {
        match self {
            Expectation::ExitCode { code } => format!("exits with {}", code),
            Expectation::Contains { text } => format!("prints {:?}", text),
            Expectation::Matches { pattern } => format!("output matches /{}/", pattern),
            Expectation::JsonField { pointer, equals } => {
                format!("JSON output has {} == {}", pointer, equals)
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Expectation::Matches { pattern } => regex::Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid pattern /{}/: {}", pattern, e)),
            Expectation::JsonField { pointer, .. }
                if !pointer.is_empty() && !pointer.starts_with('/') =>
            {
                Err(format!("JSON pointer {:?} must start with '/'", pointer))
            }
            _ => Ok(()),
        }
    }

    /// Judge a finished command against this expectation.
    pub fn assess(&self, output: &CommandOutput) -> Check {
        let expected = self.describe();
        let status = match output.exit_code {
            Some(code) => format!("exit {}", code),
            None => "killed by signal".to_string(),
        };

        match self {
            Expectation::ExitCode { code } => {
                let observed = if output.stderr.trim().is_empty() {
                    status
                } else {
                    format!("{}: {}", status, excerpt(&output.stderr))
                };
                if output.exit_code == Some(*code) {
                    Check::pass(observed, expected)
                } else {
                    Check::fail(observed, expected)
                }
            }
            _ if output.exit_code != Some(0) => {
                let detail = if output.stderr.trim().is_empty() {
                    excerpt(&output.stdout)
                } else {
                    excerpt(&output.stderr)
                };
                Check::fail(format!("{}: {}", status, detail), expected)
            }
            Expectation::Contains { text } => {
                if output.stdout.contains(text.as_str()) {
                    Check::pass(excerpt(&output.stdout), expected)
                } else {
                    Check::fail(excerpt(&output.stdout), expected)
                }
            }
            Expectation::Matches { pattern } => match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(&output.stdout) => {
                    Check::pass(excerpt(&output.stdout), expected)
                }
                Ok(_) => Check::fail(excerpt(&output.stdout), expected),
                Err(e) => Check::fail(format!("invalid pattern: {}", e), expected),
            },
            Expectation::JsonField { pointer, equals } => {
                match serde_json::from_str::<serde_json::Value>(output.stdout.trim()) {
                    Ok(value) => match value.pointer(pointer) {
                        Some(found) if found == equals => {
                            Check::pass(format!("{} = {}", pointer, found), expected)
                        }
                        Some(found) => Check::fail(format!("{} = {}", pointer, found), expected),
                        None => Check::fail(format!("{} missing", pointer), expected),
                    },
                    Err(e) => Check::fail(format!("stdout is not JSON: {}", e), expected),
                }
            }
        }
    }
}
