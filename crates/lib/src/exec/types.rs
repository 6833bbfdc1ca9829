//! Types for external process execution.
//!
//! An [`Invocation`] is the fully resolved description of one external process
//! (program, arguments, working directory and the complete child environment).
//! Backends turn invocations into [`ExecResult`]s; the [`super::Exec`] façade
//! applies the failure policy from [`ExecOptions`] and records every call in an
//! [`ExecLog`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

/// One fully resolved external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  /// Working directory of the child.
  pub cwd: PathBuf,
  /// Complete child environment. Backends must not inherit anything else.
  pub env: BTreeMap<String, String>,
  /// Kill the child and fail if it runs longer than this.
  pub timeout: Option<Duration>,
}

impl Invocation {
  /// Render the invocation as a single command line (`program arg1 arg2`).
  ///
  /// This is the string mock rules are matched against and the string that
  /// appears in logs and diagnostics.
  pub fn command_line(&self) -> String {
    let mut line = self.program.clone();
    for arg in &self.args {
      line.push(' ');
      line.push_str(arg);
    }
    line
  }
}

/// Caller-controlled options for a single command.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
  /// Working directory override (defaults to the application root).
  pub cwd: Option<PathBuf>,
  /// Variables layered over the context's effective environment.
  pub env: BTreeMap<String, String>,
  /// Return the result instead of an error when the process exits non-zero.
  pub ignore_failure: bool,
  /// The command is expected to fail: suppress error-level logging.
  pub expect_failure: bool,
  pub timeout: Option<Duration>,
}

impl ExecOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
    self.cwd = Some(cwd.into());
    self
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }

  pub fn ignore_failure(mut self) -> Self {
    self.ignore_failure = true;
    self
  }

  /// Mark the command as expected to fail. Implies [`Self::ignore_failure`].
  pub fn expect_failure(mut self) -> Self {
    self.expect_failure = true;
    self.ignore_failure = true;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Captured outcome of one external process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
  /// The command line that produced this result.
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  /// Exit code, or -1 if the process was terminated by a signal.
  pub exit_code: i32,
  pub duration: Duration,
}

impl ExecResult {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }

  pub fn stdout_trimmed(&self) -> &str {
    self.stdout.trim()
  }

  /// The last `lines` lines of stderr, joined with newlines.
  pub fn stderr_tail(&self, lines: usize) -> String {
    tail_lines(&self.stderr, lines)
  }
}

/// Return the last `lines` non-trailing lines of `text`.
pub fn tail_lines(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.trim_end().lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}

/// Errors surfaced by command execution.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The process exited non-zero and the caller did not opt out.
  #[error("command failed with exit code {exit_code}: {command}")]
  Failed {
    command: String,
    exit_code: i32,
    stderr_tail: String,
  },

  /// The process exceeded its timeout and was killed.
  #[error("command timed out after {timeout:?}: {command}")]
  Timeout { command: String, timeout: Duration },

  /// The process could not be started.
  #[error("failed to start {command}: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  /// A mock executor received an invocation that no rule matches.
  #[error("no mock rule matches command: {command}")]
  Unmatched { command: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl ExecError {
  /// Captured stderr tail, if the process got far enough to produce one.
  pub fn stderr_tail(&self) -> Option<&str> {
    match self {
      ExecError::Failed { stderr_tail, .. } if !stderr_tail.is_empty() => Some(stderr_tail),
      _ => None,
    }
  }
}

/// How a recorded invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
  Exited(i32),
  TimedOut,
  SpawnFailed,
  Unmatched,
}

/// Diagnostic record of one invocation, kept regardless of success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
  pub command: String,
  pub duration: Duration,
  pub outcome: ExecOutcome,
  pub stderr_tail: String,
}

/// Append-only log of every invocation made during one lifecycle run.
///
/// Cloning shares the underlying log.
#[derive(Debug, Clone, Default)]
pub struct ExecLog(Arc<Mutex<Vec<ExecRecord>>>);

impl ExecLog {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<ExecRecord>> {
    // A panic while holding the lock cannot leave a half-pushed record.
    self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn push(&self, record: ExecRecord) {
    self.lock().push(record);
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  pub fn records(&self) -> Vec<ExecRecord> {
    self.lock().clone()
  }

  /// The most recent record at or after position `start`.
  pub fn last_since(&self, start: usize) -> Option<ExecRecord> {
    let records = self.lock();
    records.get(start..).and_then(|recent| recent.last().cloned())
  }

  /// Whether a command with exactly this command line was executed.
  pub fn command_executed(&self, command: &str) -> bool {
    self.lock().iter().any(|r| r.command == command)
  }
}
