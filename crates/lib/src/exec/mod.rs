//! Execution abstraction for external tools.
//!
//! Build modules never spawn processes directly. They go through [`Exec`],
//! which delegates to a backend implementing [`Executor`]:
//!
//! - [`ProcessExecutor`] spawns real processes
//! - [`MockExecutor`] answers from an ordered list of [`MockRule`]s
//!
//! The backend is chosen by whoever builds the context. The failure policy
//! (non-zero exit -> [`ExecError::Failed`]) and the diagnostic [`ExecLog`] live
//! in [`Exec`], so both backends behave identically from a module's view.

mod mock;
mod process;
mod types;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::consts::STDERR_TAIL_LINES;

pub use mock::{MockExecutor, MockRule};
pub use process::ProcessExecutor;
pub use types::*;

/// Backend that turns an invocation into a result.
///
/// Implementations return `Ok` for any exit code; only failures to run the
/// process at all (spawn error, timeout, unmatched mock) are errors.
pub trait Executor: Send + Sync {
  fn execute(&self, invocation: &Invocation) -> Result<ExecResult, ExecError>;
}

/// Shared handle used by the context to run commands.
#[derive(Clone)]
pub struct Exec {
  backend: Arc<dyn Executor>,
  log: ExecLog,
}

impl std::fmt::Debug for Exec {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Exec").field("log_len", &self.log.len()).finish()
  }
}

impl Exec {
  pub fn new(backend: Arc<dyn Executor>) -> Self {
    Self {
      backend,
      log: ExecLog::new(),
    }
  }

  pub fn log(&self) -> &ExecLog {
    &self.log
  }

  /// Run one invocation, record it and apply the failure policy.
  pub fn run(&self, invocation: &Invocation, options: &ExecOptions) -> Result<ExecResult, ExecError> {
    let command_line = invocation.command_line();
    info!(cmd = %command_line, "running command");

    let started = Instant::now();
    let outcome = self.backend.execute(invocation);
    let duration = started.elapsed();

    let record = match &outcome {
      Ok(result) => ExecRecord {
        command: command_line.clone(),
        duration,
        outcome: ExecOutcome::Exited(result.exit_code),
        stderr_tail: result.stderr_tail(STDERR_TAIL_LINES),
      },
      Err(err) => ExecRecord {
        command: command_line.clone(),
        duration,
        outcome: match err {
          ExecError::Timeout { .. } => ExecOutcome::TimedOut,
          ExecError::Unmatched { .. } => ExecOutcome::Unmatched,
          _ => ExecOutcome::SpawnFailed,
        },
        stderr_tail: String::new(),
      },
    };
    self.log.push(record);

    let result = match outcome {
      Ok(result) => result,
      Err(err) => {
        if options.expect_failure {
          debug!(cmd = %command_line, error = %err, "command did not run");
        } else {
          error!(cmd = %command_line, error = %err, "command did not run");
        }
        return Err(err);
      }
    };

    debug!(
      cmd = %command_line,
      exit_code = result.exit_code,
      duration_ms = result.duration.as_millis() as u64,
      "command finished"
    );

    if result.success() || options.ignore_failure {
      if !result.success() {
        debug!(cmd = %command_line, exit_code = result.exit_code, "ignoring non-zero exit");
      }
      return Ok(result);
    }

    let stderr_tail = result.stderr_tail(STDERR_TAIL_LINES);
    if options.expect_failure {
      debug!(cmd = %command_line, exit_code = result.exit_code, "command failed as expected");
    } else {
      error!(cmd = %command_line, exit_code = result.exit_code, stderr = %stderr_tail, "command failed");
    }

    Err(ExecError::Failed {
      command: command_line,
      exit_code: result.exit_code,
      stderr_tail,
    })
  }
}
