//! Real process execution.
//!
//! Runs commands with an explicit environment: the child's environment is
//! cleared and replaced with the invocation's map, so nothing from the
//! engine's own process leaks into a build step.

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::types::{ExecError, ExecResult, Invocation};
use super::Executor;

/// Executor that spawns real processes.
///
/// Each call blocks the caller until the child exits or its timeout elapses.
/// A timed out child is killed before the call returns.
///
/// Owns a private current-thread runtime, so it must not be called from
/// inside another tokio runtime.
pub struct ProcessExecutor {
  runtime: Runtime,
}

impl ProcessExecutor {
  pub fn new() -> Result<Self, ExecError> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(Self { runtime })
  }

  async fn run(invocation: &Invocation) -> Result<ExecResult, ExecError> {
    let command_line = invocation.command_line();
    let started = Instant::now();

    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .env_clear()
      .envs(&invocation.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    debug!(cmd = %command_line, cwd = ?invocation.cwd, "spawning process");

    let child = command.spawn().map_err(|source| ExecError::Spawn {
      command: command_line.clone(),
      source,
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match invocation.timeout {
      Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
          return Err(ExecError::Timeout {
            command: command_line,
            timeout: limit,
          });
        }
      },
      None => child.wait_with_output().await?,
    };

    Ok(ExecResult {
      command: command_line,
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      exit_code: output.status.code().unwrap_or(-1),
      duration: started.elapsed(),
    })
  }
}

impl Executor for ProcessExecutor {
  fn execute(&self, invocation: &Invocation) -> Result<ExecResult, ExecError> {
    self.runtime.block_on(Self::run(invocation))
  }
}
