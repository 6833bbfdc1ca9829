//! Rule-based substitute for real process execution.
//!
//! Rules are matched against the invocation's command line in registration
//! order and the first match wins. An invocation that matches no rule is an
//! error: module behaviour under test must be fully described by its rules.

use std::sync::Mutex;
use std::time::Instant;

use regex::Regex;
use tracing::warn;

use super::Executor;
use super::types::{ExecError, ExecResult, Invocation};

/// A canned response for commands matching `pattern`.
#[derive(Debug, Clone)]
pub struct MockRule {
  pattern: Regex,
  stdout: String,
  stderr: String,
  exit_code: i32,
}

impl MockRule {
  /// Create a rule that succeeds with empty output.
  pub fn new(pattern: &str) -> Result<Self, regex::Error> {
    Ok(Self {
      pattern: Regex::new(pattern)?,
      stdout: String::new(),
      stderr: String::new(),
      exit_code: 0,
    })
  }

  pub fn with_stdout(mut self, stdout: &str) -> Self {
    self.stdout = stdout.to_string();
    self
  }

  pub fn with_stderr(mut self, stderr: &str) -> Self {
    self.stderr = stderr.to_string();
    self
  }

  pub fn with_exit_code(mut self, exit_code: i32) -> Self {
    self.exit_code = exit_code;
    self
  }

  pub fn pattern(&self) -> &str {
    self.pattern.as_str()
  }

  fn matches(&self, command_line: &str) -> bool {
    self.pattern.is_match(command_line)
  }
}

/// Executor that answers invocations from an ordered rule list.
#[derive(Debug, Default)]
pub struct MockExecutor {
  rules: Vec<MockRule>,
  invocations: Mutex<Vec<Invocation>>,
  unmatched: Mutex<Vec<String>>,
}

impl MockExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_rule(mut self, rule: MockRule) -> Self {
    self.rules.push(rule);
    self
  }

  pub fn with_rules(mut self, rules: impl IntoIterator<Item = MockRule>) -> Self {
    self.rules.extend(rules);
    self
  }

  /// Every invocation received, matched or not, in order.
  pub fn invocations(&self) -> Vec<Invocation> {
    self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
  }

  /// Command lines that matched no rule.
  pub fn unmatched(&self) -> Vec<String> {
    self.unmatched.lock().map(|v| v.clone()).unwrap_or_default()
  }

  /// Whether a command with exactly this command line was received.
  pub fn command_executed(&self, command: &str) -> bool {
    self.invocations().iter().any(|inv| inv.command_line() == command)
  }

  /// Number of received invocations whose command line matches `pattern`.
  pub fn count_matching(&self, pattern: &str) -> usize {
    let Ok(re) = Regex::new(pattern) else {
      return 0;
    };
    self
      .invocations()
      .iter()
      .filter(|inv| re.is_match(&inv.command_line()))
      .count()
  }
}

impl Executor for MockExecutor {
  fn execute(&self, invocation: &Invocation) -> Result<ExecResult, ExecError> {
    let started = Instant::now();
    let command_line = invocation.command_line();

    if let Ok(mut invocations) = self.invocations.lock() {
      invocations.push(invocation.clone());
    }

    let Some(rule) = self.rules.iter().find(|rule| rule.matches(&command_line)) else {
      warn!(cmd = %command_line, "no mock rule matches command");
      if let Ok(mut unmatched) = self.unmatched.lock() {
        unmatched.push(command_line.clone());
      }
      return Err(ExecError::Unmatched { command: command_line });
    };

    Ok(ExecResult {
      command: command_line,
      stdout: rule.stdout.clone(),
      stderr: rule.stderr.clone(),
      exit_code: rule.exit_code,
      duration: started.elapsed(),
    })
  }
}
