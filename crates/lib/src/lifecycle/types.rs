//! Module trait, build outcomes, errors and the build manifest.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::BuildContext;
use crate::environment::EnvOverlay;
use crate::exec::ExecError;
use crate::layer::{LayerError, RetainedLayer};
use crate::overrides::OverrideError;
use crate::plan::{BuildPlan, DetectResult, Detection, ModulePlan, PlanError, PlanWarning};
use crate::util::hash::HashError;

/// A unit of build logic that participates in the lifecycle.
///
/// Detect must not write layers; build runs only when the module is part of
/// the resolved plan.
pub trait BuildModule {
  fn name(&self) -> &str;

  fn detect(&self, ctx: &BuildContext) -> Result<DetectResult, ModuleError>;

  fn build(&self, ctx: &mut BuildContext, plan: &ModulePlan) -> Result<BuildOutcome, ModuleError>;
}

/// A launch command of the final image, keyed by type (e.g. `web`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
  #[serde(rename = "type")]
  pub kind: String,
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub default: bool,
}

impl Process {
  pub fn new(kind: &str, command: &str) -> Self {
    Self {
      kind: kind.to_string(),
      command: command.to_string(),
      args: Vec::new(),
      default: false,
    }
  }

  pub fn with_args(mut self, args: &[&str]) -> Self {
    self.args = args.iter().map(|a| a.to_string()).collect();
    self
  }

  pub fn as_default(mut self) -> Self {
    self.default = true;
    self
  }
}

/// What a successful build step contributes besides its layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutcome {
  pub env: EnvOverlay,
  pub processes: Vec<Process>,
}

impl BuildOutcome {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_env(mut self, env: EnvOverlay) -> Self {
    self.env = env;
    self
  }

  pub fn with_process(mut self, process: Process) -> Self {
    self.processes.push(process);
    self
  }
}

/// Failure reported by a module's detect or build step.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ModuleError {
  message: String,
  #[source]
  source: Option<ExecError>,
}

impl ModuleError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      source: None,
    }
  }

  /// Failure caused by an external command. `message` is context only; the
  /// command's own error stays in the source chain.
  pub fn exec(message: impl Into<String>, source: ExecError) -> Self {
    Self {
      message: message.into(),
      source: Some(source),
    }
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// The message followed by the command error, for reports that do not
  /// carry the source chain.
  pub fn describe(&self) -> String {
    match &self.source {
      Some(source) => format!("{}: {}", self.message, source),
      None => self.message.clone(),
    }
  }

  /// Stderr tail of the failed command, if the failure came from one.
  pub fn stderr_tail(&self) -> Option<&str> {
    self.source.as_ref().and_then(ExecError::stderr_tail)
  }
}

impl From<ExecError> for ModuleError {
  fn from(err: ExecError) -> Self {
    Self::exec("external command failed", err)
  }
}

macro_rules! module_error_from {
  ($($ty:ty),*) => {
    $(
      impl From<$ty> for ModuleError {
        fn from(err: $ty) -> Self {
          ModuleError::new(err.to_string())
        }
      }
    )*
  };
}

module_error_from!(LayerError, OverrideError, HashError, io::Error);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Detect,
  Build,
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Phase::Detect => write!(f, "detect"),
      Phase::Build => write!(f, "build"),
    }
  }
}

fn tail_suffix(tail: &Option<String>) -> String {
  match tail {
    Some(tail) if !tail.is_empty() => format!("\n--- stderr ---\n{}", tail),
    _ => String::new(),
  }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
  /// A module's detect step failed. No plan was produced.
  #[error("{module} failed during {phase}: {message}{}", tail_suffix(.stderr_tail))]
  Detection {
    module: String,
    phase: Phase,
    message: String,
    stderr_tail: Option<String>,
  },

  #[error("build plan: {0}")]
  Plan(#[from] PlanError),

  /// A module's build step failed. Layers written so far stay on disk.
  #[error("{module} failed during {phase}: {message}{}", tail_suffix(.stderr_tail))]
  Build {
    module: String,
    phase: Phase,
    message: String,
    stderr_tail: Option<String>,
  },

  #[error(transparent)]
  Layer(#[from] LayerError),

  #[error("failed to write manifest {path}: {source}")]
  Manifest {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl LifecycleError {
  /// Name of the module that failed, if the failure belongs to one.
  pub fn module(&self) -> Option<&str> {
    match self {
      LifecycleError::Detection { module, .. } | LifecycleError::Build { module, .. } => Some(module.as_str()),
      _ => None,
    }
  }

  pub fn stderr_tail(&self) -> Option<&str> {
    match self {
      LifecycleError::Detection { stderr_tail, .. } | LifecycleError::Build { stderr_tail, .. } => {
        stderr_tail.as_deref()
      }
      _ => None,
    }
  }
}

/// Persisted summary of a successful build, written to the layers root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
  /// Modules built, in build order.
  pub modules: Vec<String>,
  pub layers: Vec<RetainedLayer>,
  /// Combined environment export of all modules, in build order.
  pub env: EnvOverlay,
  pub processes: Vec<Process>,
}

impl BuildManifest {
  pub fn layer(&self, module: &str, name: &str) -> Option<&RetainedLayer> {
    self.layers.iter().find(|l| l.module == module && l.name == name)
  }

  pub fn process(&self, kind: &str) -> Option<&Process> {
    self.processes.iter().find(|p| p.kind == kind)
  }
}

/// Result of detection plus plan resolution.
#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
  pub detections: Vec<Detection>,
  pub plan: BuildPlan,
  pub warnings: Vec<PlanWarning>,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
  pub detect: DetectReport,
  pub manifest: BuildManifest,
  pub manifest_path: PathBuf,
}
