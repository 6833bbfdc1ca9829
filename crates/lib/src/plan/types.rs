//! Contracts exchanged during detection and the resolved build plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_ROOT_REQUIREMENT, ENV_DISABLE_MODULES, ENV_FORCE_MODULES};
use crate::overrides::parse_list;
use crate::types::Metadata;

/// Requester name used for requirements that come from the platform roots.
pub const PLATFORM_REQUESTER: &str = "platform";

/// A name a module can make available to others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provide {
  pub name: String,
  #[serde(default)]
  pub metadata: Metadata,
  /// Differing provisions of the same name are fatal instead of a warning.
  #[serde(default)]
  pub exclusive: bool,
}

impl Provide {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      metadata: Metadata::new(),
      exclusive: false,
    }
  }

  pub fn with_metadata(mut self, metadata: Metadata) -> Self {
    self.metadata = metadata;
    self
  }

  pub fn exclusive(mut self) -> Self {
    self.exclusive = true;
    self
  }
}

/// A name a module needs some module (possibly itself) to provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Require {
  pub name: String,
  #[serde(default)]
  pub metadata: Metadata,
}

impl Require {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      metadata: Metadata::new(),
    }
  }

  pub fn with_metadata(mut self, metadata: Metadata) -> Self {
    self.metadata = metadata;
    self
  }
}

/// What a passing module declares during detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
  #[serde(default)]
  pub provides: Vec<Provide>,
  #[serde(default)]
  pub requires: Vec<Require>,
}

impl Contract {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn provide(mut self, provide: Provide) -> Self {
    self.provides.push(provide);
    self
  }

  pub fn require(mut self, require: Require) -> Self {
    self.requires.push(require);
    self
  }
}

/// Outcome of a module's detect step. A detect step returning `Err` is the
/// third (fatal) outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum DetectResult {
  Pass(Contract),
  Skip { reason: String },
}

impl DetectResult {
  /// Pass, providing `provides` with no metadata and requiring nothing.
  pub fn pass_providing(provides: &[&str]) -> Self {
    DetectResult::Pass(Contract {
      provides: provides.iter().map(|name| Provide::new(name)).collect(),
      requires: Vec::new(),
    })
  }

  pub fn skip(reason: impl Into<String>) -> Self {
    DetectResult::Skip { reason: reason.into() }
  }

  pub fn is_pass(&self) -> bool {
    matches!(self, DetectResult::Pass(_))
  }

  pub fn contract(&self) -> Option<&Contract> {
    match self {
      DetectResult::Pass(contract) => Some(contract),
      DetectResult::Skip { .. } => None,
    }
  }
}

/// One module's detect outcome, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub module: String,
  pub result: DetectResult,
}

impl Detection {
  pub fn new(module: &str, result: DetectResult) -> Self {
    Self {
      module: module.to_string(),
      result,
    }
  }
}

/// What the platform itself requires of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
  /// Names that must be provided by some active module.
  pub roots: Vec<String>,
  /// Modules that are active whenever they pass detection.
  #[serde(default)]
  pub always: Vec<String>,
  /// Modules treated as skipped without running detect.
  #[serde(default)]
  pub disabled: Vec<String>,
}

impl Default for PlatformConfig {
  fn default() -> Self {
    Self {
      roots: vec![DEFAULT_ROOT_REQUIREMENT.to_string()],
      always: Vec::new(),
      disabled: Vec::new(),
    }
  }
}

impl PlatformConfig {
  pub fn with_roots(roots: &[&str]) -> Self {
    Self {
      roots: roots.iter().map(|r| r.to_string()).collect(),
      ..Self::default()
    }
  }

  /// Default config with the forced and disabled module lists read from an
  /// environment snapshot.
  pub fn from_env(env: &BTreeMap<String, String>) -> Self {
    let mut config = Self::default();
    config.apply_env(env);
    config
  }

  /// Merge operator overrides from an environment snapshot into this config.
  pub fn apply_env(&mut self, env: &BTreeMap<String, String>) {
    for (var, target) in [(ENV_FORCE_MODULES, &mut self.always), (ENV_DISABLE_MODULES, &mut self.disabled)] {
      if let Some(value) = env.get(var) {
        for name in parse_list(value) {
          if !target.contains(&name) {
            target.push(name);
          }
        }
      }
    }
  }

  pub fn is_always(&self, module: &str) -> bool {
    self.always.iter().any(|m| m == module)
  }

  pub fn is_disabled(&self, module: &str) -> bool {
    self.disabled.iter().any(|m| m == module)
  }
}

/// A requirement of one module, resolved to its canonical provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRequire {
  pub name: String,
  /// Metadata attached by the requiring module.
  pub metadata: Metadata,
  /// Module whose provision satisfies the requirement.
  pub provider: String,
  /// Metadata attached by the provider.
  pub provided: Metadata,
}

/// A request made against a provision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
  pub requester: String,
  pub metadata: Metadata,
}

/// A provision of one module that is part of the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvidedEntry {
  pub name: String,
  pub metadata: Metadata,
  /// False when another module registered earlier provides the same name.
  pub canonical: bool,
  pub requests: Vec<Request>,
}

/// The portion of the plan handed to one module's build step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModulePlan {
  pub requires: Vec<ResolvedRequire>,
  pub provides: Vec<ProvidedEntry>,
}

impl ModulePlan {
  pub fn require(&self, name: &str) -> Option<&ResolvedRequire> {
    self.requires.iter().find(|r| r.name == name)
  }

  pub fn provide(&self, name: &str) -> Option<&ProvidedEntry> {
    self.provides.iter().find(|p| p.name == name)
  }

  /// Whether anything requested `name` from this module.
  pub fn is_requested(&self, name: &str) -> bool {
    self.provide(name).is_some_and(|p| !p.requests.is_empty())
  }
}

/// Active modules in build order with their plan entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BuildPlan {
  modules: Vec<(String, ModulePlan)>,
}

impl BuildPlan {
  pub(crate) fn new(modules: Vec<(String, ModulePlan)>) -> Self {
    Self { modules }
  }

  /// Module names in build order.
  pub fn order(&self) -> Vec<&str> {
    self.modules.iter().map(|(m, _)| m.as_str()).collect()
  }

  pub fn get(&self, module: &str) -> Option<&ModulePlan> {
    self.modules.iter().find(|(m, _)| m == module).map(|(_, p)| p)
  }

  pub fn contains(&self, module: &str) -> bool {
    self.get(module).is_some()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ModulePlan)> {
    self.modules.iter().map(|(m, p)| (m.as_str(), p))
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }
}

/// Non-fatal findings from plan resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
  /// Two modules provide `name` with different metadata; `canonical` won.
  ConflictingProvision {
    name: String,
    canonical: String,
    other: String,
  },
  /// A module forced by the platform did not pass detection.
  ForcedModuleSkipped { module: String },
}

impl std::fmt::Display for PlanWarning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PlanWarning::ConflictingProvision { name, canonical, other } => write!(
        f,
        "{other} provides {name} with different metadata than {canonical}; using {canonical}"
      ),
      PlanWarning::ForcedModuleSkipped { module } => {
        write!(f, "module {module} is forced but did not pass detection")
      }
    }
  }
}

/// Resolved plan plus any warnings recorded on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
  pub plan: BuildPlan,
  pub warnings: Vec<PlanWarning>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
  #[error("module {0} is registered more than once")]
  DuplicateModule(String),

  #[error("conflicting exclusive provisions of {name}: {first} and {second}")]
  ExclusiveConflict { name: String, first: String, second: String },

  #[error("nothing provides {name} (required by {})", requested_by.join(", "))]
  Unsatisfied { name: String, requested_by: Vec<String> },

  #[error("requirement cycle between modules: {}", modules.join(" -> "))]
  Cycle { modules: Vec<String> },
}
