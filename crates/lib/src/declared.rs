//! Data-defined build modules.
//!
//! A declared module describes detection, its contract, one layer and a list
//! of commands in JSON, so the engine can be driven without compiled-in
//! language logic.
//!
//! ```json
//! {
//!   "modules": [
//!     {
//!       "name": "nodejs-npm",
//!       "detect": { "files": ["package.json"] },
//!       "provides": [{ "name": "web-process" }],
//!       "layer": {
//!         "name": "node_modules",
//!         "flags": { "cache": true, "launch": true },
//!         "key_files": ["package.json", "package-lock.json"]
//!       },
//!       "commands": [{ "program": "npm", "args": ["ci"], "args_env": "NPM_ARGS" }],
//!       "env": [{ "name": "NODE_PATH", "op": "prepend", "value": "{layer}", "delimiter": ":" }],
//!       "processes": [{ "type": "web", "command": "npm", "args": ["start"], "default": true }]
//!     }
//!   ]
//! }
//! ```
//!
//! Commands run with `STACKPACK_LAYER_DIR` set to the layer directory and are
//! skipped entirely on a cache hit. `{layer}` in env values expands to the
//! layer directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::BuildContext;
use crate::environment::{EnvEntry, EnvOverlay};
use crate::exec::ExecOptions;
use crate::layer::LayerFlags;
use crate::lifecycle::{BuildModule, BuildOutcome, ModuleError, Process};
use crate::overrides::{buildable, target_platform};
use crate::plan::{Contract, DetectResult, ModulePlan, Provide, Require};
use crate::types::Metadata;
use crate::util::hash::{hash_app_files, hash_serializable};

/// Variable naming the layer directory for declared commands.
pub const LAYER_DIR_ENV: &str = "STACKPACK_LAYER_DIR";

const LAYER_PLACEHOLDER: &str = "{layer}";

#[derive(Debug, Error)]
pub enum DeclaredError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse module definitions: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("invalid module definition {module:?}: {reason}")]
  Invalid { module: String, reason: String },
}

/// What an explicit buildable override does to detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildablePolicy {
  /// The override is irrelevant; detection uses files only.
  #[default]
  Ignore,
  /// Pass whenever the override is set, whatever the files say.
  Pass,
  /// Skip whenever the override is set, whatever the files say.
  Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectSpec {
  /// Pass if any of these files exists in the application root.
  #[serde(default)]
  pub files: Vec<String>,
  /// Only pass when building for this target platform.
  #[serde(default)]
  pub platform: Option<String>,
  #[serde(default)]
  pub buildable: BuildablePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerSpec {
  pub name: String,
  pub flags: LayerFlags,
  /// Application files whose contents decide cache reuse.
  #[serde(default)]
  pub key_files: Vec<String>,
  #[serde(default)]
  pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
  pub program: String,
  #[serde(default)]
  pub args: Vec<String>,
  /// Working directory relative to the application root.
  #[serde(default)]
  pub cwd: Option<String>,
  /// Variable whose whitespace separated value replaces `args` when set.
  #[serde(default)]
  pub args_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredModule {
  pub name: String,
  #[serde(default)]
  pub detect: DetectSpec,
  #[serde(default)]
  pub provides: Vec<Provide>,
  #[serde(default)]
  pub requires: Vec<Require>,
  #[serde(default)]
  pub layer: Option<LayerSpec>,
  #[serde(default)]
  pub commands: Vec<CommandSpec>,
  #[serde(default)]
  pub env: Vec<EnvEntry>,
  #[serde(default)]
  pub processes: Vec<Process>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclaredFile {
  modules: Vec<DeclaredModule>,
}

/// Parse and validate module definitions.
pub fn parse_modules(json: &str) -> Result<Vec<DeclaredModule>, DeclaredError> {
  let file: DeclaredFile = serde_json::from_str(json)?;

  let mut names = BTreeSet::new();
  for module in &file.modules {
    module.validate()?;
    if !names.insert(module.name.as_str()) {
      return Err(DeclaredError::Invalid {
        module: module.name.clone(),
        reason: "defined more than once".to_string(),
      });
    }
  }
  Ok(file.modules)
}

/// Read module definitions from a JSON file.
pub fn load_modules(path: &Path) -> Result<Vec<DeclaredModule>, DeclaredError> {
  let content = fs::read_to_string(path).map_err(|source| DeclaredError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  parse_modules(&content)
}

impl DeclaredModule {
  fn validate(&self) -> Result<(), DeclaredError> {
    let invalid = |reason: &str| DeclaredError::Invalid {
      module: self.name.clone(),
      reason: reason.to_string(),
    };

    if self.name.trim().is_empty() {
      return Err(invalid("name is empty"));
    }
    if let Some(layer) = &self.layer
      && layer.flags.is_empty()
    {
      return Err(invalid("layer needs at least one of build, cache, launch"));
    }
    if self.layer.is_none() && self.env.iter().any(|e| e.value.contains(LAYER_PLACEHOLDER)) {
      return Err(invalid("env refers to {layer} but no layer is declared"));
    }
    Ok(())
  }

  fn contract(&self) -> Contract {
    Contract {
      provides: self.provides.clone(),
      requires: self.requires.clone(),
    }
  }

  fn command_args(&self, ctx: &BuildContext, command: &CommandSpec) -> Vec<String> {
    if let Some(var) = &command.args_env
      && let Some(value) = ctx.env_var(var)
      && !value.trim().is_empty()
    {
      debug!(module = %self.name, var = %var, "using arguments from environment");
      return value.split_whitespace().map(str::to_string).collect();
    }
    command.args.clone()
  }

  fn run_commands(&self, ctx: &BuildContext, layer_dir: Option<&Path>) -> Result<(), ModuleError> {
    for command in &self.commands {
      let args = self.command_args(ctx, command);
      let args: Vec<&str> = args.iter().map(String::as_str).collect();

      let mut options = ExecOptions::new();
      if let Some(cwd) = &command.cwd {
        options = options.with_cwd(cwd);
      }
      if let Some(dir) = layer_dir {
        options = options.with_env(LAYER_DIR_ENV, &dir.to_string_lossy());
      }

      ctx
        .exec(&command.program, &args, options)
        .map_err(|err| ModuleError::exec(format!("{} failed", command.program), err))?;
    }
    Ok(())
  }
}

impl BuildModule for DeclaredModule {
  fn name(&self) -> &str {
    &self.name
  }

  fn detect(&self, ctx: &BuildContext) -> Result<DetectResult, ModuleError> {
    if let Some(target) = &buildable(ctx)? {
      match self.detect.buildable {
        BuildablePolicy::Pass => return Ok(DetectResult::Pass(self.contract())),
        BuildablePolicy::Skip => return Ok(DetectResult::skip(format!("buildable override set to {target}"))),
        BuildablePolicy::Ignore => {}
      }
    }

    if let Some(wanted) = &self.detect.platform
      && target_platform(ctx).as_deref() != Some(wanted.as_str())
    {
      return Ok(DetectResult::skip(format!("target platform is not {wanted}")));
    }

    if !self.detect.files.is_empty() {
      let files: Vec<&str> = self.detect.files.iter().map(String::as_str).collect();
      if !ctx.any_file_exists(&files) {
        return Ok(DetectResult::skip(format!("none of {} found", files.join(", "))));
      }
    }

    Ok(DetectResult::Pass(self.contract()))
  }

  fn build(&self, ctx: &mut BuildContext, _plan: &ModulePlan) -> Result<BuildOutcome, ModuleError> {
    let mut env = EnvOverlay::new();

    let layer_dir = match &self.layer {
      Some(spec) => {
        let layer = ctx.layer(&spec.name, spec.flags)?;

        let mut cached = false;
        if !spec.key_files.is_empty() {
          let files: Vec<&str> = spec.key_files.iter().map(String::as_str).collect();
          let files_hash = hash_app_files(ctx.app_root(), &files)?;
          let commands: Vec<(&str, Vec<String>, Option<&str>)> = self
            .commands
            .iter()
            .map(|c| (c.program.as_str(), self.command_args(ctx, c), c.cwd.as_deref()))
            .collect();
          let key = hash_serializable(&(files_hash.0, commands))?;
          ctx.set_cache_key(&layer, &key.0)?;
          cached = ctx.is_cache_hit(&layer);
        }

        if cached {
          info!(module = %self.name, layer = %spec.name, "reusing cached layer, skipping commands");
        } else {
          self.run_commands(ctx, Some(layer.path()))?;
          ctx.write_metadata(&layer, spec.metadata.clone())?;
        }
        Some(layer.path().to_string_lossy().to_string())
      }
      None => {
        self.run_commands(ctx, None)?;
        None
      }
    };

    for entry in &self.env {
      let mut entry = entry.clone();
      if let Some(dir) = &layer_dir {
        entry.value = entry.value.replace(LAYER_PLACEHOLDER, dir);
      }
      env.push(entry);
    }

    Ok(BuildOutcome {
      env,
      processes: self.processes.clone(),
    })
  }
}
