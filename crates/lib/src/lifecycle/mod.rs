//! Build orchestration.
//!
//! A [`Lifecycle`] holds an explicit, ordered registry of [`BuildModule`]s.
//! [`Lifecycle::detect`] runs every module's detect step and resolves the
//! plan; [`Lifecycle::build`] then runs the active modules' build steps in
//! plan order, stopping at the first failure.
//!
//! A failed build leaves every layer written so far on disk. The next build
//! reuses whatever the cache keys still vouch for.

mod types;

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::consts::{ENV_DISABLE_MODULES, MANIFEST_FILENAME};
use crate::context::BuildContext;
use crate::environment::EnvOverlay;
use crate::plan::{DetectResult, Detection, PlatformConfig, resolve};
use crate::util::fs::write_json_atomic;

pub use types::*;

/// Ordered module registry plus the platform's requirements.
pub struct Lifecycle {
  modules: Vec<Box<dyn BuildModule>>,
  platform: PlatformConfig,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new(PlatformConfig::default())
  }
}

impl Lifecycle {
  pub fn new(platform: PlatformConfig) -> Self {
    Self {
      modules: Vec::new(),
      platform,
    }
  }

  /// Append a module. Registration order is build order.
  pub fn register<M: BuildModule + 'static>(&mut self, module: M) -> &mut Self {
    self.modules.push(Box::new(module));
    self
  }

  pub fn register_boxed(&mut self, module: Box<dyn BuildModule>) -> &mut Self {
    self.modules.push(module);
    self
  }

  pub fn module_names(&self) -> Vec<&str> {
    self.modules.iter().map(|m| m.name()).collect()
  }

  pub fn platform(&self) -> &PlatformConfig {
    &self.platform
  }

  /// Platform config with the operator overrides of this context applied.
  fn effective_platform(&self, ctx: &BuildContext) -> PlatformConfig {
    let mut platform = self.platform.clone();
    platform.apply_env(ctx.env_snapshot());
    platform
  }

  /// Run every module's detect step and resolve the build plan.
  ///
  /// The first detect error aborts; no plan is produced.
  pub fn detect(&self, ctx: &mut BuildContext) -> Result<DetectReport, LifecycleError> {
    let platform = self.effective_platform(ctx);
    let mut detections = Vec::with_capacity(self.modules.len());

    for module in &self.modules {
      let name = module.name();
      if platform.is_disabled(name) {
        info!(module = %name, "module disabled, skipping detect");
        detections.push(Detection::new(
          name,
          DetectResult::skip(format!("disabled by {}", ENV_DISABLE_MODULES)),
        ));
        continue;
      }

      ctx.enter_module(name);
      let mark = ctx.exec_log().len();
      let result = module.detect(ctx);
      ctx.leave_module();

      match result {
        Ok(result) => {
          match &result {
            DetectResult::Pass(contract) => info!(
              module = %name,
              provides = contract.provides.len(),
              requires = contract.requires.len(),
              "detect passed"
            ),
            DetectResult::Skip { reason } => info!(module = %name, reason = %reason, "detect skipped"),
          }
          detections.push(Detection::new(name, result));
        }
        Err(err) => {
          let stderr_tail = err
            .stderr_tail()
            .map(str::to_string)
            .or_else(|| last_stderr_tail(ctx, mark));
          return Err(LifecycleError::Detection {
            module: name.to_string(),
            phase: Phase::Detect,
            message: err.describe(),
            stderr_tail,
          });
        }
      }
    }

    let resolution = resolve(&detections, &platform)?;
    for warning in &resolution.warnings {
      warn!(warning = %warning, "build plan warning");
    }
    info!(modules = ?resolution.plan.order(), "build plan resolved");

    Ok(DetectReport {
      detections,
      plan: resolution.plan,
      warnings: resolution.warnings,
    })
  }

  /// Detect, then build every active module in plan order.
  ///
  /// On success the layers of modules outside the plan are removed and the
  /// manifest is written atomically to `<layers_root>/manifest.json`.
  pub fn build(&self, ctx: &mut BuildContext) -> Result<BuildReport, LifecycleError> {
    let detect = self.detect(ctx)?;

    let mut built = Vec::new();
    let mut env = EnvOverlay::new();
    let mut processes: Vec<Process> = Vec::new();

    for (name, plan) in detect.plan.iter() {
      let Some(module) = self.modules.iter().find(|m| m.name() == name) else {
        continue;
      };

      info!(module = %name, "building");
      ctx.enter_module(name);
      let mark = ctx.exec_log().len();
      let result = module.build(ctx, plan);
      ctx.leave_module();

      let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
          let stderr_tail = err
            .stderr_tail()
            .map(str::to_string)
            .or_else(|| last_stderr_tail(ctx, mark));
          warn!(module = %name, error = %err.describe(), "build failed, leaving layers in place");
          return Err(LifecycleError::Build {
            module: name.to_string(),
            phase: Phase::Build,
            message: err.describe(),
            stderr_tail,
          });
        }
      };

      ctx.layers_mut().commit_module(name)?;
      ctx.push_overlay(&outcome.env);
      env.extend(&outcome.env);
      for process in outcome.processes {
        merge_process(&mut processes, process);
      }

      debug!(module = %name, env_entries = outcome.env.len(), "module built");
      built.push(name.to_string());
    }

    let active: BTreeSet<String> = built.iter().cloned().collect();
    let layers = ctx.layers_mut().finalize(&active)?;

    let manifest = BuildManifest {
      modules: built,
      layers,
      env,
      processes,
    };
    let manifest_path = ctx.layers_root().join(MANIFEST_FILENAME);
    write_json_atomic(&manifest_path, &manifest).map_err(|source| LifecycleError::Manifest {
      path: manifest_path.clone(),
      source,
    })?;
    info!(path = %manifest_path.display(), layers = manifest.layers.len(), "build complete");

    Ok(BuildReport {
      detect,
      manifest,
      manifest_path,
    })
  }
}

/// Stderr tail of the last command run since `mark`, if it wrote any.
fn last_stderr_tail(ctx: &BuildContext, mark: usize) -> Option<String> {
  ctx
    .exec_log()
    .last_since(mark)
    .map(|record| record.stderr_tail)
    .filter(|tail| !tail.is_empty())
}

/// A later module's process replaces an earlier one of the same type.
fn merge_process(processes: &mut Vec<Process>, process: Process) {
  if process.default {
    for existing in processes.iter_mut() {
      existing.default = false;
    }
  }
  match processes.iter_mut().find(|p| p.kind == process.kind) {
    Some(existing) => *existing = process,
    None => processes.push(process),
  }
}
