mod build;
mod detect;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use stackpack_lib::context::{BuildContext, ContextBuilder};
use stackpack_lib::declared::load_modules;
use stackpack_lib::lifecycle::Lifecycle;
use stackpack_lib::plan::PlatformConfig;

pub use build::cmd_build;
pub use detect::cmd_detect;

/// Arguments shared by every command that runs modules.
#[derive(Debug, Args)]
pub struct ModuleArgs {
  /// Application source directory
  #[arg(long, default_value = ".")]
  pub app: PathBuf,

  /// Directory holding layers across builds
  #[arg(long, default_value = ".stackpack/layers")]
  pub layers: PathBuf,

  /// JSON file with module definitions
  #[arg(long)]
  pub modules: PathBuf,

  /// Names the platform requires (default: web-process)
  #[arg(long = "root")]
  pub roots: Vec<String>,
}

impl ModuleArgs {
  fn platform(&self) -> PlatformConfig {
    if self.roots.is_empty() {
      return PlatformConfig::default();
    }
    PlatformConfig {
      roots: self.roots.clone(),
      ..PlatformConfig::default()
    }
  }

  /// Load the declared modules and create the context for one invocation.
  pub fn load(&self) -> Result<(Lifecycle, BuildContext)> {
    let modules = load_modules(&self.modules)
      .with_context(|| format!("Failed to load modules from {}", self.modules.display()))?;

    debug!(count = modules.len(), path = %self.modules.display(), "loaded module definitions");

    let mut lifecycle = Lifecycle::new(self.platform());
    for module in modules {
      lifecycle.register(module);
    }

    let ctx = ContextBuilder::new(&self.app, &self.layers)
      .inherit_process_env()
      .build()
      .context("Failed to create build context")?;

    Ok((lifecycle, ctx))
  }
}
