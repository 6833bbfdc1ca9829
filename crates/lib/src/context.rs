//! Per-invocation build context.
//!
//! A [`BuildContext`] is created once per lifecycle invocation and handed to
//! every module's detect and build steps. It owns the application root, a
//! read-only snapshot of the environment, the environment overlay built up by
//! earlier modules, the execution handle and the layer manager.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::environment::EnvOverlay;
use crate::exec::{Exec, ExecError, ExecLog, ExecOptions, ExecResult, Executor, Invocation, ProcessExecutor};
use crate::layer::{Layer, LayerError, LayerFlags, LayerManager};
use crate::types::Metadata;

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("application root {0} is not a directory")]
  AppRoot(PathBuf),

  #[error("failed to create process executor: {0}")]
  Executor(#[from] ExecError),
}

/// Builder for [`BuildContext`].
pub struct ContextBuilder {
  app_root: PathBuf,
  layers_root: PathBuf,
  env: BTreeMap<String, String>,
  executor: Option<Arc<dyn Executor>>,
}

impl ContextBuilder {
  pub fn new(app_root: impl Into<PathBuf>, layers_root: impl Into<PathBuf>) -> Self {
    Self {
      app_root: app_root.into(),
      layers_root: layers_root.into(),
      env: BTreeMap::new(),
      executor: None,
    }
  }

  /// Replace the environment snapshot.
  pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env = env;
    self
  }

  pub fn env_var(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }

  /// Snapshot the current process environment.
  pub fn inherit_process_env(mut self) -> Self {
    self.env = std::env::vars().collect();
    self
  }

  /// Execution backend. Defaults to [`ProcessExecutor`].
  pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }

  pub fn build(self) -> Result<BuildContext, ContextError> {
    if !self.app_root.is_dir() {
      return Err(ContextError::AppRoot(self.app_root));
    }
    let executor = match self.executor {
      Some(executor) => executor,
      None => Arc::new(ProcessExecutor::new()?),
    };

    Ok(BuildContext {
      app_root: self.app_root,
      env: self.env,
      overlay: EnvOverlay::new(),
      exec: Exec::new(executor),
      layers: LayerManager::new(self.layers_root),
      module: None,
    })
  }
}

/// State shared by all modules during one lifecycle invocation.
#[derive(Debug)]
pub struct BuildContext {
  app_root: PathBuf,
  env: BTreeMap<String, String>,
  overlay: EnvOverlay,
  exec: Exec,
  layers: LayerManager,
  module: Option<String>,
}

impl BuildContext {
  pub fn app_root(&self) -> &Path {
    &self.app_root
  }

  pub fn layers_root(&self) -> &Path {
    self.layers.root()
  }

  /// The environment as it was when the context was created.
  pub fn env_snapshot(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  /// Overlay contributed by the modules built so far.
  pub fn overlay(&self) -> &EnvOverlay {
    &self.overlay
  }

  /// Snapshot with the overlay applied.
  pub fn effective_env(&self) -> BTreeMap<String, String> {
    self.overlay.applied_to(&self.env)
  }

  pub fn env_var(&self, name: &str) -> Option<String> {
    if self.overlay.is_empty() {
      return self.env.get(name).cloned();
    }
    self.effective_env().remove(name)
  }

  /// Module whose detect or build step is running, if any.
  pub fn current_module(&self) -> Option<&str> {
    self.module.as_deref()
  }

  pub fn exec_log(&self) -> &ExecLog {
    self.exec.log()
  }

  pub fn layers(&self) -> &LayerManager {
    &self.layers
  }

  pub(crate) fn layers_mut(&mut self) -> &mut LayerManager {
    &mut self.layers
  }

  pub(crate) fn enter_module(&mut self, module: &str) {
    debug!(module, "entering module");
    self.module = Some(module.to_string());
  }

  pub(crate) fn leave_module(&mut self) {
    self.module = None;
  }

  pub(crate) fn push_overlay(&mut self, overlay: &EnvOverlay) {
    self.overlay.extend(overlay);
  }

  /// Run an external command with the effective environment.
  ///
  /// The working directory defaults to the application root; a relative
  /// `options.cwd` is resolved against it.
  pub fn exec(&self, program: &str, args: &[&str], options: ExecOptions) -> Result<ExecResult, ExecError> {
    let mut env = self.effective_env();
    env.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let cwd = match &options.cwd {
      Some(cwd) => self.app_root.join(cwd),
      None => self.app_root.clone(),
    };

    let invocation = Invocation {
      program: program.to_string(),
      args: args.iter().map(|a| a.to_string()).collect(),
      cwd,
      env,
      timeout: options.timeout,
    };
    self.exec.run(&invocation, &options)
  }

  fn active_module(&self) -> Result<&str, LayerError> {
    self.module.as_deref().ok_or(LayerError::NoActiveModule)
  }

  fn check_owner(&self, layer: &Layer) -> Result<(), LayerError> {
    if self.active_module()? != layer.module() {
      return Err(LayerError::UnknownLayer(layer.name().to_string()));
    }
    Ok(())
  }

  /// Obtain a layer owned by the active module.
  pub fn layer(&mut self, name: &str, flags: LayerFlags) -> Result<Layer, LayerError> {
    let module = self.active_module()?.to_string();
    self.layers.get_layer(&module, name, flags)
  }

  pub fn set_cache_key(&mut self, layer: &Layer, key: &str) -> Result<(), LayerError> {
    self.check_owner(layer)?;
    self.layers.set_cache_key(layer, key)
  }

  pub fn is_cache_hit(&self, layer: &Layer) -> bool {
    self.check_owner(layer).is_ok() && self.layers.is_cache_hit(layer)
  }

  pub fn layer_metadata(&self, layer: &Layer) -> Result<&Metadata, LayerError> {
    self.check_owner(layer)?;
    self.layers.metadata(layer)
  }

  pub fn write_metadata(&mut self, layer: &Layer, data: Metadata) -> Result<(), LayerError> {
    self.check_owner(layer)?;
    self.layers.write_metadata(layer, data)
  }

  /// Absolute path of `rel` inside the application root.
  pub fn app_path(&self, rel: impl AsRef<Path>) -> PathBuf {
    self.app_root.join(rel)
  }

  pub fn file_exists(&self, rel: impl AsRef<Path>) -> bool {
    self.app_path(rel).exists()
  }

  pub fn any_file_exists(&self, rels: &[&str]) -> bool {
    rels.iter().any(|rel| self.file_exists(rel))
  }

  pub fn read_app_file(&self, rel: impl AsRef<Path>) -> io::Result<String> {
    fs::read_to_string(self.app_path(rel))
  }

  /// Rewrite CRLF line endings of an application file to LF.
  ///
  /// Returns whether the file was changed.
  pub fn ensure_unix_line_endings(&self, rel: impl AsRef<Path>) -> io::Result<bool> {
    let path = self.app_path(rel);
    let content = fs::read_to_string(&path)?;
    if !content.contains("\r\n") {
      return Ok(false);
    }
    debug!(path = %path.display(), "rewriting CRLF line endings");
    fs::write(&path, content.replace("\r\n", "\n"))?;
    Ok(true)
  }
}
