//! Harness for exercising build modules against mocked tools.
//!
//! Modules are run in a scratch application directory with a
//! [`MockExecutor`], so a test describes every external command through
//! [`MockRule`]s and then asserts on what was executed.
//!
//! ```ignore
//! let run = BuildHarness::new()
//!   .with_file("pom.xml", "<project/>")
//!   .with_env("MAVEN_BUILD_ARGS", "clean package")
//!   .with_mock(MockRule::new("^mvn").unwrap())
//!   .run_module(maven)
//!   .unwrap();
//! assert!(run.command_executed("mvn clean package"));
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;

use crate::context::ContextBuilder;
use crate::exec::{ExecLog, MockExecutor, MockRule};
use crate::lifecycle::{BuildModule, BuildReport, Lifecycle, LifecycleError, ModuleError};
use crate::plan::{DetectResult, PlatformConfig};

fn write_app_files(root: &Path, files: &[(String, String)]) -> io::Result<()> {
  for (rel, content) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
  }
  Ok(())
}

/// Run only the detect step of `module` against `files` and `env`.
pub fn run_detect(
  module: &dyn BuildModule,
  files: &[(&str, &str)],
  env: &[(&str, &str)],
) -> Result<DetectResult, ModuleError> {
  let app = TempDir::new()?;
  let layers = TempDir::new()?;
  let files: Vec<(String, String)> = files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect();
  write_app_files(app.path(), &files)?;

  let mut builder = ContextBuilder::new(app.path(), layers.path()).executor(Arc::new(MockExecutor::new()));
  for (key, value) in env {
    builder = builder.env_var(key, value);
  }
  let ctx = builder.build().map_err(|e| ModuleError::new(e.to_string()))?;
  module.detect(&ctx)
}

/// Why a harness run failed.
#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  /// The lifecycle succeeded but some commands matched no mock rule, so the
  /// rules do not describe what the modules ran.
  #[error("commands matched no mock rule: {}", commands.join(", "))]
  Unmatched { commands: Vec<String> },
}

/// Builder for one lifecycle run in a scratch application directory.
#[derive(Debug, Clone, Default)]
pub struct BuildHarness {
  files: Vec<(String, String)>,
  env: BTreeMap<String, String>,
  rules: Vec<MockRule>,
  platform: PlatformConfig,
  layers_root: Option<PathBuf>,
}

impl BuildHarness {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_file(mut self, path: &str, content: &str) -> Self {
    self.files.push((path.to_string(), content.to_string()));
    self
  }

  pub fn with_files(mut self, files: &[(&str, &str)]) -> Self {
    for (path, content) in files {
      self = self.with_file(path, content);
    }
    self
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }

  pub fn with_mock(mut self, rule: MockRule) -> Self {
    self.rules.push(rule);
    self
  }

  pub fn with_mocks(mut self, rules: impl IntoIterator<Item = MockRule>) -> Self {
    self.rules.extend(rules);
    self
  }

  pub fn with_platform(mut self, platform: PlatformConfig) -> Self {
    self.platform = platform;
    self
  }

  /// Use a persistent layers root so consecutive runs share the cache.
  pub fn with_layers_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.layers_root = Some(root.into());
    self
  }

  pub fn run_module<M: BuildModule + 'static>(&self, module: M) -> io::Result<BuildRun> {
    self.run(vec![Box::new(module)])
  }

  /// Run detect and build for `modules` in registration order.
  ///
  /// Errors only come from setting up the scratch directories; the
  /// lifecycle's own outcome is in [`BuildRun::result`]. A run in which any
  /// command matched no mock rule is a failure even if the modules ignored
  /// the resulting errors.
  pub fn run(&self, modules: Vec<Box<dyn BuildModule>>) -> io::Result<BuildRun> {
    let app = TempDir::new()?;
    write_app_files(app.path(), &self.files)?;

    let (layers_root, layers_dir) = match &self.layers_root {
      Some(root) => (root.clone(), None),
      None => {
        let dir = TempDir::new()?;
        (dir.path().to_path_buf(), Some(dir))
      }
    };

    let mock = Arc::new(MockExecutor::new().with_rules(self.rules.iter().cloned()));
    let mut ctx = ContextBuilder::new(app.path(), &layers_root)
      .env(self.env.clone())
      .executor(mock.clone())
      .build()
      .map_err(io::Error::other)?;

    let mut lifecycle = Lifecycle::new(self.platform.clone());
    for module in modules {
      lifecycle.register_boxed(module);
    }

    let outcome = lifecycle.build(&mut ctx);
    let unmatched = mock.unmatched();
    let result = match outcome {
      Ok(_) if !unmatched.is_empty() => Err(RunError::Unmatched { commands: unmatched }),
      other => other.map_err(RunError::from),
    };
    let env = ctx.effective_env();
    let log = ctx.exec_log().clone();

    Ok(BuildRun {
      result,
      log,
      mock,
      env,
      layers_root,
      _app: app,
      _layers_dir: layers_dir,
    })
  }
}

/// Outcome of one harness run. Keeps the scratch directories alive.
#[derive(Debug)]
pub struct BuildRun {
  pub result: Result<BuildReport, RunError>,
  log: ExecLog,
  mock: Arc<MockExecutor>,
  env: BTreeMap<String, String>,
  layers_root: PathBuf,
  _app: TempDir,
  _layers_dir: Option<TempDir>,
}

impl BuildRun {
  pub fn is_ok(&self) -> bool {
    self.result.is_ok()
  }

  pub fn report(&self) -> Option<&BuildReport> {
    self.result.as_ref().ok()
  }

  pub fn failure(&self) -> Option<&RunError> {
    self.result.as_ref().err()
  }

  /// The lifecycle error, if the run failed inside the lifecycle.
  pub fn error(&self) -> Option<&LifecycleError> {
    match self.failure() {
      Some(RunError::Lifecycle(err)) => Some(err),
      _ => None,
    }
  }

  /// Whether a command with exactly this command line was executed.
  pub fn command_executed(&self, command: &str) -> bool {
    self.log.command_executed(command)
  }

  /// Number of executed commands whose command line matches `pattern`.
  pub fn count_matching(&self, pattern: &str) -> usize {
    self.mock.count_matching(pattern)
  }

  /// Commands no mock rule matched. A non-empty list means the rules do not
  /// describe the module's behaviour.
  pub fn unmatched(&self) -> Vec<String> {
    self.mock.unmatched()
  }

  pub fn exec_log(&self) -> &ExecLog {
    &self.log
  }

  /// Effective environment after the run.
  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  pub fn layers_root(&self) -> &Path {
    &self.layers_root
  }
}
