use std::sync::{Arc, Mutex};

use stackpack_lib::context::BuildContext;
use stackpack_lib::environment::EnvOverlay;
use stackpack_lib::exec::ExecOptions;
use stackpack_lib::layer::LayerFlags;
use stackpack_lib::lifecycle::{BuildModule, BuildOutcome, ModuleError, Process};
use stackpack_lib::plan::{Contract, DetectResult, ModulePlan, Provide, Require};
use stackpack_lib::types::metadata;

/// Shared record of what test modules did, in order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  pub fn push(&self, entry: String) {
    self.0.lock().unwrap().push(entry);
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }
}

/// A build module whose behaviour is configured by the test.
pub struct TestModule {
  name: String,
  result: DetectResult,
  layer: Option<(String, LayerFlags)>,
  cache_key: Option<String>,
  commands: Vec<String>,
  env: EnvOverlay,
  processes: Vec<Process>,
  journal: Journal,
}

impl TestModule {
  pub fn new(name: &str, journal: &Journal) -> Self {
    Self {
      name: name.to_string(),
      result: DetectResult::Pass(Contract::new()),
      layer: None,
      cache_key: None,
      commands: Vec::new(),
      env: EnvOverlay::new(),
      processes: Vec::new(),
      journal: journal.clone(),
    }
  }

  pub fn provides(mut self, provide: Provide) -> Self {
    if let DetectResult::Pass(contract) = &mut self.result {
      contract.provides.push(provide);
    }
    self
  }

  pub fn requires(mut self, name: &str) -> Self {
    if let DetectResult::Pass(contract) = &mut self.result {
      contract.requires.push(Require::new(name));
    }
    self
  }

  pub fn skips(mut self) -> Self {
    self.result = DetectResult::skip("not applicable");
    self
  }

  pub fn layer(mut self, name: &str, flags: LayerFlags) -> Self {
    self.layer = Some((name.to_string(), flags));
    self
  }

  pub fn cache_key(mut self, key: &str) -> Self {
    self.cache_key = Some(key.to_string());
    self
  }

  pub fn command(mut self, command: &str) -> Self {
    self.commands.push(command.to_string());
    self
  }

  pub fn env(mut self, f: impl FnOnce(&mut EnvOverlay)) -> Self {
    f(&mut self.env);
    self
  }

  pub fn process(mut self, process: Process) -> Self {
    self.processes.push(process);
    self
  }

  fn run_commands(&self, ctx: &BuildContext) -> Result<(), ModuleError> {
    for command in &self.commands {
      let mut parts = command.split_whitespace();
      let program = parts.next().unwrap_or_default();
      let args: Vec<&str> = parts.collect();
      ctx.exec(program, &args, ExecOptions::new())?;
    }
    Ok(())
  }
}

impl BuildModule for TestModule {
  fn name(&self) -> &str {
    &self.name
  }

  fn detect(&self, _ctx: &BuildContext) -> Result<DetectResult, ModuleError> {
    Ok(self.result.clone())
  }

  fn build(&self, ctx: &mut BuildContext, _plan: &ModulePlan) -> Result<BuildOutcome, ModuleError> {
    self.journal.push(format!("build:{}", self.name));

    match &self.layer {
      Some((name, flags)) => {
        let layer = ctx.layer(name, *flags)?;
        if let Some(key) = &self.cache_key {
          ctx.set_cache_key(&layer, key)?;
          if ctx.is_cache_hit(&layer) {
            self.journal.push(format!("hit:{}", self.name));
            return Ok(BuildOutcome {
              env: self.env.clone(),
              processes: self.processes.clone(),
            });
          }
        }
        std::fs::write(layer.path().join("content"), format!("{}:{}", self.name, self.cache_key.as_deref().unwrap_or("")))?;
        self.run_commands(ctx)?;
        ctx.write_metadata(&layer, metadata([("built_by", self.name.as_str())]))?;
      }
      None => self.run_commands(ctx)?,
    }

    Ok(BuildOutcome {
      env: self.env.clone(),
      processes: self.processes.clone(),
    })
  }
}

pub fn provide(name: &str) -> Provide {
  Provide::new(name)
}
