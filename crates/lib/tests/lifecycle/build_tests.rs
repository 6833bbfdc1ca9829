use std::fs;

use stackpack_lib::context::BuildContext;
use stackpack_lib::environment::{EnvOp, EnvOverlay};
use stackpack_lib::exec::{ExecOptions, MockRule};
use stackpack_lib::layer::LayerFlags;
use stackpack_lib::lifecycle::{BuildManifest, BuildModule, BuildOutcome, LifecycleError, ModuleError, Phase, Process};
use stackpack_lib::plan::{DetectResult, ModulePlan};
use stackpack_lib::testing::{BuildHarness, RunError};
use tempfile::TempDir;

use super::common::{Journal, TestModule, provide};

fn runtime(journal: &Journal) -> TestModule {
  TestModule::new("runtime", journal)
    .provides(provide("runtime"))
    .layer("sdk", LayerFlags::BUILD | LayerFlags::CACHE)
    .cache_key("sdk-1.22")
    .command("fetch-sdk")
    .env(|env| {
      env.prepend_path("PATH", "/layers/runtime/sdk/bin");
    })
}

fn app(journal: &Journal) -> TestModule {
  TestModule::new("app", journal)
    .requires("runtime")
    .provides(provide("web-process"))
    .layer("bin", LayerFlags::LAUNCH)
    .command("compile")
    .env(|env| {
      env.default_var("PORT", "8080");
    })
    .process(Process::new("web", "/layers/app/bin/server").as_default())
}

fn modules(journal: &Journal) -> Vec<Box<dyn BuildModule>> {
  vec![Box::new(runtime(journal)), Box::new(app(journal))]
}

#[test]
fn failure_reports_module_phase_and_stderr_tail() {
  let journal = Journal::default();

  let run = BuildHarness::new()
    .with_mock(MockRule::new("^fetch-sdk$").unwrap())
    .with_mock(
      MockRule::new("^compile$")
        .unwrap()
        .with_stderr("main.go:3: undefined: foo\nbuild failed")
        .with_exit_code(2),
    )
    .run(modules(&journal))
    .unwrap();

  match run.error() {
    Some(LifecycleError::Build {
      module,
      phase,
      stderr_tail,
      ..
    }) => {
      assert_eq!(module, "app");
      assert_eq!(*phase, Phase::Build);
      assert_eq!(stderr_tail.as_deref(), Some("main.go:3: undefined: foo\nbuild failed"));
    }
    other => panic!("expected build error, got {other:?}"),
  }

  let message = run.error().unwrap().to_string();
  assert!(message.contains("app failed during build"));
  assert!(message.contains("undefined: foo"));
}

#[test]
fn failure_stops_later_modules_and_keeps_written_layers() {
  let journal = Journal::default();
  let layers = TempDir::new().unwrap();

  let run = BuildHarness::new()
    .with_layers_root(layers.path())
    .with_mock(MockRule::new("^fetch-sdk$").unwrap().with_stderr("connection reset").with_exit_code(1))
    .run(modules(&journal))
    .unwrap();

  assert_eq!(run.error().and_then(|e| e.module()), Some("runtime"));
  assert_eq!(journal.entries(), vec!["build:runtime"]);
  assert!(!run.command_executed("compile"));
  assert!(layers.path().join("runtime/sdk/content").exists());
  assert!(!layers.path().join("manifest.json").exists());
}

#[test]
fn retry_after_a_fix_resumes_from_cached_layers() {
  let journal = Journal::default();
  let layers = TempDir::new().unwrap();

  let failed = BuildHarness::new()
    .with_layers_root(layers.path())
    .with_mock(MockRule::new("^fetch-sdk$").unwrap())
    .with_mock(MockRule::new("^compile$").unwrap().with_exit_code(1))
    .run(modules(&journal))
    .unwrap();
  assert!(!failed.is_ok());

  let fixed = BuildHarness::new()
    .with_layers_root(layers.path())
    .with_mock(MockRule::new("^fetch-sdk$").unwrap())
    .with_mock(MockRule::new("^compile$").unwrap())
    .run(modules(&journal))
    .unwrap();

  assert!(fixed.is_ok());
  assert!(!fixed.command_executed("fetch-sdk"));
  assert!(fixed.command_executed("compile"));
}

#[test]
fn upstream_env_is_visible_to_downstream_commands() {
  let journal = Journal::default();

  let run = BuildHarness::new()
    .with_env("PATH", "/usr/bin")
    .with_mock(MockRule::new("^fetch-sdk$").unwrap())
    .with_mock(MockRule::new("^compile$").unwrap())
    .run(modules(&journal))
    .unwrap();

  assert!(run.is_ok());
  assert_eq!(run.env()["PATH"], "/layers/runtime/sdk/bin:/usr/bin");
  assert_eq!(run.env()["PORT"], "8080");
}

#[test]
fn manifest_lists_layers_env_and_processes() {
  let journal = Journal::default();

  let run = BuildHarness::new()
    .with_mock(MockRule::new("^fetch-sdk$").unwrap())
    .with_mock(MockRule::new("^compile$").unwrap())
    .run(modules(&journal))
    .unwrap();

  let report = run.report().unwrap();
  let on_disk: BuildManifest = serde_json::from_str(&fs::read_to_string(&report.manifest_path).unwrap()).unwrap();
  assert_eq!(on_disk, report.manifest);

  assert_eq!(on_disk.modules, vec!["runtime", "app"]);
  assert_eq!(
    on_disk.layer("runtime", "sdk").unwrap().flags,
    LayerFlags::BUILD | LayerFlags::CACHE
  );
  assert!(on_disk.layer("app", "bin").unwrap().touched);
  let ops: Vec<EnvOp> = on_disk.env.entries().iter().map(|e| e.op).collect();
  assert_eq!(ops, vec![EnvOp::Prepend, EnvOp::Default]);
  assert_eq!(on_disk.process("web").unwrap().command, "/layers/app/bin/server");
}

#[test]
fn unmatched_command_fails_the_build() {
  let journal = Journal::default();

  let run = BuildHarness::new()
    .with_mock(MockRule::new("^fetch-sdk$").unwrap())
    .run(modules(&journal))
    .unwrap();

  assert!(!run.is_ok());
  assert_eq!(run.unmatched(), vec!["compile"]);
}

/// Module that treats a missing toolchain as optional.
struct OptionalToolchain;

impl BuildModule for OptionalToolchain {
  fn name(&self) -> &str {
    "optional-go"
  }

  fn detect(&self, _ctx: &BuildContext) -> Result<DetectResult, ModuleError> {
    Ok(DetectResult::pass_providing(&["web-process"]))
  }

  fn build(&self, ctx: &mut BuildContext, _plan: &ModulePlan) -> Result<BuildOutcome, ModuleError> {
    let mut env = EnvOverlay::new();
    if ctx.exec("go", &["version"], ExecOptions::new()).is_ok() {
      env.override_var("GO_AVAILABLE", "1");
    }
    Ok(BuildOutcome::new().with_env(env))
  }
}

#[test]
fn unmatched_command_fails_the_run_even_when_ignored() {
  let run = BuildHarness::new().run_module(OptionalToolchain).unwrap();

  assert!(!run.is_ok());
  assert!(run.report().is_none());
  assert!(run.error().is_none());
  match run.failure() {
    Some(RunError::Unmatched { commands }) => assert_eq!(commands, &vec!["go version".to_string()]),
    other => panic!("expected unmatched commands, got {other:?}"),
  }
}

#[test]
fn fully_described_commands_pass_the_run() {
  let run = BuildHarness::new()
    .with_mock(MockRule::new("^go version$").unwrap())
    .run_module(OptionalToolchain)
    .unwrap();

  assert!(run.is_ok(), "{:?}", run.failure());
  assert!(run.unmatched().is_empty());
  assert_eq!(run.env()["GO_AVAILABLE"], "1");
}
