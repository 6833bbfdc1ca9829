use stackpack_lib::exec::MockRule;
use stackpack_lib::lifecycle::{BuildModule, LifecycleError};
use stackpack_lib::plan::{PlanError, PlatformConfig};
use stackpack_lib::testing::BuildHarness;
use stackpack_lib::types::metadata;

use super::common::{Journal, TestModule, provide};

#[test]
fn runtime_then_web_process() {
  let journal = Journal::default();
  let modules: Vec<Box<dyn BuildModule>> = vec![
    Box::new(TestModule::new("a", &journal).provides(provide("runtime"))),
    Box::new(
      TestModule::new("b", &journal)
        .requires("runtime")
        .provides(provide("web-process")),
    ),
  ];

  let run = BuildHarness::new().run(modules).unwrap();

  let report = run.report().unwrap();
  assert_eq!(report.detect.plan.order(), vec!["a", "b"]);
  assert_eq!(journal.entries(), vec!["build:a", "build:b"]);
}

#[test]
fn build_order_is_registration_order_of_active_modules() {
  let journal = Journal::default();
  let modules: Vec<Box<dyn BuildModule>> = vec![
    Box::new(
      TestModule::new("web", &journal)
        .requires("runtime")
        .provides(provide("web-process")),
    ),
    Box::new(TestModule::new("skipped", &journal).skips()),
    Box::new(TestModule::new("unused", &journal).provides(provide("lint"))),
    Box::new(TestModule::new("runtime", &journal).provides(provide("runtime"))),
  ];

  let run = BuildHarness::new().run(modules).unwrap();

  assert!(run.is_ok());
  assert_eq!(journal.entries(), vec!["build:web", "build:runtime"]);
}

fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
  if items.len() <= 1 {
    return vec![items.to_vec()];
  }
  let mut out = Vec::new();
  for (i, first) in items.iter().enumerate() {
    let mut rest = items.to_vec();
    rest.remove(i);
    for mut tail in permutations(&rest) {
      tail.insert(0, *first);
      out.push(tail);
    }
  }
  out
}

fn module(name: &str, journal: &Journal) -> TestModule {
  match name {
    "runtime" => TestModule::new("runtime", journal).provides(provide("runtime")),
    "deps" => TestModule::new("deps", journal)
      .requires("runtime")
      .provides(provide("deps")),
    "web" => TestModule::new("web", journal)
      .requires("deps")
      .provides(provide("web-process")),
    _ => TestModule::new(name, journal).provides(provide("unrelated")),
  }
}

#[test]
fn active_set_does_not_depend_on_registration_order() {
  for order in permutations(&["runtime", "deps", "web", "extra"]) {
    let journal = Journal::default();
    let modules: Vec<Box<dyn BuildModule>> = order
      .iter()
      .map(|name| Box::new(module(name, &journal)) as Box<dyn BuildModule>)
      .collect();

    let run = BuildHarness::new().run(modules).unwrap();

    let mut active = run.report().unwrap().detect.plan.order().into_iter().map(str::to_string).collect::<Vec<_>>();
    active.sort();
    assert_eq!(active, vec!["deps", "runtime", "web"], "order {order:?}");

    let expected: Vec<String> = order
      .iter()
      .filter(|name| **name != "extra")
      .map(|name| format!("build:{name}"))
      .collect();
    assert_eq!(journal.entries(), expected, "order {order:?}");
  }
}

#[test]
fn exclusive_conflict_fails_before_any_build_step() {
  let journal = Journal::default();
  let modules: Vec<Box<dyn BuildModule>> = vec![
    Box::new(
      TestModule::new("node18", &journal)
        .provides(provide("runtime").with_metadata(metadata([("version", "18")])).exclusive())
        .command("node --version"),
    ),
    Box::new(
      TestModule::new("node20", &journal)
        .provides(provide("runtime").with_metadata(metadata([("version", "20")])).exclusive())
        .command("node --version"),
    ),
    Box::new(
      TestModule::new("web", &journal)
        .requires("runtime")
        .provides(provide("web-process")),
    ),
  ];

  let run = BuildHarness::new()
    .with_mock(MockRule::new("^node").unwrap())
    .run(modules)
    .unwrap();

  assert!(matches!(
    run.error(),
    Some(LifecycleError::Plan(PlanError::ExclusiveConflict { name, .. })) if name == "runtime"
  ));
  assert!(journal.entries().is_empty());
  assert!(run.exec_log().is_empty());
}

fn runtime_provider(name: &str, version: &str, exclusive: bool, journal: &Journal) -> TestModule {
  let mut runtime = provide("runtime").with_metadata(metadata([("version", version)]));
  if exclusive {
    runtime = runtime.exclusive();
  }
  TestModule::new(name, journal).provides(runtime)
}

#[test]
fn exclusive_conflict_among_three_providers_fails_in_every_order() {
  for order in permutations(&["node20", "node18", "pinned20"]) {
    let journal = Journal::default();
    let mut modules: Vec<Box<dyn BuildModule>> = order
      .iter()
      .map(|name| -> Box<dyn BuildModule> {
        match *name {
          "node20" => Box::new(runtime_provider("node20", "20", false, &journal)),
          "node18" => Box::new(runtime_provider("node18", "18", false, &journal)),
          _ => Box::new(runtime_provider("pinned20", "20", true, &journal)),
        }
      })
      .collect();
    modules.push(Box::new(
      TestModule::new("web", &journal)
        .requires("runtime")
        .provides(provide("web-process")),
    ));

    let run = BuildHarness::new().run(modules).unwrap();

    match run.error() {
      Some(LifecycleError::Plan(PlanError::ExclusiveConflict { name, first, second })) => {
        assert_eq!(
          (name.as_str(), first.as_str(), second.as_str()),
          ("runtime", "node18", "pinned20"),
          "order {order:?}"
        );
      }
      other => panic!("order {order:?}: expected exclusive conflict, got {other:?}"),
    }
    assert!(journal.entries().is_empty(), "order {order:?}");
  }
}

#[test]
fn non_exclusive_conflict_builds_with_a_warning() {
  let journal = Journal::default();
  let modules: Vec<Box<dyn BuildModule>> = vec![
    Box::new(TestModule::new("node18", &journal).provides(provide("runtime").with_metadata(metadata([("version", "18")])))),
    Box::new(TestModule::new("node20", &journal).provides(provide("runtime").with_metadata(metadata([("version", "20")])))),
    Box::new(
      TestModule::new("web", &journal)
        .requires("runtime")
        .provides(provide("web-process")),
    ),
  ];

  let run = BuildHarness::new().run(modules).unwrap();

  let report = run.report().unwrap();
  assert_eq!(report.detect.warnings.len(), 1);
  let web = report.detect.plan.get("web").unwrap();
  assert_eq!(web.require("runtime").unwrap().provider, "node18");
}

#[test]
fn forced_module_is_built_without_being_required() {
  let journal = Journal::default();
  let modules: Vec<Box<dyn BuildModule>> = vec![
    Box::new(TestModule::new("web", &journal).provides(provide("web-process"))),
    Box::new(TestModule::new("debugger", &journal)),
  ];

  let run = BuildHarness::new()
    .with_env("STACKPACK_FORCE_MODULES", "debugger")
    .run(modules)
    .unwrap();

  assert!(run.is_ok());
  assert_eq!(journal.entries(), vec!["build:web", "build:debugger"]);
}

#[test]
fn custom_roots_replace_web_process() {
  let journal = Journal::default();
  let modules: Vec<Box<dyn BuildModule>> = vec![
    Box::new(TestModule::new("web", &journal).provides(provide("web-process"))),
    Box::new(TestModule::new("fn", &journal).provides(provide("function"))),
  ];

  let run = BuildHarness::new()
    .with_platform(PlatformConfig::with_roots(&["function"]))
    .run(modules)
    .unwrap();

  assert!(run.is_ok());
  assert_eq!(journal.entries(), vec!["build:fn"]);
}
