use std::fs;

use serde_json::Value;
use stackpack_lib::exec::MockRule;
use stackpack_lib::layer::LayerFlags;
use stackpack_lib::lifecycle::BuildModule;
use stackpack_lib::testing::{BuildHarness, BuildRun};
use tempfile::TempDir;

use super::common::{Journal, TestModule, provide};

fn deps_module(journal: &Journal, key: &str) -> TestModule {
  TestModule::new("npm", journal)
    .provides(provide("web-process"))
    .layer("node_modules", LayerFlags::CACHE | LayerFlags::LAUNCH)
    .cache_key(key)
    .command("npm ci")
}

fn build(layers: &TempDir, journal: &Journal, key: &str) -> BuildRun {
  BuildHarness::new()
    .with_layers_root(layers.path())
    .with_mock(MockRule::new("^npm ci$").unwrap())
    .run_module(deps_module(journal, key))
    .unwrap()
}

#[test]
fn unchanged_key_is_a_hit_and_skips_regeneration() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();
  let content = layers.path().join("npm/node_modules/content");

  let first = build(&layers, &journal, "k1");
  assert!(first.is_ok());
  assert!(first.command_executed("npm ci"));
  let written = fs::read_to_string(&content).unwrap();
  let modified = fs::metadata(&content).unwrap().modified().unwrap();

  let second = build(&layers, &journal, "k1");
  assert!(second.is_ok());
  assert!(!second.command_executed("npm ci"));
  assert_eq!(journal.entries(), vec!["build:npm", "build:npm", "hit:npm"]);
  assert_eq!(fs::read_to_string(&content).unwrap(), written);
  assert_eq!(fs::metadata(&content).unwrap().modified().unwrap(), modified);
}

#[test]
fn changed_key_regenerates() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();

  build(&layers, &journal, "k1");
  let second = build(&layers, &journal, "k2");

  assert!(second.command_executed("npm ci"));
  assert_eq!(
    fs::read_to_string(layers.path().join("npm/node_modules/content")).unwrap(),
    "npm:k2"
  );
}

#[test]
fn corrupt_record_degrades_to_a_miss() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();
  build(&layers, &journal, "k1");

  fs::write(layers.path().join("npm/node_modules.json"), "{\"schema\": 1, \"cache_").unwrap();
  let second = build(&layers, &journal, "k1");

  assert!(second.is_ok());
  assert!(second.command_executed("npm ci"));
}

#[test]
fn schema_mismatch_degrades_to_a_miss() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();
  build(&layers, &journal, "k1");

  let record_path = layers.path().join("npm/node_modules.json");
  let mut record: Value = serde_json::from_str(&fs::read_to_string(&record_path).unwrap()).unwrap();
  record["schema"] = Value::from(999);
  fs::write(&record_path, record.to_string()).unwrap();

  let second = build(&layers, &journal, "k1");

  assert!(second.is_ok());
  assert!(second.command_executed("npm ci"));
}

#[test]
fn record_holds_key_flags_and_metadata() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();
  build(&layers, &journal, "k1");

  let record: Value =
    serde_json::from_str(&fs::read_to_string(layers.path().join("npm/node_modules.json")).unwrap()).unwrap();

  assert_eq!(record["cache_key"], "k1");
  assert_eq!(record["flags"]["cache"], true);
  assert_eq!(record["flags"]["launch"], true);
  assert_eq!(record["metadata"]["built_by"], "npm");
}

#[test]
fn module_leaving_the_plan_loses_its_layers() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();
  build(&layers, &journal, "k1");
  assert!(layers.path().join("npm").exists());

  let modules: Vec<Box<dyn BuildModule>> = vec![Box::new(
    TestModule::new("go", &journal).provides(provide("web-process")),
  )];
  let run = BuildHarness::new().with_layers_root(layers.path()).run(modules).unwrap();

  assert!(run.is_ok());
  assert!(!layers.path().join("npm").exists());
}

#[test]
fn non_cache_layer_starts_empty_each_build() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();
  let module = || {
    TestModule::new("app", &journal)
      .provides(provide("web-process"))
      .layer("bin", LayerFlags::LAUNCH)
  };

  BuildHarness::new().with_layers_root(layers.path()).run_module(module()).unwrap();
  let stray = layers.path().join("app/bin/stray");
  fs::write(&stray, "left over").unwrap();

  let run = BuildHarness::new().with_layers_root(layers.path()).run_module(module()).unwrap();

  assert!(run.is_ok());
  assert!(!stray.exists());
  assert!(layers.path().join("app/bin/content").exists());
}

#[test]
fn untouched_cache_layer_survives_and_untouched_launch_layer_does_not() {
  let layers = TempDir::new().unwrap();
  let journal = Journal::default();

  let modules: Vec<Box<dyn BuildModule>> = vec![Box::new(
    TestModule::new("app", &journal)
      .provides(provide("web-process"))
      .layer("bin", LayerFlags::LAUNCH),
  )];
  BuildHarness::new().with_layers_root(layers.path()).run(modules).unwrap();

  // A cache layer left by an earlier build of the same module.
  fs::create_dir_all(layers.path().join("app/downloads")).unwrap();
  fs::write(
    layers.path().join("app/downloads.json"),
    r#"{"schema":1,"cache_key":"x","flags":{"cache":true},"metadata":{}}"#,
  )
  .unwrap();

  let modules: Vec<Box<dyn BuildModule>> = vec![Box::new(TestModule::new("app", &journal).provides(provide("web-process")))];
  let run = BuildHarness::new().with_layers_root(layers.path()).run(modules).unwrap();

  let manifest = &run.report().unwrap().manifest;
  assert!(manifest.layer("app", "downloads").is_some());
  assert!(manifest.layer("app", "bin").is_none());
  assert!(layers.path().join("app/downloads").exists());
  assert!(!layers.path().join("app/bin").exists());
}
