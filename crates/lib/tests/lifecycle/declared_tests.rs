use stackpack_lib::declared::{DeclaredModule, parse_modules};
use stackpack_lib::exec::MockRule;
use stackpack_lib::plan::DetectResult;
use stackpack_lib::testing::{BuildHarness, run_detect};
use tempfile::TempDir;

const MODULES: &str = r#"{
  "modules": [
    {
      "name": "go-flex",
      "detect": { "files": ["go.mod"], "platform": "flex", "buildable": "skip" },
      "provides": [{ "name": "web-process" }],
      "commands": [{ "program": "go", "args": ["build", "./..."] }]
    },
    {
      "name": "go-build",
      "detect": { "files": ["go.mod"], "buildable": "pass" },
      "provides": [{ "name": "web-process" }]
    },
    {
      "name": "maven",
      "detect": { "files": ["pom.xml"] },
      "provides": [{ "name": "web-process" }],
      "layer": {
        "name": "m2",
        "flags": { "cache": true },
        "key_files": ["pom.xml"],
        "metadata": { "tool": "maven" }
      },
      "commands": [
        {
          "program": "mvn",
          "args": ["clean", "package", "--batch-mode", "-DskipTests", "-Dhttp.keepAlive=false"],
          "args_env": "MAVEN_BUILD_ARGS"
        }
      ],
      "env": [{ "name": "MAVEN_HOME", "op": "override", "value": "{layer}/maven" }],
      "processes": [{ "type": "web", "command": "java", "args": ["-jar", "target/app.jar"] }]
    }
  ]
}"#;

fn module(name: &str) -> DeclaredModule {
  parse_modules(MODULES)
    .unwrap()
    .into_iter()
    .find(|m| m.name == name)
    .unwrap()
}

#[test]
fn flex_detect_needs_go_mod_and_platform() {
  let cases: [(&[(&str, &str)], &[(&str, &str)], bool); 4] = [
    (&[("go.mod", "")], &[("STACKPACK_TARGET_PLATFORM", "flex")], true),
    (&[("go.mod", "")], &[], false),
    (&[], &[("STACKPACK_TARGET_PLATFORM", "flex")], false),
    (
      &[("go.mod", "")],
      &[("STACKPACK_BUILDABLE", "./main"), ("STACKPACK_TARGET_PLATFORM", "flex")],
      false,
    ),
  ];

  let flex = module("go-flex");
  for (files, env, want_pass) in cases {
    let result = run_detect(&flex, files, env).unwrap();
    assert_eq!(result.is_pass(), want_pass, "files {files:?} env {env:?}");
  }
}

#[test]
fn buildable_override_wins_over_missing_files() {
  let go = module("go-build");

  let result = run_detect(&go, &[], &[("STACKPACK_BUILDABLE", "cmd/server")]).unwrap();
  assert!(result.is_pass());

  let result = run_detect(&go, &[], &[]).unwrap();
  assert!(matches!(result, DetectResult::Skip { .. }));
}

#[test]
fn invalid_buildable_is_a_detect_error() {
  let go = module("go-build");

  assert!(run_detect(&go, &[("go.mod", "")], &[("STACKPACK_BUILDABLE", "../escape")]).is_err());
}

#[test]
fn build_args_from_env_replace_defaults() {
  let run = BuildHarness::new()
    .with_file("pom.xml", "<project/>")
    .with_env("MAVEN_BUILD_ARGS", "clean package")
    .with_mock(MockRule::new("^mvn ").unwrap())
    .run_module(module("maven"))
    .unwrap();

  assert!(run.is_ok(), "{:?}", run.error());
  assert!(run.command_executed("mvn clean package"));
  assert!(!run.command_executed("mvn clean package --batch-mode -DskipTests -Dhttp.keepAlive=false"));
}

#[test]
fn declared_layer_is_cached_by_key_files() {
  let layers = TempDir::new().unwrap();
  let harness = BuildHarness::new()
    .with_file("pom.xml", "<project/>")
    .with_layers_root(layers.path())
    .with_mock(MockRule::new("^mvn ").unwrap());

  let first = harness.run_module(module("maven")).unwrap();
  let second = harness.run_module(module("maven")).unwrap();
  let changed = harness
    .clone()
    .with_file("pom.xml", "<project><version>2</version></project>")
    .run_module(module("maven"))
    .unwrap();

  assert_eq!(first.count_matching("^mvn "), 1);
  assert_eq!(second.count_matching("^mvn "), 0);
  assert_eq!(changed.count_matching("^mvn "), 1);
}

#[test]
fn declared_env_and_processes_reach_the_manifest() {
  let run = BuildHarness::new()
    .with_file("pom.xml", "<project/>")
    .with_mock(MockRule::new("^mvn ").unwrap())
    .run_module(module("maven"))
    .unwrap();

  let manifest = &run.report().unwrap().manifest;
  let maven_home = run.layers_root().join("maven/m2/maven");
  assert_eq!(run.env()["MAVEN_HOME"], maven_home.to_string_lossy());
  assert_eq!(manifest.process("web").unwrap().command, "java");
}

#[test]
fn changed_build_args_invalidate_the_cached_layer() {
  let layers = TempDir::new().unwrap();
  let harness = BuildHarness::new()
    .with_file("pom.xml", "<project/>")
    .with_layers_root(layers.path())
    .with_mock(MockRule::new("^mvn ").unwrap());

  let dev = harness
    .clone()
    .with_env("MAVEN_BUILD_ARGS", "package -Pdev")
    .run_module(module("maven"))
    .unwrap();
  let prod = harness
    .clone()
    .with_env("MAVEN_BUILD_ARGS", "package -Pprod")
    .run_module(module("maven"))
    .unwrap();
  let prod_again = harness
    .with_env("MAVEN_BUILD_ARGS", "package -Pprod")
    .run_module(module("maven"))
    .unwrap();

  assert!(dev.command_executed("mvn package -Pdev"));
  assert!(prod.command_executed("mvn package -Pprod"));
  assert_eq!(prod_again.count_matching("^mvn "), 0);
}
