//! Implementation of the `stackpack detect` command.
//!
//! Runs every module's detect step and prints the resolved plan without
//! building anything.

use anyhow::Result;

use super::ModuleArgs;
use crate::output::{OutputFormat, format_plan, print_detection, print_field, print_json, print_success, print_warning};

pub fn cmd_detect(args: &ModuleArgs, output: OutputFormat) -> Result<()> {
  let (lifecycle, mut ctx) = args.load()?;
  let report = lifecycle.detect(&mut ctx)?;

  if output.is_json() {
    return print_json(&report);
  }

  for detection in &report.detections {
    print_detection(&detection.module, &detection.result);
  }
  println!();

  for warning in &report.warnings {
    print_warning(&warning.to_string());
  }

  if report.plan.is_empty() {
    print_warning("No modules are active");
    return Ok(());
  }

  print_success(&format!("Build plan: {}", format_plan(&report.plan.order())));
  for (module, plan) in report.plan.iter() {
    for require in &plan.requires {
      print_field(module, &format!("requires {} from {}", require.name, require.provider));
    }
  }

  Ok(())
}
