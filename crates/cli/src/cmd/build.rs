//! Implementation of the `stackpack build` command.

use anyhow::Result;

use stackpack_lib::lifecycle::LifecycleError;

use super::ModuleArgs;
use crate::output::{
  OutputFormat, format_duration, format_layer, format_plan, print_error, print_field, print_json, print_success,
  print_warning,
};

pub fn cmd_build(args: &ModuleArgs, output: OutputFormat) -> Result<()> {
  let (lifecycle, mut ctx) = args.load()?;

  let report = match lifecycle.build(&mut ctx) {
    Ok(report) => report,
    Err(err) => {
      if let LifecycleError::Build { module, .. } = &err {
        print_error(&format!("Module {} failed; its layers were left in {}", module, ctx.layers_root().display()));
      }
      return Err(err.into());
    }
  };

  if output.is_json() {
    return print_json(&report.manifest);
  }

  for warning in &report.detect.warnings {
    print_warning(&warning.to_string());
  }

  let manifest = &report.manifest;
  let total: std::time::Duration = ctx.exec_log().records().iter().map(|r| r.duration).sum();
  let order: Vec<&str> = manifest.modules.iter().map(String::as_str).collect();

  print_success(&format!("Built {} module(s)", manifest.modules.len()));
  print_field("order", &format_plan(&order));
  print_field("commands", &format!("{} in {}", ctx.exec_log().len(), format_duration(total)));
  for layer in &manifest.layers {
    print_field("layer", &format_layer(layer));
  }
  for process in &manifest.processes {
    let marker = if process.default { " (default)" } else { "" };
    print_field(&process.kind, &format!("{}{}", process.command, marker));
  }
  print_field("manifest", &report.manifest_path.display().to_string());

  Ok(())
}
