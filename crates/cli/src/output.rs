//! Terminal rendering for detect and build results.
//!
//! Status lines go to stdout, warnings and errors to stderr. Colors are only
//! used when the stream supports them.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use stackpack_lib::layer::RetainedLayer;
use stackpack_lib::plan::DetectResult;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const ARROW: &str = "→";
}

/// Width labels are padded to in field and detection lines.
const LABEL_WIDTH: usize = 12;

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// `module/name [flags]`, marked `(kept)` when the build did not touch it.
pub fn format_layer(layer: &RetainedLayer) -> String {
  let mut line = format!("{}/{} [{}]", layer.module, layer.name, layer.flags);
  if !layer.touched {
    line.push_str(" (kept)");
  }
  line
}

/// Build order joined with arrows.
pub fn format_plan(order: &[&str]) -> String {
  order.join(format!(" {} ", symbols::ARROW).as_str())
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

/// One indented `label  value` line with the label padded to a column.
pub fn print_field(label: &str, value: &str) {
  let label = format!("{:<width$}", label, width = LABEL_WIDTH);
  println!("  {} {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// One line per module: `pass`/`skip`, the module name and the skip reason.
pub fn print_detection(module: &str, result: &DetectResult) {
  let module = format!("{:<width$}", module, width = LABEL_WIDTH);
  match result {
    DetectResult::Pass(_) => println!("  {} {}", "pass".if_supports_color(Stream::Stdout, |s| s.green()), module),
    DetectResult::Skip { reason } => println!(
      "  {} {} {}",
      "skip".if_supports_color(Stream::Stdout, |s| s.dimmed()),
      module,
      reason.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
