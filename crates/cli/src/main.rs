mod cmd;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::ModuleArgs;
use output::OutputFormat;

/// stackpack - build container layers from application source
#[derive(Parser)]
#[command(name = "stackpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run detection and print the resolved build plan
  Detect(ModuleArgs),

  /// Detect, then build every active module
  Build(ModuleArgs),
}

fn init_tracing(verbose: bool) {
  let default_level = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match cli.command {
    Commands::Detect(args) => cmd::cmd_detect(&args, cli.output),
    Commands::Build(args) => cmd::cmd_build(&args, cli.output),
  }
}
