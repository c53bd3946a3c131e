mod cmd;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use dtseed_lib::consts::APP_NAME;

use crate::cmd::SeedArgs;
use crate::output::{OutputFormat, print_error};

/// Seed a Dependency-Track instance with a target number of projects
#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(flatten)]
  seed: SeedArgs,

  /// Summary format
  #[arg(short, long, value_enum, default_value_t)]
  output: OutputFormat,

  /// Enable debug logging
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
  let filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cmd::cmd_seed(&cli.seed, cli.output) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
