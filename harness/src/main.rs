//! Stampede - single-flight cache stress driver
//!
//! CLI entry point: resolves the configuration, runs the stampedes and exits
//! non-zero if a guarded cache ever produced more than once.

use clap::Parser;
use fibre_flight_harness::cli::Cli;
use fibre_flight_harness::{config, logging, run, Result};
use std::process::ExitCode;

fn main() -> ExitCode {
  if let Err(e) = logging::init() {
    eprintln!("Error: {}", e);
    return ExitCode::FAILURE;
  }

  match try_main() {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      tracing::error!(error = %e, "stampede failed");
      eprintln!("Error: {}", e);
      ExitCode::FAILURE
    }
  }
}

fn try_main() -> Result<()> {
  let cli = Cli::parse();
  let config = config::resolve(cli.config.as_deref(), cli.overrides())?;

  let summary = run::run_all(&config, |report| println!("{}", report))?;
  println!("{}", summary);
  summary.check()
}
