//! CLI argument definitions using clap derive

use crate::config::{StampedeConfigRaw, StrategyKind, Variant};

use clap::Parser;
use std::path::PathBuf;

/// Stampede - drive a single-flight cache with a herd of concurrent callers
///
/// Every run builds a fresh cache, releases all callers at once and reports
/// how many times the producer ran. Flags override values from `--config`.
#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  /// YAML configuration file
  #[arg(short, long, env = "STAMPEDE_CONFIG")]
  pub config: Option<PathBuf>,

  /// Number of concurrent callers per run [default: 1000]
  #[arg(short = 'n', long)]
  pub callers: Option<usize>,

  /// Number of runs, each against a fresh cache [default: 1]
  #[arg(short, long)]
  pub runs: Option<usize>,

  /// Cache implementation to drive [default: guarded]
  #[arg(long, value_enum)]
  pub variant: Option<Variant>,

  /// How guarded callers wait for the value [default: blocking]
  #[arg(long, value_enum)]
  pub strategy: Option<StrategyKind>,

  /// Poll interval for the spin-poll strategy, e.g. "100us"
  #[arg(long)]
  pub poll_interval: Option<String>,

  /// Time the producer sleeps before returning, e.g. "1s" [default: 1s]
  #[arg(long)]
  pub producer_delay: Option<String>,

  /// Upper bound on how long a caller waits, e.g. "5s"
  #[arg(long)]
  pub timeout: Option<String>,

  /// Value the producer returns [default: 123]
  #[arg(long, allow_negative_numbers = true)]
  pub value: Option<i64>,
}

impl Cli {
  /// The flags given on the command line, as a raw config to overlay on the file.
  pub fn overrides(&self) -> StampedeConfigRaw {
    StampedeConfigRaw {
      callers: self.callers,
      runs: self.runs,
      variant: self.variant,
      strategy: self.strategy,
      poll_interval: self.poll_interval.clone(),
      producer_delay: self.producer_delay.clone(),
      timeout: self.timeout.clone(),
      value: self.value,
    }
  }
}
