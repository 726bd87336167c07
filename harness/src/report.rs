use crate::config::Variant;
use crate::error::{HarnessError, Result};

use std::fmt;
use std::time::Duration;

/// What one run observed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
  pub run: usize,
  pub variant: Variant,
  pub callers: usize,
  pub productions: u64,
  /// Callers that received a value other than the expected one.
  pub mismatches: usize,
  /// Callers whose `get()` returned an error.
  pub errors: usize,
  pub elapsed: Duration,
}

impl RunReport {
  pub fn stampeded(&self) -> bool {
    self.productions > 1
  }

  /// A guarded run must produce exactly once and hand every caller the
  /// expected value.
  pub fn violated(&self) -> bool {
    self.variant == Variant::Guarded
      && (self.productions != 1 || self.mismatches > 0 || self.errors > 0)
  }
}

impl fmt::Display for RunReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "run={} variant={} productions={} mismatches={} errors={} elapsed={:.2}s",
      self.run,
      self.variant,
      self.productions,
      self.mismatches,
      self.errors,
      self.elapsed.as_secs_f64()
    )
  }
}

/// All runs of one invocation.
#[derive(Debug, Clone, Default)]
pub struct Summary {
  pub reports: Vec<RunReport>,
}

impl Summary {
  pub fn push(&mut self, report: RunReport) {
    self.reports.push(report);
  }

  pub fn runs(&self) -> usize {
    self.reports.len()
  }

  pub fn stampeded_runs(&self) -> usize {
    self.reports.iter().filter(|report| report.stampeded()).count()
  }

  pub fn violated_runs(&self) -> usize {
    self.reports.iter().filter(|report| report.violated()).count()
  }

  pub fn max_productions(&self) -> u64 {
    self
      .reports
      .iter()
      .map(|report| report.productions)
      .max()
      .unwrap_or(0)
  }

  /// Fails with [`HarnessError::SingleFlightViolated`] if any guarded run
  /// broke the single-flight guarantee.
  pub fn check(&self) -> Result<()> {
    match self.violated_runs() {
      0 => Ok(()),
      failed_runs => Err(HarnessError::SingleFlightViolated {
        failed_runs,
        runs: self.runs(),
      }),
    }
  }
}

impl fmt::Display for Summary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "runs={} stampeded_runs={} max_productions={} violations={}",
      self.runs(),
      self.stampeded_runs(),
      self.max_productions(),
      self.violated_runs()
    )
  }
}
