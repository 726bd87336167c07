use crate::config::{StrategyKind, Variant};

use serde::Deserialize;

// --- Top Level Config ---
// Every field is optional so a file and the command line can each set any
// subset. Durations stay as humantime strings until processing.
#[derive(Debug, Deserialize, PartialEq, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct StampedeConfigRaw {
  #[serde(default)]
  pub callers: Option<usize>,
  #[serde(default)]
  pub runs: Option<usize>,
  #[serde(default)]
  pub variant: Option<Variant>,
  #[serde(default)]
  pub strategy: Option<StrategyKind>,
  #[serde(default)]
  pub poll_interval: Option<String>,
  #[serde(default)]
  pub producer_delay: Option<String>,
  #[serde(default)]
  pub timeout: Option<String>,
  #[serde(default)]
  pub value: Option<i64>,
}

impl StampedeConfigRaw {
  /// Returns `self` with every field that `overrides` sets replaced.
  pub fn overlay(self, overrides: StampedeConfigRaw) -> Self {
    Self {
      callers: overrides.callers.or(self.callers),
      runs: overrides.runs.or(self.runs),
      variant: overrides.variant.or(self.variant),
      strategy: overrides.strategy.or(self.strategy),
      poll_interval: overrides.poll_interval.or(self.poll_interval),
      producer_delay: overrides.producer_delay.or(self.producer_delay),
      timeout: overrides.timeout.or(self.timeout),
      value: overrides.value.or(self.value),
    }
  }
}
