// src/config/processed.rs
use crate::config::raw::StampedeConfigRaw;
use crate::config::{StrategyKind, Variant};
use crate::error::{HarnessError, Result};

use fibre_flight::WaitStrategy;
use std::time::Duration;

pub const DEFAULT_CALLERS: usize = 1000;
pub const DEFAULT_RUNS: usize = 1;
pub const DEFAULT_PRODUCER_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_VALUE: i64 = 123;

// --- Processed Config ---
#[derive(Debug, Clone, PartialEq)]
pub struct StampedeConfig {
  pub callers: usize,
  pub runs: usize,
  pub variant: Variant,
  pub wait_strategy: WaitStrategy,
  pub producer_delay: Duration,
  pub timeout: Option<Duration>,
  pub value: i64,
}

impl Default for StampedeConfig {
  fn default() -> Self {
    Self {
      callers: DEFAULT_CALLERS,
      runs: DEFAULT_RUNS,
      variant: Variant::Guarded,
      wait_strategy: WaitStrategy::Blocking,
      producer_delay: DEFAULT_PRODUCER_DELAY,
      timeout: None,
      value: DEFAULT_VALUE,
    }
  }
}

fn invalid(field: &str, message: impl Into<String>) -> HarnessError {
  HarnessError::InvalidConfigValue {
    field: field.to_string(),
    message: message.into(),
  }
}

fn parse_duration(field: &str, text: &str) -> Result<Duration> {
  humantime::parse_duration(text.trim())
    .map_err(|e| invalid(field, format!("'{}' is not a duration: {}", text, e)))
}

fn parse_positive_duration(field: &str, text: &str) -> Result<Duration> {
  let duration = parse_duration(field, text)?;
  if duration.is_zero() {
    return Err(invalid(field, "Must be greater than zero."));
  }
  Ok(duration)
}

/// Validates a raw configuration and fills in defaults.
pub fn process_raw_config(raw: StampedeConfigRaw) -> Result<StampedeConfig> {
  let defaults = StampedeConfig::default();

  // 1. Counts
  let callers = raw.callers.unwrap_or(defaults.callers);
  if callers == 0 {
    return Err(invalid("callers", "At least one caller is required."));
  }
  let runs = raw.runs.unwrap_or(defaults.runs);
  if runs == 0 {
    return Err(invalid("runs", "At least one run is required."));
  }

  // 2. Variant and how its callers wait
  let variant = raw.variant.unwrap_or_default();
  if variant == Variant::Racy {
    // The racy reference never waits, so waiting options would be silently ignored.
    if raw.strategy.is_some_and(|strategy| strategy != StrategyKind::Blocking) {
      return Err(invalid("strategy", "The racy variant does not wait."));
    }
    if raw.poll_interval.is_some() {
      return Err(invalid("poll_interval", "The racy variant does not wait."));
    }
    if raw.timeout.is_some() {
      return Err(invalid("timeout", "The racy variant does not wait."));
    }
  }

  let wait_strategy = match (raw.strategy.unwrap_or_default(), raw.poll_interval) {
    (StrategyKind::Blocking, None) => WaitStrategy::Blocking,
    (StrategyKind::Blocking, Some(_)) => {
      return Err(invalid(
        "poll_interval",
        "Only applies to the 'spin-poll' strategy.",
      ))
    }
    (StrategyKind::SpinPoll, None) => WaitStrategy::spin_poll(),
    (StrategyKind::SpinPoll, Some(text)) => {
      WaitStrategy::SpinPoll(parse_positive_duration("poll_interval", &text)?)
    }
  };

  // 3. Durations
  let producer_delay = match raw.producer_delay {
    Some(text) => parse_duration("producer_delay", &text)?,
    None => defaults.producer_delay,
  };
  let timeout = raw
    .timeout
    .map(|text| parse_positive_duration("timeout", &text))
    .transpose()?;

  Ok(StampedeConfig {
    callers,
    runs,
    variant,
    wait_strategy,
    producer_delay,
    timeout,
    value: raw.value.unwrap_or(defaults.value),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn process_raw_config_fills_in_defaults() {
    let config = process_raw_config(StampedeConfigRaw::default()).unwrap();
    assert_eq!(config, StampedeConfig::default());
  }

  #[test]
  fn process_raw_config_parses_humantime_durations() {
    let raw = StampedeConfigRaw {
      strategy: Some(StrategyKind::SpinPoll),
      poll_interval: Some("250us".to_string()),
      producer_delay: Some("1s 500ms".to_string()),
      timeout: Some("2m".to_string()),
      ..Default::default()
    };
    let config = process_raw_config(raw).unwrap();

    assert_eq!(
      config.wait_strategy,
      WaitStrategy::SpinPoll(Duration::from_micros(250))
    );
    assert_eq!(config.producer_delay, Duration::from_millis(1500));
    assert_eq!(config.timeout, Some(Duration::from_secs(120)));
  }

  #[test]
  fn process_raw_config_rejects_zero_counts() {
    let raw = StampedeConfigRaw {
      callers: Some(0),
      ..Default::default()
    };
    match process_raw_config(raw) {
      Err(HarnessError::InvalidConfigValue { field, .. }) => assert_eq!(field, "callers"),
      other => panic!("Expected InvalidConfigValue, got {:?}", other),
    }

    let raw = StampedeConfigRaw {
      runs: Some(0),
      ..Default::default()
    };
    assert!(matches!(
      process_raw_config(raw),
      Err(HarnessError::InvalidConfigValue { field, .. }) if field == "runs"
    ));
  }

  #[test]
  fn process_raw_config_rejects_bad_durations() {
    let raw = StampedeConfigRaw {
      producer_delay: Some("soon".to_string()),
      ..Default::default()
    };
    assert!(matches!(
      process_raw_config(raw),
      Err(HarnessError::InvalidConfigValue { field, .. }) if field == "producer_delay"
    ));

    let raw = StampedeConfigRaw {
      timeout: Some("0s".to_string()),
      ..Default::default()
    };
    assert!(matches!(
      process_raw_config(raw),
      Err(HarnessError::InvalidConfigValue { field, .. }) if field == "timeout"
    ));
  }

  #[test]
  fn process_raw_config_rejects_poll_interval_without_spin_poll() {
    let raw = StampedeConfigRaw {
      poll_interval: Some("1ms".to_string()),
      ..Default::default()
    };
    assert!(matches!(
      process_raw_config(raw),
      Err(HarnessError::InvalidConfigValue { field, .. }) if field == "poll_interval"
    ));
  }

  #[test]
  fn process_raw_config_rejects_wait_options_for_racy_variant() {
    let raw = StampedeConfigRaw {
      variant: Some(Variant::Racy),
      strategy: Some(StrategyKind::SpinPoll),
      ..Default::default()
    };
    assert!(matches!(
      process_raw_config(raw),
      Err(HarnessError::InvalidConfigValue { field, .. }) if field == "strategy"
    ));

    let raw = StampedeConfigRaw {
      variant: Some(Variant::Racy),
      timeout: Some("1s".to_string()),
      ..Default::default()
    };
    assert!(matches!(
      process_raw_config(raw),
      Err(HarnessError::InvalidConfigValue { field, .. }) if field == "timeout"
    ));
  }

  #[test]
  fn overlay_prefers_override_values() {
    let file = StampedeConfigRaw {
      callers: Some(10),
      runs: Some(3),
      value: Some(7),
      ..Default::default()
    };
    let overrides = StampedeConfigRaw {
      callers: Some(50),
      ..Default::default()
    };
    let merged = file.overlay(overrides);

    assert_eq!(merged.callers, Some(50));
    assert_eq!(merged.runs, Some(3));
    assert_eq!(merged.value, Some(7));
  }
}
