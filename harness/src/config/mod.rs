//! Stampede configuration: a YAML file read into [`raw`] structs, overlaid
//! with command line overrides and validated into a [`StampedeConfig`].

pub mod processed;
pub mod raw;

pub use processed::{process_raw_config, StampedeConfig};
pub use raw::StampedeConfigRaw;

use crate::error::{HarnessError, Result};

use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Which cache implementation a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
  /// The single-flight cache.
  #[default]
  Guarded,
  /// The unsynchronized reference variant.
  Racy,
}

impl fmt::Display for Variant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Variant::Guarded => f.write_str("guarded"),
      Variant::Racy => f.write_str("racy"),
    }
  }
}

/// How guarded callers wait for the production to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
  #[default]
  Blocking,
  SpinPoll,
}

/// Reads the raw configuration from a YAML file.
pub fn load_config_file(path: &Path) -> Result<StampedeConfigRaw> {
  let file = File::open(path)?;
  let reader = BufReader::new(file);
  serde_yaml::from_reader(reader).map_err(|e| HarnessError::ConfigParse(e.to_string()))
}

/// Builds the effective configuration: the file's values (if a file is
/// given), then `overrides` on top, then defaults for anything still unset.
pub fn resolve(path: Option<&Path>, overrides: StampedeConfigRaw) -> Result<StampedeConfig> {
  let file_config = match path {
    Some(path) => {
      tracing::debug!(?path, "loading stampede configuration");
      load_config_file(path)?
    }
    None => StampedeConfigRaw::default(),
  };
  process_raw_config(file_config.overlay(overrides))
}
