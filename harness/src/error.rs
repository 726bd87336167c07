use fibre_flight::BuildError;
use thiserror::Error;

/// The main error type for the `stampede` harness.
#[derive(Debug, Error)]
pub enum HarnessError {
  #[error("Failed to read configuration file: {0}")]
  ConfigRead(#[from] std::io::Error),

  #[error("Failed to parse configuration: {0}")]
  ConfigParse(String),

  #[error("Invalid configuration value for '{field}': {message}")]
  InvalidConfigValue { field: String, message: String },

  #[error("Failed to build the cache under test: {0}")]
  Build(#[from] BuildError),

  #[error("Failed to initialize logging: {0}")]
  LoggingInit(String),

  #[error("Failed to start caller thread {spawned} of run {run}: {source}")]
  CallerSpawn {
    run: usize,
    spawned: usize,
    #[source]
    source: std::io::Error,
  },

  #[error("A caller thread panicked during run {run}")]
  CallerPanicked { run: usize },

  #[error("Single-flight violated in {failed_runs} of {runs} runs")]
  SingleFlightViolated { failed_runs: usize, runs: usize },
}

/// A specialized `Result` type for harness operations.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
