use crate::error::{HarnessError, Result};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// filter. Output goes to stderr so run reports on stdout stay parseable.
pub fn init() -> Result<()> {
  tracing_log::LogTracer::init().map_err(|e| HarnessError::LoggingInit(e.to_string()))?;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let subscriber = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .finish();

  tracing::subscriber::set_global_default(subscriber)
    .map_err(|e| HarnessError::LoggingInit(e.to_string()))
}
