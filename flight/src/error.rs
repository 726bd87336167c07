use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Errors returned by `get()` on a single-flight cache.
///
/// `E` is the producer's own error type. It is shared behind an `Arc` because
/// one failed production is reported to every caller that waited on it.
#[derive(Debug, thiserror::Error)]
pub enum FlightError<E = Infallible> {
  /// The producer returned an error. The cache has reverted to empty, so a
  /// later `get()` starts a new production.
  #[error("producer failed: {0}")]
  ProducerFailed(Arc<E>),
  /// The caller waited longer than the configured bound for the value.
  #[error("timed out after {0:?} waiting for the value to be produced")]
  Timeout(Duration),
}

// Derived `Clone` would require `E: Clone`, which the `Arc` makes unnecessary.
impl<E> Clone for FlightError<E> {
  fn clone(&self) -> Self {
    match self {
      FlightError::ProducerFailed(err) => FlightError::ProducerFailed(err.clone()),
      FlightError::Timeout(bound) => FlightError::Timeout(*bound),
    }
  }
}

impl<E> FlightError<E> {
  /// Returns the producer's error if this is a `ProducerFailed`.
  pub fn producer_error(&self) -> Option<&E> {
    match self {
      FlightError::ProducerFailed(err) => Some(err.as_ref()),
      FlightError::Timeout(_) => None,
    }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, FlightError::Timeout(_))
  }
}

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// `build()` or `build_async()` was called before a producer was set.
  MissingProducer,
  /// A `SpinPoll` wait strategy was configured with a zero interval, which
  /// would turn the poll loop into an unbounded busy-spin.
  ZeroPollInterval,
  /// A timeout of zero was configured; every wait would fail immediately.
  ZeroTimeout,
  /// An async producer was given to `build()`. Use `build_async()` instead.
  AsyncProducerRequiresAsyncCache,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::MissingProducer => write!(f, "a producer must be set before building"),
      BuildError::ZeroPollInterval => write!(f, "spin-poll interval cannot be zero"),
      BuildError::ZeroTimeout => write!(f, "wait timeout cannot be zero"),
      BuildError::AsyncProducerRequiresAsyncCache => write!(
        f,
        "an async producer can only be used with build_async()"
      ),
    }
  }
}

impl std::error::Error for BuildError {}

/// Aborts on an internal invariant violation.
///
/// Continuing after one of these would silently break the single-flight
/// guarantee, so it is never surfaced as a recoverable error.
#[cold]
#[track_caller]
pub(crate) fn poisoned_state(reason: &str) -> ! {
  tracing::error!(reason, "single-flight state poisoned");
  panic!("PoisonedState: {}", reason);
}
