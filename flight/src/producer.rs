use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

/// The user-supplied function that produces the cached value.
///
/// Infallible producers are wrapped to return `Ok`, so the state machine only
/// ever deals with `Result<T, E>`.
pub(crate) enum Producer<T, E> {
  Sync(Arc<dyn Fn() -> Result<T, E> + Send + Sync>),
  Async(Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>),
}

impl<T, E> Producer<T, E> {
  pub(crate) fn is_async(&self) -> bool {
    matches!(self, Producer::Async(_))
  }

  /// Runs the producer to completion, awaiting it if it is asynchronous.
  pub(crate) async fn produce(&self) -> Result<T, E> {
    match self {
      Producer::Sync(f) => f(),
      Producer::Async(f) => f().await,
    }
  }
}

impl<T, E> fmt::Debug for Producer<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Producer::Sync(_) => f.write_str("Producer::Sync(..)"),
      Producer::Async(_) => f.write_str("Producer::Async(..)"),
    }
  }
}
