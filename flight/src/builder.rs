use crate::error::BuildError;
use crate::handles::{AsyncSingleFlightCache, SingleFlightCache};
use crate::producer::Producer;
use crate::shared::FlightShared;
use crate::WaitStrategy;

use core::fmt;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

/// A builder for creating `SingleFlightCache` and `AsyncSingleFlightCache`
/// instances.
pub struct FlightBuilder<T, E = Infallible> {
  wait_strategy: WaitStrategy,
  timeout: Option<Duration>,
  producer: Option<Producer<T, E>>,
}

impl<T, E> fmt::Debug for FlightBuilder<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FlightBuilder")
      .field("wait_strategy", &self.wait_strategy)
      .field("timeout", &self.timeout)
      .field("producer", &self.producer)
      .finish()
  }
}

impl<T, E> Default for FlightBuilder<T, E> {
  fn default() -> Self {
    Self {
      wait_strategy: WaitStrategy::default(),
      timeout: None,
      producer: None,
    }
  }
}

// --- General Configuration Methods ---
impl<T, E> FlightBuilder<T, E> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets how synchronous callers wait for an in-flight production.
  ///
  /// Defaults to [`WaitStrategy::Blocking`]. Async callers always wait by
  /// registering their waker.
  pub fn wait_strategy(mut self, wait_strategy: WaitStrategy) -> Self {
    self.wait_strategy = wait_strategy;
    self
  }

  /// Shorthand for `wait_strategy(WaitStrategy::SpinPoll(interval))`.
  pub fn spin_poll(self, interval: Duration) -> Self {
    self.wait_strategy(WaitStrategy::SpinPoll(interval))
  }

  /// Bounds how long a single `get()` may wait for another caller's
  /// production. The caller running the producer is never interrupted.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Sets a fallible synchronous producer.
  ///
  /// A failed production is reported to the caller that ran it and to every
  /// caller waiting on it; the cache then reverts to empty.
  pub fn try_producer<F>(mut self, producer: F) -> Self
  where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
  {
    self.producer = Some(Producer::Sync(Arc::new(producer)));
    self
  }

  /// Sets a fallible asynchronous producer. Requires `build_async()`.
  pub fn try_async_producer<F, Fut>(mut self, producer: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.producer = Some(Producer::Async(Arc::new(move || producer().boxed())));
    self
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.producer.is_none() {
      return Err(BuildError::MissingProducer);
    }
    if self.wait_strategy.poll_interval() == Some(Duration::ZERO) {
      return Err(BuildError::ZeroPollInterval);
    }
    if self.timeout == Some(Duration::ZERO) {
      return Err(BuildError::ZeroTimeout);
    }
    Ok(())
  }

  fn into_shared(self) -> Result<FlightShared<T, E>, BuildError> {
    self.validate()?;
    let producer = self.producer.ok_or(BuildError::MissingProducer)?;
    Ok(FlightShared::new(producer, self.wait_strategy, self.timeout))
  }

  /// Builds a synchronous cache. The producer must be synchronous.
  pub fn build(self) -> Result<SingleFlightCache<T, E>, BuildError> {
    if self.producer.as_ref().is_some_and(Producer::is_async) {
      return Err(BuildError::AsyncProducerRequiresAsyncCache);
    }
    Ok(SingleFlightCache::from_shared(self.into_shared()?))
  }

  /// Builds an asynchronous cache. Accepts either kind of producer; a
  /// synchronous one runs inline on the leading task.
  pub fn build_async(self) -> Result<AsyncSingleFlightCache<T, E>, BuildError> {
    Ok(AsyncSingleFlightCache::from_shared(self.into_shared()?))
  }
}

// --- Infallible Producers ---
impl<T: 'static> FlightBuilder<T, Infallible> {
  /// Sets an infallible synchronous producer.
  pub fn producer<F>(self, producer: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    self.try_producer(move || Ok(producer()))
  }

  /// Sets an infallible asynchronous producer. Requires `build_async()`.
  pub fn async_producer<F, Fut>(self, producer: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    self.try_async_producer(move || producer().map(Ok))
  }
}
