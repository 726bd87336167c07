use crate::error::{poisoned_state, FlightError};
use crate::producer::Producer;
use crate::shared::{Claim, Flight, FlightShared, LoadState, WaitOutcome};
use crate::{AsyncSingleFlightCache, FlightBuilder, MetricsSnapshot, RacyCache, WaitStrategy};

use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A thread-safe, synchronous single-flight cache around one lazily produced
/// value.
///
/// Cloning the handle is cheap; all clones share the same slot.
#[derive(Debug)]
pub struct SingleFlightCache<T, E = Infallible> {
  pub(crate) shared: Arc<FlightShared<T, E>>,
}

impl<T, E> Clone for SingleFlightCache<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

// --- Constructors for infallible producers ---
impl<T> SingleFlightCache<T, Infallible> {
  /// Creates an empty cache that waits with [`WaitStrategy::Blocking`].
  pub fn new<F>(producer: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    Self::blocking(producer)
  }

  /// Creates an empty cache whose waiters park until the value is ready.
  pub fn blocking<F>(producer: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    Self::with_strategy(producer, WaitStrategy::Blocking)
  }

  /// Creates an empty cache whose waiters make a bounded attempt at the gate
  /// and then poll every [`WaitStrategy::DEFAULT_POLL_INTERVAL`].
  pub fn spin_poll<F>(producer: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    Self::with_strategy(producer, WaitStrategy::spin_poll())
  }

  /// Creates the unsynchronized reference variant over the same kind of
  /// producer. Only useful as a negative control in tests and benchmarks.
  pub fn racy_reference_for_testing<F>(producer: F) -> RacyCache<T>
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    RacyCache::new(producer)
  }

  fn with_strategy<F>(producer: F, wait_strategy: WaitStrategy) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    let producer = Producer::Sync(Arc::new(move || Ok(producer())));
    Self::from_shared(FlightShared::new(producer, wait_strategy, None))
  }
}

impl<T, E> SingleFlightCache<T, E> {
  /// Returns a builder for configuring the wait strategy, timeout and producer.
  pub fn builder() -> FlightBuilder<T, E> {
    FlightBuilder::new()
  }

  pub(crate) fn from_shared(shared: FlightShared<T, E>) -> Self {
    Self {
      shared: Arc::new(shared),
    }
  }

  /// Converts this synchronous handle into an asynchronous one over the same
  /// slot. This is a zero-cost conversion.
  ///
  /// The async handle ignores the wait strategy but honours the timeout.
  pub fn to_async(&self) -> AsyncSingleFlightCache<T, E> {
    AsyncSingleFlightCache {
      shared: self.shared.clone(),
    }
  }

  /// Returns the value, producing it first if no caller has yet.
  ///
  /// If the value is ready this is a single atomic load. Otherwise the first
  /// caller to find the cache empty runs the producer on its own thread, and
  /// every concurrent caller waits according to the wait strategy and then
  /// returns the same `Arc`.
  ///
  /// # Errors
  ///
  /// - [`FlightError::ProducerFailed`] if the production this caller ran or
  ///   waited on failed. The cache is empty again afterwards.
  /// - [`FlightError::Timeout`] if a timeout is configured and the value did
  ///   not become ready in time.
  ///
  /// # Panics
  ///
  /// Propagates a panic from the producer to the caller that ran it. Waiting
  /// callers are not affected; one of them runs the producer again.
  pub fn get(&self) -> Result<Arc<T>, FlightError<E>> {
    // 1. Fast path: ready values never touch the gate.
    if let Some(value) = self.shared.ready_value() {
      self.shared.metrics.fast_hits.fetch_add(1, Ordering::Relaxed);
      return Ok(value);
    }

    let deadline = self.shared.timeout.map(|timeout| Instant::now() + timeout);
    let mut joined = false;
    loop {
      // 2. Enter the gate and re-check the state under it.
      let claim = match self.shared.wait_strategy {
        WaitStrategy::Blocking => Some(self.shared.claim(&mut self.shared.gate.lock())),
        WaitStrategy::SpinPoll(interval) => self
          .shared
          .gate
          .try_lock_for(interval)
          .map(|mut gate| self.shared.claim(&mut gate)),
      };

      let outcome = match claim {
        Some(Claim::Ready(value)) => return Ok(value),
        // 3. We won `Empty -> Loading`: produce.
        Some(Claim::Lead(generation)) => return self.lead(generation),
        // 4. Someone else is producing: wait for them.
        Some(Claim::Join(generation)) => {
          if !joined {
            joined = true;
            self.shared.metrics.joins.fetch_add(1, Ordering::Relaxed);
          }
          self.wait(generation, deadline)
        }
        // The bounded attempt at the gate failed. Poll whatever is in flight.
        None => match self.shared.loading_generation() {
          Some(generation) => {
            if !joined {
              joined = true;
              self.shared.metrics.joins.fetch_add(1, Ordering::Relaxed);
            }
            self.wait(generation, deadline)
          }
          None => match self.shared.ready_value() {
            Some(value) => WaitOutcome::Ready(value),
            None => {
              thread::yield_now();
              WaitOutcome::Retry
            }
          },
        },
      };

      match outcome {
        WaitOutcome::Ready(value) => return Ok(value),
        WaitOutcome::Failed(err) => return Err(FlightError::ProducerFailed(err)),
        WaitOutcome::TimedOut => return Err(self.timed_out()),
        WaitOutcome::Retry => {
          if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(self.timed_out());
          }
        }
      }
    }
  }

  fn lead(&self, generation: u64) -> Result<Arc<T>, FlightError<E>> {
    // Dropped without `finish` if the producer panics, which hands the
    // flight to a waiter.
    let flight = Flight::new(&self.shared, generation);
    let result = match &self.shared.producer {
      Producer::Sync(produce) => produce(),
      Producer::Async(_) => poisoned_state("a synchronous handle cannot drive an async producer"),
    };
    flight.finish(result)
  }

  fn wait(&self, generation: u64, deadline: Option<Instant>) -> WaitOutcome<T, E> {
    tracing::trace!(generation, strategy = ?self.shared.wait_strategy, "waiting on in-flight production");
    match self.shared.wait_strategy {
      WaitStrategy::Blocking => self.shared.wait_blocking(generation, deadline),
      WaitStrategy::SpinPoll(interval) => self.shared.wait_polling(generation, interval, deadline),
    }
  }

  fn timed_out(&self) -> FlightError<E> {
    let bound = self.shared.timeout.unwrap_or_default();
    self.shared.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(?bound, "gave up waiting for the value");
    FlightError::Timeout(bound)
  }

  /// Returns the value if it is ready, without producing or waiting.
  pub fn peek(&self) -> Option<Arc<T>> {
    self.shared.ready_value()
  }

  pub fn state(&self) -> LoadState {
    self.shared.load_state()
  }

  pub fn is_ready(&self) -> bool {
    self.state() == LoadState::Ready
  }

  /// The number of times the producer has completed successfully.
  pub fn production_count(&self) -> u64 {
    self.shared.metrics.production_count()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn wait_strategy(&self) -> WaitStrategy {
    self.shared.wait_strategy
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.shared.timeout
  }
}
