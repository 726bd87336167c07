use crate::error::{poisoned_state, FlightError};
use crate::metrics::Metrics;
use crate::producer::Producer;
use crate::strategy::{self, PollOutcome, WaitStrategy};
use crate::waiter::{Waiter, WaiterQueue};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

const EMPTY: u8 = 0;
const LOADING: u8 = 1;
const READY: u8 = 2;

/// How many recent failed flights keep their error for late waiters.
const FAILURE_HISTORY: usize = 16;

/// The observable state of a single-flight cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
  /// No value and no production in flight.
  Empty,
  /// Exactly one caller is running the producer.
  Loading,
  /// The value is present and will never change.
  Ready,
}

impl LoadState {
  fn from_raw(raw: u8) -> Self {
    match raw {
      EMPTY => LoadState::Empty,
      LOADING => LoadState::Loading,
      READY => LoadState::Ready,
      other => poisoned_state(&format!("unknown load state {}", other)),
    }
  }
}

/// Everything guarded by the gate mutex.
pub(crate) struct Gate<E> {
  /// Incremented each time a caller wins `Empty -> Loading`.
  generation: u64,
  /// Errors of recent failed flights, oldest first, tagged with their
  /// generation. A waiter that wakes after a newer flight has also failed
  /// still finds its own error here.
  failures: VecDeque<(u64, Arc<E>)>,
  waiters: WaiterQueue,
}

/// The result of trying to enter the state machine while holding the gate.
pub(crate) enum Claim<T> {
  Ready(Arc<T>),
  /// The caller won `Empty -> Loading` and must run the producer.
  Lead(u64),
  /// Another caller is producing; wait on the given generation.
  Join(u64),
}

/// How a wait on an in-flight production ended.
pub(crate) enum WaitOutcome<T, E> {
  Ready(Arc<T>),
  /// The flight this caller joined failed with this error.
  Failed(Arc<E>),
  /// The flight ended without a value or an error (its leader panicked or was
  /// cancelled). The caller should start over.
  Retry,
  TimedOut,
}

/// The shared core behind every handle to one cache instance.
pub(crate) struct FlightShared<T, E> {
  state: CachePadded<AtomicU8>,
  // Mirrors `Gate::generation` for pollers that never take the gate.
  generation: CachePadded<AtomicU64>,
  slot: OnceCell<Arc<T>>,
  pub(crate) gate: Mutex<Gate<E>>,
  pub(crate) producer: Producer<T, E>,
  pub(crate) wait_strategy: WaitStrategy,
  pub(crate) timeout: Option<Duration>,
  pub(crate) metrics: Metrics,
}

impl<T, E> FlightShared<T, E> {
  pub(crate) fn new(
    producer: Producer<T, E>,
    wait_strategy: WaitStrategy,
    timeout: Option<Duration>,
  ) -> Self {
    Self {
      state: CachePadded::new(AtomicU8::new(EMPTY)),
      generation: CachePadded::new(AtomicU64::new(0)),
      slot: OnceCell::new(),
      gate: Mutex::new(Gate {
        generation: 0,
        failures: VecDeque::new(),
        waiters: WaiterQueue::default(),
      }),
      producer,
      wait_strategy,
      timeout,
      metrics: Metrics::new(),
    }
  }

  pub(crate) fn load_state(&self) -> LoadState {
    LoadState::from_raw(self.state.load(Ordering::Acquire))
  }

  /// The lock-free read path. Returns the value if the state is `Ready`.
  #[inline]
  pub(crate) fn ready_value(&self) -> Option<Arc<T>> {
    if self.state.load(Ordering::Acquire) == READY {
      Some(self.ready_slot())
    } else {
      None
    }
  }

  /// Reads the slot after `Ready` has been observed.
  fn ready_slot(&self) -> Arc<T> {
    match self.slot.get() {
      Some(value) => value.clone(),
      None => poisoned_state("state is Ready but the value slot is empty"),
    }
  }

  /// The generation of the flight in progress, read without the gate.
  ///
  /// The state is read first: the generation is published before `Loading`,
  /// so the value returned is never older than the flight that was observed.
  pub(crate) fn loading_generation(&self) -> Option<u64> {
    if self.state.load(Ordering::Acquire) == LOADING {
      Some(self.generation.load(Ordering::Acquire))
    } else {
      None
    }
  }

  /// Whether a poller waiting on `generation` should keep waiting.
  fn still_loading(&self, generation: u64) -> bool {
    self.state.load(Ordering::Acquire) == LOADING
      && self.generation.load(Ordering::Acquire) == generation
  }

  fn transition(&self, from: u8, to: u8) {
    if self
      .state
      .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      poisoned_state(&format!(
        "expected state {:?} for transition to {:?}, found {:?}",
        LoadState::from_raw(from),
        LoadState::from_raw(to),
        self.load_state()
      ));
    }
  }

  /// Decides what the caller holding `gate` should do. At most one caller per
  /// flight gets `Claim::Lead`.
  pub(crate) fn claim(&self, gate: &mut Gate<E>) -> Claim<T> {
    match self.state.load(Ordering::Acquire) {
      READY => Claim::Ready(self.ready_slot()),
      LOADING => Claim::Join(gate.generation),
      _ => {
        gate.generation += 1;
        // Published before the state so a poller that sees `Loading` never
        // pairs it with the previous flight's generation.
        self.generation.store(gate.generation, Ordering::Release);
        self.transition(EMPTY, LOADING);
        tracing::debug!(generation = gate.generation, "won the right to produce");
        Claim::Lead(gate.generation)
      }
    }
  }

  /// Examines the state on behalf of a caller that joined `generation`.
  /// Returns `None` while that flight is still running.
  fn resolve(&self, gate: &Gate<E>, generation: u64) -> Option<WaitOutcome<T, E>> {
    match self.state.load(Ordering::Acquire) {
      READY => Some(WaitOutcome::Ready(self.ready_slot())),
      LOADING if gate.generation == generation => None,
      // Our flight ended without a value. A newer one may already be running.
      _ => Some(
        match gate.failures.iter().find(|(failed, _)| *failed == generation) {
          Some((_, err)) => WaitOutcome::Failed(err.clone()),
          None => WaitOutcome::Retry,
        },
      ),
    }
  }

  /// Publishes the leader's result and wakes every waiter.
  fn finish(&self, generation: u64, result: Result<T, E>) -> Result<Arc<T>, FlightError<E>> {
    match result {
      Ok(value) => {
        let value = Arc::new(value);
        // The slot is written before the `Release` transition to `Ready`, so
        // any caller that observes `Ready` observes the complete value.
        if self.slot.set(value.clone()).is_err() {
          poisoned_state("a second production completed after the value was stored");
        }
        self.metrics.productions.fetch_add(1, Ordering::Relaxed);

        let mut gate = self.gate.lock();
        self.transition(LOADING, READY);
        gate.failures.clear();
        let woken = gate.waiters.wake_all();
        tracing::debug!(generation, woken, "production complete");
        Ok(value)
      }
      Err(err) => {
        let err = Arc::new(err);
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);

        let mut gate = self.gate.lock();
        if gate.failures.len() == FAILURE_HISTORY {
          gate.failures.pop_front();
        }
        gate.failures.push_back((generation, err.clone()));
        self.transition(LOADING, EMPTY);
        let woken = gate.waiters.wake_all();
        tracing::warn!(generation, woken, "producer failed; slot reverted to empty");
        Err(FlightError::ProducerFailed(err))
      }
    }
  }

  /// Reverts a flight whose leader never finished.
  fn abandon(&self, generation: u64) {
    self.metrics.abandoned.fetch_add(1, Ordering::Relaxed);

    let mut gate = self.gate.lock();
    self.transition(LOADING, EMPTY);
    let woken = gate.waiters.wake_all();
    tracing::warn!(generation, woken, "producer did not finish; slot reverted to empty");
  }

  /// Parks the current thread until the flight for `generation` ends or the
  /// deadline passes.
  pub(crate) fn wait_blocking(&self, generation: u64, deadline: Option<Instant>) -> WaitOutcome<T, E> {
    let mut gate = self.gate.lock();
    let id = gate.waiters.next_id();
    loop {
      if let Some(outcome) = self.resolve(&gate, generation) {
        gate.waiters.remove(id);
        return outcome;
      }

      let now = Instant::now();
      if deadline.is_some_and(|deadline| now >= deadline) {
        gate.waiters.remove(id);
        return WaitOutcome::TimedOut;
      }

      // Re-registered on every pass: a wakeup drains the queue.
      gate.waiters.register(id, Waiter::Sync(thread::current()));
      drop(gate); // Unlock before parking.
      match deadline {
        Some(deadline) => thread::park_timeout(deadline - now),
        None => thread::park(),
      }
      gate = self.gate.lock();
    }
  }

  /// Polls the load state until the flight for `generation` ends or the
  /// deadline passes. Never registers as a waiter.
  pub(crate) fn wait_polling(
    &self,
    generation: u64,
    interval: Duration,
    deadline: Option<Instant>,
  ) -> WaitOutcome<T, E> {
    let polled = strategy::poll_until(interval, deadline, || self.still_loading(generation));
    if let Some(value) = self.ready_value() {
      return WaitOutcome::Ready(value);
    }

    let gate = self.gate.lock();
    match self.resolve(&gate, generation) {
      Some(outcome) => outcome,
      None => {
        debug_assert_eq!(polled, PollOutcome::TimedOut);
        WaitOutcome::TimedOut
      }
    }
  }

  /// The async counterpart of `wait_blocking`: registers `waker` under `id`
  /// until the flight for `generation` ends.
  pub(crate) fn poll_join(
    &self,
    generation: u64,
    id: &mut Option<u64>,
    waker: &Waker,
  ) -> Poll<WaitOutcome<T, E>> {
    let mut gate = self.gate.lock();
    if let Some(outcome) = self.resolve(&gate, generation) {
      if let Some(id) = id.take() {
        gate.waiters.remove(id);
      }
      return Poll::Ready(outcome);
    }

    let waiter_id = match *id {
      Some(existing) => existing,
      None => {
        let fresh = gate.waiters.next_id();
        *id = Some(fresh);
        fresh
      }
    };
    gate.waiters.register(waiter_id, Waiter::Async(waker.clone()));
    Poll::Pending
  }

  pub(crate) fn deregister(&self, id: u64) {
    self.gate.lock().waiters.remove(id);
  }

  #[cfg(test)]
  pub(crate) fn waiter_count(&self) -> usize {
    self.gate.lock().waiters.len()
  }
}

impl<T, E> fmt::Debug for FlightShared<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FlightShared")
      .field("state", &self.load_state())
      .field("generation", &self.generation.load(Ordering::Relaxed))
      .field("producer", &self.producer)
      .field("wait_strategy", &self.wait_strategy)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}

/// Held by the caller that won `Empty -> Loading`.
///
/// If it is dropped without `finish` (the producer panicked, or the leading
/// future was cancelled), the flight is abandoned so a waiter can take over.
pub(crate) struct Flight<'a, T, E> {
  shared: &'a FlightShared<T, E>,
  generation: u64,
  finished: bool,
}

impl<'a, T, E> Flight<'a, T, E> {
  pub(crate) fn new(shared: &'a FlightShared<T, E>, generation: u64) -> Self {
    Self {
      shared,
      generation,
      finished: false,
    }
  }

  pub(crate) fn finish(mut self, result: Result<T, E>) -> Result<Arc<T>, FlightError<E>> {
    self.finished = true;
    self.shared.finish(self.generation, result)
  }
}

impl<'a, T, E> Drop for Flight<'a, T, E> {
  fn drop(&mut self) {
    if !self.finished {
      self.shared.abandon(self.generation);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn shared() -> FlightShared<u32, String> {
    FlightShared::new(
      Producer::Sync(Arc::new(|| Ok(7))),
      WaitStrategy::Blocking,
      None,
    )
  }

  #[test]
  fn test_first_claim_leads_second_joins() {
    let shared = shared();
    let mut gate = shared.gate.lock();

    let first = shared.claim(&mut gate);
    assert!(matches!(first, Claim::Lead(1)));
    assert_eq!(shared.load_state(), LoadState::Loading);

    let second = shared.claim(&mut gate);
    assert!(matches!(second, Claim::Join(1)));
  }

  #[test]
  fn test_finish_publishes_value_and_becomes_ready() {
    let shared = shared();
    let generation = match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };

    let value = Flight::new(&shared, generation).finish(Ok(7)).unwrap();
    assert_eq!(*value, 7);
    assert_eq!(shared.load_state(), LoadState::Ready);
    assert_eq!(shared.ready_value().as_deref(), Some(&7));
    assert_eq!(shared.metrics.production_count(), 1);
    assert!(matches!(shared.claim(&mut shared.gate.lock()), Claim::Ready(_)));
  }

  #[test]
  fn test_failure_reverts_to_empty_and_is_tagged_with_generation() {
    let shared = shared();
    let generation = match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };

    let err = Flight::new(&shared, generation)
      .finish(Err("db down".to_string()))
      .unwrap_err();
    assert_eq!(err.producer_error().map(String::as_str), Some("db down"));
    assert_eq!(shared.load_state(), LoadState::Empty);

    let gate = shared.gate.lock();
    match shared.resolve(&gate, generation) {
      Some(WaitOutcome::Failed(err)) => assert_eq!(*err, "db down"),
      _ => panic!("A waiter of the failed flight should see its error"),
    }
  }

  #[test]
  fn test_dropped_flight_is_abandoned() {
    let shared = shared();
    let generation = match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };

    drop(Flight::new(&shared, generation));
    assert_eq!(shared.load_state(), LoadState::Empty);
    assert_eq!(shared.metrics.snapshot().abandoned, 1);

    let gate = shared.gate.lock();
    assert!(matches!(
      shared.resolve(&gate, generation),
      Some(WaitOutcome::Retry)
    ));
  }

  #[test]
  fn test_new_flight_after_failure_gets_new_generation() {
    let shared = shared();
    let first = match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };
    let _ = Flight::new(&shared, first).finish(Err("boom".to_string()));

    let second = match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead again after a failure"),
    };
    assert_eq!(second, first + 1);

    // A waiter of the first flight is told about its failure, not left
    // waiting on the second one.
    let gate = shared.gate.lock();
    assert!(matches!(
      shared.resolve(&gate, first),
      Some(WaitOutcome::Failed(_))
    ));
    assert!(shared.resolve(&gate, second).is_none());
  }

  #[test]
  fn test_late_waiter_gets_its_own_flights_error_after_a_newer_failure() {
    let shared = shared();
    let lead = |shared: &FlightShared<u32, String>| match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };

    let first = lead(&shared);
    let _ = Flight::new(&shared, first).finish(Err("first".to_string()));
    let second = lead(&shared);
    let _ = Flight::new(&shared, second).finish(Err("second".to_string()));

    // A waiter of the first flight that only wakes now.
    let gate = shared.gate.lock();
    match shared.resolve(&gate, first) {
      Some(WaitOutcome::Failed(err)) => assert_eq!(*err, "first"),
      _ => panic!("A waiter of the first flight should see the first error"),
    }
    match shared.resolve(&gate, second) {
      Some(WaitOutcome::Failed(err)) => assert_eq!(*err, "second"),
      _ => panic!("A waiter of the second flight should see the second error"),
    }
  }

  #[test]
  fn test_failure_history_is_bounded_and_cleared_on_success() {
    let shared = shared();
    let lead = |shared: &FlightShared<u32, String>| match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };

    let oldest = lead(&shared);
    let _ = Flight::new(&shared, oldest).finish(Err("oldest".to_string()));
    for _ in 0..FAILURE_HISTORY {
      let generation = lead(&shared);
      let _ = Flight::new(&shared, generation).finish(Err("later".to_string()));
    }
    {
      let gate = shared.gate.lock();
      assert_eq!(gate.failures.len(), FAILURE_HISTORY);
      assert!(matches!(shared.resolve(&gate, oldest), Some(WaitOutcome::Retry)));
    }

    let last = lead(&shared);
    let _ = Flight::new(&shared, last).finish(Ok(7));
    assert!(shared.gate.lock().failures.is_empty());
  }

  #[test]
  fn test_blocking_wait_times_out_and_deregisters() {
    let shared = shared();
    let generation = match shared.claim(&mut shared.gate.lock()) {
      Claim::Lead(generation) => generation,
      _ => panic!("Expected to lead"),
    };

    let deadline = Instant::now() + Duration::from_millis(20);
    assert!(matches!(
      shared.wait_blocking(generation, Some(deadline)),
      WaitOutcome::TimedOut
    ));
    assert_eq!(shared.waiter_count(), 0);

    // Keep the flight alive until here; dropping it abandons.
    drop(Flight::new(&shared, generation));
  }

  #[test]
  #[should_panic(expected = "PoisonedState")]
  fn test_ready_without_value_is_fatal() {
    let shared = shared();
    shared.state.store(READY, Ordering::Release);
    let _ = shared.ready_value();
  }
}
