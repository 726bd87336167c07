use crate::error::FlightError;
use crate::producer::Producer;
use crate::shared::{Claim, Flight, FlightShared, LoadState, WaitOutcome};
use crate::{FlightBuilder, MetricsSnapshot, WaitStrategy};

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use futures_util::task::AtomicWaker;
use futures_util::FutureExt;

// --- AsyncSingleFlightCache Implementation ---

/// A thread-safe, asynchronous single-flight cache around one lazily produced
/// value.
///
/// The leader runs the producer inline in its own task; waiting tasks are
/// woken when it finishes. No task is ever spawned and no runtime timer is
/// used, so any executor works, including with a timeout.
#[derive(Debug)]
pub struct AsyncSingleFlightCache<T, E = Infallible> {
  pub(crate) shared: Arc<FlightShared<T, E>>,
}

impl<T, E> Clone for AsyncSingleFlightCache<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T: 'static> AsyncSingleFlightCache<T, Infallible> {
  /// Creates an empty cache around an infallible async producer.
  pub fn new<F, Fut>(producer: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    let producer = Producer::Async(Arc::new(move || producer().map(Ok).boxed()));
    Self::from_shared(FlightShared::new(producer, WaitStrategy::Blocking, None))
  }
}

impl<T, E> AsyncSingleFlightCache<T, E> {
  /// Returns a builder for configuring the timeout and producer.
  pub fn builder() -> FlightBuilder<T, E> {
    FlightBuilder::new()
  }

  pub(crate) fn from_shared(shared: FlightShared<T, E>) -> Self {
    Self {
      shared: Arc::new(shared),
    }
  }

  /// Asynchronously returns the value, producing it first if no caller has yet.
  ///
  /// The same single-flight guarantee as the synchronous `get` holds across
  /// any mix of tasks and threads sharing the slot.
  ///
  /// If the future of the task running the producer is dropped before it
  /// finishes, the production is abandoned and a waiting task takes over.
  ///
  /// # Errors
  ///
  /// - [`FlightError::ProducerFailed`] if the production this task ran or
  ///   waited on failed.
  /// - [`FlightError::Timeout`] if a timeout is configured and the value did
  ///   not become ready in time. The deadline needs no runtime timer.
  pub async fn get(&self) -> Result<Arc<T>, FlightError<E>> {
    // 1. Fast path.
    if let Some(value) = self.shared.ready_value() {
      self.shared.metrics.fast_hits.fetch_add(1, Ordering::Relaxed);
      return Ok(value);
    }

    let deadline = self.shared.timeout.map(|timeout| Instant::now() + timeout);
    let mut joined = false;
    loop {
      // 2. Enter the gate. This is a sync mutex held only for the state check,
      //    never across an await point.
      let claim = {
        let mut gate = self.shared.gate.lock();
        self.shared.claim(&mut gate)
      };

      let outcome = match claim {
        Claim::Ready(value) => return Ok(value),
        Claim::Lead(generation) => return self.lead(generation).await,
        Claim::Join(generation) => {
          if !joined {
            joined = true;
            self.shared.metrics.joins.fetch_add(1, Ordering::Relaxed);
          }
          self.join(generation, deadline).await
        }
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

  async fn lead(&self, generation: u64) -> Result<Arc<T>, FlightError<E>> {
    let flight = Flight::new(&self.shared, generation);
    let result = self.shared.producer.produce().await;
    flight.finish(result)
  }

  async fn join(&self, generation: u64, deadline: Option<Instant>) -> WaitOutcome<T, E> {
    JoinFuture::new(&self.shared, generation, deadline).await
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

  pub fn production_count(&self) -> u64 {
    self.shared.metrics.production_count()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.shared.timeout
  }
}

/// Resolves when the flight a task joined ends, or when its deadline passes.
///
/// Dropping it before then removes its waker from the queue.
#[must_use = "futures do nothing unless you .await or poll them"]
struct JoinFuture<'a, T, E> {
  shared: &'a FlightShared<T, E>,
  generation: u64,
  waiter_id: Option<u64>,
  deadline: Option<Instant>,
  timer: Option<DeadlineTimer>,
}

impl<'a, T, E> JoinFuture<'a, T, E> {
  fn new(shared: &'a FlightShared<T, E>, generation: u64, deadline: Option<Instant>) -> Self {
    Self {
      shared,
      generation,
      waiter_id: None,
      deadline,
      timer: None,
    }
  }
}

impl<'a, T, E> Future for JoinFuture<'a, T, E> {
  type Output = WaitOutcome<T, E>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    if let Poll::Ready(outcome) = this
      .shared
      .poll_join(this.generation, &mut this.waiter_id, cx.waker())
    {
      return Poll::Ready(outcome);
    }

    let Some(deadline) = this.deadline else {
      return Poll::Pending;
    };
    if Instant::now() >= deadline {
      if let Some(id) = this.waiter_id.take() {
        this.shared.deregister(id);
      }
      return Poll::Ready(WaitOutcome::TimedOut);
    }
    if let Some(timer) = &this.timer {
      timer.waker.register(cx.waker());
    } else {
      this.timer = DeadlineTimer::start(deadline, cx.waker());
    }
    Poll::Pending
  }
}

impl<'a, T, E> Drop for JoinFuture<'a, T, E> {
  fn drop(&mut self) {
    if let Some(id) = self.waiter_id.take() {
      self.shared.deregister(id);
    }
  }
}

/// Wakes a waiting task once its deadline passes, from a parked helper thread.
///
/// Works on any executor. Dropping the timer stops the thread early.
struct DeadlineTimer {
  waker: Arc<AtomicWaker>,
  cancelled: Arc<AtomicBool>,
  thread: Thread,
}

impl DeadlineTimer {
  /// Returns `None` if the helper thread cannot be spawned; the deadline is
  /// then only checked when the task is polled for another reason.
  fn start(deadline: Instant, waker: &Waker) -> Option<Self> {
    let atomic_waker = Arc::new(AtomicWaker::new());
    atomic_waker.register(waker);
    let cancelled = Arc::new(AtomicBool::new(false));

    let spawned = thread::Builder::new()
      .name("fibre-flight-deadline".to_string())
      .spawn({
        let atomic_waker = atomic_waker.clone();
        let cancelled = cancelled.clone();
        move || loop {
          if cancelled.load(Ordering::Acquire) {
            return;
          }
          let now = Instant::now();
          if now >= deadline {
            atomic_waker.wake();
            return;
          }
          thread::park_timeout(deadline - now);
        }
      });

    match spawned {
      Ok(handle) => Some(Self {
        waker: atomic_waker,
        cancelled,
        thread: handle.thread().clone(),
      }),
      Err(err) => {
        tracing::warn!(error = %err, "could not start deadline timer");
        None
      }
    }
  }
}

impl Drop for DeadlineTimer {
  fn drop(&mut self) {
    self.cancelled.store(true, Ordering::Release);
    self.thread.unpark();
  }
}
