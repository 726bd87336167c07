use std::thread;
use std::time::{Duration, Instant};

/// How a synchronous caller waits while another caller is producing the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
  /// Register as a waiter and park the thread. The producer wakes every
  /// waiter when it finishes.
  ///
  /// No CPU is spent while waiting, but every waiter needs an OS wakeup.
  #[default]
  Blocking,

  /// Make a bounded attempt at the gate, then poll the load state: a short
  /// busy-spin followed by sleeps of the given interval.
  ///
  /// Burns CPU while waiting, but reacts quickly when productions are short.
  SpinPoll(Duration),
}

impl WaitStrategy {
  /// The sleep between polls used by [`WaitStrategy::spin_poll`].
  pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(100);

  /// A `SpinPoll` strategy with the default interval.
  pub const fn spin_poll() -> Self {
    WaitStrategy::SpinPoll(Self::DEFAULT_POLL_INTERVAL)
  }

  /// The poll interval, if this is a polling strategy.
  pub fn poll_interval(&self) -> Option<Duration> {
    match self {
      WaitStrategy::Blocking => None,
      WaitStrategy::SpinPoll(interval) => Some(*interval),
    }
  }
}

/// Busy-spin iterations before the poll loop starts sleeping.
const SPIN_LIMIT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
  Settled,
  TimedOut,
}

/// Polls `still_waiting` until it returns `false` or the deadline passes.
///
/// Starts with spinning, then sleeps `interval` between checks. The last sleep
/// is shortened so the deadline is never overshot by more than one check.
pub(crate) fn poll_until<F>(interval: Duration, deadline: Option<Instant>, mut still_waiting: F) -> PollOutcome
where
  F: FnMut() -> bool,
{
  // 1. Spinning Phase
  for _ in 0..SPIN_LIMIT {
    if !still_waiting() {
      return PollOutcome::Settled;
    }
    std::hint::spin_loop();
  }

  // 2. Sleeping Phase
  loop {
    if !still_waiting() {
      return PollOutcome::Settled;
    }
    let nap = match deadline {
      Some(deadline) => {
        let now = Instant::now();
        if now >= deadline {
          return PollOutcome::TimedOut;
        }
        interval.min(deadline - now)
      }
      None => interval,
    };
    thread::sleep(nap);
  }
}
