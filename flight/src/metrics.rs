use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for a single-flight cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Production ---
  pub(crate) productions: CachePadded<AtomicU64>,
  pub(crate) failures: CachePadded<AtomicU64>,
  pub(crate) abandoned: CachePadded<AtomicU64>,

  // --- Callers ---
  pub(crate) fast_hits: CachePadded<AtomicU64>,
  pub(crate) joins: CachePadded<AtomicU64>,
  pub(crate) timeouts: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      productions: CachePadded::new(AtomicU64::new(0)),
      failures: CachePadded::new(AtomicU64::new(0)),
      abandoned: CachePadded::new(AtomicU64::new(0)),
      fast_hits: CachePadded::new(AtomicU64::new(0)),
      joins: CachePadded::new(AtomicU64::new(0)),
      timeouts: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// The number of completed productions.
  ///
  /// The increment happens before the value is published, so any caller that
  /// has received the value already sees it counted.
  pub(crate) fn production_count(&self) -> u64 {
    self.productions.load(Ordering::Relaxed)
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      productions: self.production_count(),
      failures: self.failures.load(Ordering::Relaxed),
      abandoned: self.abandoned.load(Ordering::Relaxed),
      fast_hits: self.fast_hits.load(Ordering::Relaxed),
      joins: self.joins.load(Ordering::Relaxed),
      timeouts: self.timeouts.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a cache's metrics.
#[derive(Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
  /// The number of times the producer completed successfully. For a
  /// single-flight cache this never exceeds one.
  pub productions: u64,
  /// The number of times the producer returned an error.
  pub failures: u64,
  /// The number of flights whose leader panicked or was cancelled.
  pub abandoned: u64,
  /// The number of `get()` calls served by the lock-free ready path.
  pub fast_hits: u64,
  /// The number of `get()` calls that waited on another caller's production.
  pub joins: u64,
  /// The number of waits that gave up after the configured timeout.
  pub timeouts: u64,
  /// The number of seconds the cache has existed.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("productions", &self.productions)
      .field("failures", &self.failures)
      .field("abandoned", &self.abandoned)
      .field("fast_hits", &self.fast_hits)
      .field("joins", &self.joins)
      .field("timeouts", &self.timeouts)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
