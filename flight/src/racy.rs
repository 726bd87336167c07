//! The deliberately racy reference variant.
//!
//! `RacyCache` does check-then-produce-then-store with no mutual exclusion
//! around the sequence. Under concurrency, every caller that checks before the
//! first store runs the producer itself, which is the cache stampede the
//! single-flight caches exist to prevent.
//!
//! Each individual access to the slot is synchronized, so the race is purely
//! logical: the variant is memory safe and callers always receive a complete
//! value, just not necessarily the same one or from a single production.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// An unsynchronized memoizing cache. Only meant as a negative control.
pub struct RacyCache<T> {
  slot: Arc<RwLock<Option<Arc<T>>>>,
  producer: Arc<dyn Fn() -> T + Send + Sync>,
  productions: Arc<AtomicU64>,
}

impl<T> Clone for RacyCache<T> {
  fn clone(&self) -> Self {
    Self {
      slot: self.slot.clone(),
      producer: self.producer.clone(),
      productions: self.productions.clone(),
    }
  }
}

impl<T> fmt::Debug for RacyCache<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RacyCache")
      .field("filled", &self.slot.read().is_some())
      .field("productions", &self.production_count())
      .finish_non_exhaustive()
  }
}

impl<T> RacyCache<T> {
  pub fn new<F>(producer: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    Self {
      slot: Arc::new(RwLock::new(None)),
      producer: Arc::new(producer),
      productions: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Returns the cached value, producing it if the slot looked empty.
  ///
  /// The check and the store are separate critical sections, so concurrent
  /// callers may all produce. The last store wins.
  pub fn get(&self) -> Arc<T> {
    if let Some(value) = self.slot.read().clone() {
      return value;
    }

    let value = Arc::new((self.producer)());
    self.productions.fetch_add(1, Ordering::Relaxed);
    *self.slot.write() = Some(value.clone());
    value
  }

  pub fn peek(&self) -> Option<Arc<T>> {
    self.slot.read().clone()
  }

  /// The number of times the producer has run to completion.
  pub fn production_count(&self) -> u64 {
    self.productions.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sequential_use_produces_once() {
    let cache = RacyCache::new(|| 123);
    assert_eq!(*cache.get(), 123);
    assert_eq!(*cache.get(), 123);
    assert_eq!(cache.production_count(), 1);
  }

  #[test]
  fn test_peek_does_not_produce() {
    let cache = RacyCache::new(|| 123);
    assert!(cache.peek().is_none());
    assert_eq!(cache.production_count(), 0);
  }
}
