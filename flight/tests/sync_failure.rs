mod common;

use common::{stampede, wait_until};
use fibre_flight::{FlightBuilder, FlightError, LoadState, WaitStrategy};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, Eq)]
struct DbError(&'static str);

impl std::fmt::Display for DbError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "database error: {}", self.0)
  }
}

#[test]
fn test_failure_reverts_to_empty_and_next_call_retries() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let cache = FlightBuilder::new()
    .try_producer({
      let attempts = attempts.clone();
      move || {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
          Err(DbError("connection reset"))
        } else {
          Ok(123)
        }
      }
    })
    .build()
    .unwrap();

  // 1. The first production fails and is not cached.
  let err = cache.get().unwrap_err();
  assert_eq!(err.producer_error(), Some(&DbError("connection reset")));
  assert_eq!(err.to_string(), "producer failed: database error: connection reset");
  assert_eq!(cache.state(), LoadState::Empty);
  assert_eq!(cache.production_count(), 0);

  // 2. The next call starts a new production, which succeeds.
  assert_eq!(*cache.get().unwrap(), 123);
  assert_eq!(cache.state(), LoadState::Ready);
  assert_eq!(attempts.load(Ordering::SeqCst), 2);

  let metrics = cache.metrics();
  assert_eq!(metrics.failures, 1);
  assert_eq!(metrics.productions, 1);
}

#[test]
fn test_waiters_share_the_error_of_their_flight() {
  for strategy in [WaitStrategy::Blocking, WaitStrategy::spin_poll()] {
    let cache = FlightBuilder::new()
      .try_producer(|| -> Result<u32, DbError> {
        thread::sleep(Duration::from_millis(100));
        Err(DbError("down"))
      })
      .wait_strategy(strategy)
      .build()
      .unwrap();

    let errors = stampede(20, {
      let cache = cache.clone();
      move || cache.get().unwrap_err()
    });

    // Every failed flight hands one shared error to its leader and waiters,
    // so callers see exactly as many distinct errors as there were failures.
    let mut distinct: Vec<Arc<DbError>> = Vec::new();
    for err in &errors {
      match err {
        FlightError::ProducerFailed(shared) => {
          assert_eq!(**shared, DbError("down"));
          if !distinct.iter().any(|seen| Arc::ptr_eq(seen, shared)) {
            distinct.push(shared.clone());
          }
        }
        other => panic!("Unexpected error: {:?}", other),
      }
    }
    let failures = cache.metrics().failures;
    assert!(failures >= 1);
    assert_eq!(distinct.len() as u64, failures, "{:?}", strategy);
    assert_eq!(cache.state(), LoadState::Empty);
    assert_eq!(cache.production_count(), 0);
  }
}

#[test]
fn test_producer_panic_hands_flight_to_a_waiter() {
  for strategy in [WaitStrategy::Blocking, WaitStrategy::spin_poll()] {
    let attempts = Arc::new(AtomicUsize::new(0));
    let cache = FlightBuilder::new()
      .producer({
        let attempts = attempts.clone();
        move || {
          thread::sleep(Duration::from_millis(100));
          if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("producer blew up");
          }
          123
        }
      })
      .wait_strategy(strategy)
      .build()
      .unwrap();

    let leader = {
      let cache = cache.clone();
      thread::spawn(move || cache.get())
    };
    wait_until(|| cache.state() == LoadState::Loading);

    let waiters: Vec<_> = (0..5)
      .map(|_| {
        let cache = cache.clone();
        thread::spawn(move || cache.get().unwrap())
      })
      .collect();

    // The panic reaches the caller that ran the producer.
    assert!(leader.join().is_err());
    // Everyone else still gets the value from one new production.
    for waiter in waiters {
      assert_eq!(*waiter.join().unwrap(), 123);
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 2, "{:?}", strategy);
    assert_eq!(cache.production_count(), 1);
    assert_eq!(cache.metrics().abandoned, 1);
  }
}

#[test]
fn test_waiter_times_out_but_production_continues() {
  for strategy in [WaitStrategy::Blocking, WaitStrategy::spin_poll()] {
    let cache = FlightBuilder::new()
      .producer(|| {
        thread::sleep(Duration::from_millis(300));
        123
      })
      .wait_strategy(strategy)
      .timeout(Duration::from_millis(50))
      .build()
      .unwrap();

    let leader = {
      let cache = cache.clone();
      thread::spawn(move || cache.get())
    };
    wait_until(|| cache.state() == LoadState::Loading);

    let start = Instant::now();
    let err = cache.get().unwrap_err();
    assert!(err.is_timeout(), "{:?}", strategy);
    assert!(matches!(err, FlightError::Timeout(bound) if bound == Duration::from_millis(50)));
    assert!(start.elapsed() < Duration::from_millis(300));
    assert_eq!(cache.metrics().timeouts, 1);

    // The leader is never interrupted, and a later call gets its value.
    assert_eq!(*leader.join().unwrap().unwrap(), 123);
    assert_eq!(*cache.get().unwrap(), 123);
    assert_eq!(cache.production_count(), 1);
  }
}
