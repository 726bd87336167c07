#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Spawns `callers` threads that all start `call` at the same moment and
/// returns their results in spawn order.
pub fn stampede<R, F>(callers: usize, call: F) -> Vec<R>
where
  R: Send + 'static,
  F: Fn() -> R + Send + Sync + 'static,
{
  let call = Arc::new(call);
  let barrier = Arc::new(Barrier::new(callers));
  let handles: Vec<_> = (0..callers)
    .map(|_| {
      let call = call.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        call()
      })
    })
    .collect();

  handles
    .into_iter()
    .map(|handle| handle.join().unwrap())
    .collect()
}

/// Spins until `cond` holds, failing the test after a generous bound.
pub fn wait_until<F: Fn() -> bool>(cond: F) {
  for _ in 0..5_000 {
    if cond() {
      return;
    }
    thread::sleep(Duration::from_millis(1));
  }
  panic!("condition was not reached in time");
}

/// A three-field record. Consistent records carry the same stamp in every
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
  pub a: u64,
  pub b: u64,
  pub c: u64,
}

impl Record {
  pub fn is_torn(&self) -> bool {
    self.a != self.b || self.b != self.c
  }
}

/// Shared scratch space that a producer fills one field at a time, like a
/// global record written without a lock.
///
/// A single production always reads back a consistent record. Two
/// productions that overlap interleave their writes and can read back a torn
/// one.
#[derive(Debug, Default)]
pub struct Scratch {
  a: AtomicU64,
  b: AtomicU64,
  c: AtomicU64,
  stamps: AtomicU64,
}

impl Scratch {
  pub fn produce(&self) -> Record {
    let stamp = self.stamps.fetch_add(1, Ordering::SeqCst) + 1;
    let pause = Duration::from_millis(2);

    self.a.store(stamp, Ordering::SeqCst);
    thread::sleep(pause);
    self.b.store(stamp, Ordering::SeqCst);
    thread::sleep(pause);
    self.c.store(stamp, Ordering::SeqCst);
    thread::sleep(pause);

    Record {
      a: self.a.load(Ordering::SeqCst),
      b: self.b.load(Ordering::SeqCst),
      c: self.c.load(Ordering::SeqCst),
    }
  }
}
