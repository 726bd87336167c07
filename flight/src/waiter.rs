use std::collections::VecDeque;
use std::task::Waker;
use std::thread::Thread;

/// A caller waiting for an in-flight production to finish.
pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }

  fn refresh(&mut self, waiter: Waiter) {
    // Avoid replacing a waker that would wake the same task anyway.
    if let (Waiter::Async(current), Waiter::Async(new)) = (&*self, &waiter) {
      if current.will_wake(new) {
        return;
      }
    }
    *self = waiter;
  }
}

/// The queue of registered waiters, keyed by a per-caller id so that a caller
/// woken spuriously, or giving up on a timeout, can find its own entry.
#[derive(Default)]
pub(crate) struct WaiterQueue {
  next_id: u64,
  waiters: VecDeque<(u64, Waiter)>,
}

impl WaiterQueue {
  pub(crate) fn next_id(&mut self) -> u64 {
    self.next_id += 1;
    self.next_id
  }

  /// Adds a waiter, or updates the existing entry for `id`.
  pub(crate) fn register(&mut self, id: u64, waiter: Waiter) {
    match self.waiters.iter_mut().find(|(entry_id, _)| *entry_id == id) {
      Some((_, existing)) => existing.refresh(waiter),
      None => self.waiters.push_back((id, waiter)),
    }
  }

  pub(crate) fn remove(&mut self, id: u64) -> bool {
    match self.waiters.iter().position(|(entry_id, _)| *entry_id == id) {
      Some(index) => {
        self.waiters.remove(index);
        true
      }
      None => false,
    }
  }

  /// Wakes and removes every waiter. Returns how many were woken.
  pub(crate) fn wake_all(&mut self) -> usize {
    let woken = self.len();
    for (_, waiter) in self.waiters.drain(..) {
      waiter.wake();
    }
    woken
  }

  pub(crate) fn len(&self) -> usize {
    self.waiters.len()
  }
}
