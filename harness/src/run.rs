use crate::config::{StampedeConfig, Variant};
use crate::error::{HarnessError, Result};
use crate::report::{RunReport, Summary};

use fibre_flight::{FlightBuilder, FlightError, RacyCache, SingleFlightCache};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartSignal {
  Waiting,
  Go,
  Abort,
}

/// Holds every caller thread of a run until all of them exist, so they hit
/// the cache together. Unlike a barrier it can be released early when a
/// thread fails to spawn.
struct StartLatch {
  signal: Mutex<StartSignal>,
  changed: Condvar,
}

impl StartLatch {
  fn new() -> Self {
    Self {
      signal: Mutex::new(StartSignal::Waiting),
      changed: Condvar::new(),
    }
  }

  /// Blocks until the latch is released. Returns `false` if the run was
  /// aborted and the caller should not touch the cache.
  fn wait(&self) -> bool {
    let mut signal = self.signal.lock();
    while *signal == StartSignal::Waiting {
      self.changed.wait(&mut signal);
    }
    *signal == StartSignal::Go
  }

  fn release(&self, outcome: StartSignal) {
    *self.signal.lock() = outcome;
    self.changed.notify_all();
  }
}

/// The cache under test for one run.
enum Target {
  Guarded(SingleFlightCache<i64>),
  Racy(RacyCache<i64>),
}

impl Target {
  fn build(config: &StampedeConfig) -> Result<Self> {
    let delay = config.producer_delay;
    let value = config.value;
    let produce = move || {
      thread::sleep(delay);
      value
    };

    match config.variant {
      Variant::Guarded => {
        let mut builder = FlightBuilder::new()
          .producer(produce)
          .wait_strategy(config.wait_strategy);
        if let Some(timeout) = config.timeout {
          builder = builder.timeout(timeout);
        }
        Ok(Target::Guarded(builder.build()?))
      }
      Variant::Racy => Ok(Target::Racy(
        SingleFlightCache::racy_reference_for_testing(produce),
      )),
    }
  }

  fn get(&self) -> std::result::Result<i64, FlightError> {
    match self {
      Target::Guarded(cache) => cache.get().map(|value| *value),
      Target::Racy(cache) => Ok(*cache.get()),
    }
  }

  fn production_count(&self) -> u64 {
    match self {
      Target::Guarded(cache) => cache.production_count(),
      Target::Racy(cache) => cache.production_count(),
    }
  }
}

/// Runs one stampede against a fresh cache.
pub fn run_once(config: &StampedeConfig, run: usize) -> Result<RunReport> {
  let target = Arc::new(Target::build(config)?);
  let latch = Arc::new(StartLatch::new());

  let mut handles = Vec::with_capacity(config.callers);
  for caller in 0..config.callers {
    let spawned = thread::Builder::new()
      .name(format!("caller-{}", caller))
      .spawn({
        let target = target.clone();
        let latch = latch.clone();
        move || latch.wait().then(|| target.get())
      });
    match spawned {
      Ok(handle) => handles.push(handle),
      Err(source) => {
        // Let the threads already started exit without calling the cache.
        latch.release(StartSignal::Abort);
        let spawned = handles.len();
        for handle in handles {
          let _ = handle.join();
        }
        tracing::error!(run, spawned, error = %source, "could not start every caller");
        return Err(HarnessError::CallerSpawn { run, spawned, source });
      }
    }
  }

  let start = Instant::now();
  latch.release(StartSignal::Go);

  let mut mismatches = 0;
  let mut errors = 0;
  for handle in handles {
    match handle.join() {
      Ok(Some(Ok(value))) if value == config.value => {}
      Ok(Some(Ok(value))) => {
        mismatches += 1;
        tracing::warn!(run, value, expected = config.value, "caller saw the wrong value");
      }
      Ok(Some(Err(err))) => {
        errors += 1;
        tracing::warn!(run, error = %err, "caller failed");
      }
      Ok(None) => unreachable!("callers only skip the cache when the run is aborted"),
      Err(_) => return Err(HarnessError::CallerPanicked { run }),
    }
  }
  let elapsed = start.elapsed();

  let report = RunReport {
    run,
    variant: config.variant,
    callers: config.callers,
    productions: target.production_count(),
    mismatches,
    errors,
    elapsed,
  };
  if report.violated() {
    tracing::error!(%report, "single-flight violated");
  } else {
    tracing::debug!(%report, "run finished");
  }
  Ok(report)
}

/// Runs every configured stampede in turn, handing each report to
/// `on_report` as soon as its run finishes.
pub fn run_all<F>(config: &StampedeConfig, mut on_report: F) -> Result<Summary>
where
  F: FnMut(&RunReport),
{
  tracing::info!(
    callers = config.callers,
    runs = config.runs,
    variant = %config.variant,
    wait_strategy = ?config.wait_strategy,
    "starting stampede"
  );

  let mut summary = Summary::default();
  for run in 1..=config.runs {
    let report = run_once(config, run)?;
    on_report(&report);
    summary.push(report);
  }
  Ok(summary)
}
