//! Single-flight memoized loading: a concurrency primitive that wraps one
//! lazily-produced value and guarantees the producer runs at most once, no
//! matter how many callers ask for the value concurrently.
//!
//! # Features
//! - **Stampede Protection**: The first caller to find the slot empty becomes
//!   the leader and runs the producer. Everyone else waits for, and shares, its
//!   result.
//! - **Lock-Free Fast Path**: Once the value is ready, `get()` is a single
//!   atomic load plus an `Arc` clone.
//! - **Sync & Async**: `SingleFlightCache` for threads, `AsyncSingleFlightCache`
//!   for tasks. Both share the same state machine.
//! - **Wait Strategies**: Park-and-notify (`Blocking`, the default) or a bounded
//!   trylock followed by spin-polling (`SpinPoll`).
//! - **Retryable Failures**: A failed production is reported to every caller of
//!   that flight and the slot reverts to empty, so the next `get()` retries.
//! - **Negative Control**: `RacyCache`, a deliberately unsynchronized variant
//!   used to demonstrate the stampede the primitive prevents.
//!
//! # Example
//!
//! ```
//! use fibre_flight::SingleFlightCache;
//! use std::thread;
//!
//! let cache = SingleFlightCache::new(|| {
//!   // An expensive fetch.
//!   123
//! });
//!
//! let handles: Vec<_> = (0..8)
//!   .map(|_| {
//!     let cache = cache.clone();
//!     thread::spawn(move || *cache.get().unwrap())
//!   })
//!   .collect();
//!
//! for handle in handles {
//!   assert_eq!(handle.join().unwrap(), 123);
//! }
//! assert_eq!(cache.production_count(), 1);
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod handles;
pub mod metrics;
pub mod racy;
pub mod strategy;

// Internal, crate-only modules
mod producer;
mod shared;
mod waiter;

// Re-export the primary user-facing types for convenience
pub use builder::FlightBuilder;
pub use error::{BuildError, FlightError};
pub use handles::{AsyncSingleFlightCache, SingleFlightCache};
pub use metrics::MetricsSnapshot;
pub use racy::RacyCache;
pub use shared::LoadState;
pub use strategy::WaitStrategy;
