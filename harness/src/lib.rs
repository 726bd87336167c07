//! Stampede driver for `fibre_flight`.
//!
//! Each run builds a fresh cache, releases every caller thread at once behind
//! a barrier and counts how many times the producer ran. A guarded cache must
//! produce exactly once per run; the racy reference usually does not.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod report;
pub mod run;

pub use config::{StampedeConfig, StrategyKind, Variant};
pub use error::{HarnessError, Result};
pub use report::{RunReport, Summary};
