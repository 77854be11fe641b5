// src/result/mod.rs

//! Result aggregation and persistence.
//!
//! - [`record`]: per-test result records and outcome counters.
//! - [`aggregator`]: the job-wide accumulator and `results.json`.
//! - [`events`]: listener trait for external result writers.
//! - [`human`]: the console listener.
//! - [`persist`]: atomic JSON writes.

pub mod aggregator;
pub mod events;
pub mod human;
pub mod persist;
pub mod record;

pub use aggregator::{JobEnd, JobResults, ResultAggregator};
pub use events::{ResultEventDispatcher, ResultEvents, TestProgress};
pub use human::HumanResult;
pub use record::{ResultCounters, TestResultRecord, epoch_seconds};
