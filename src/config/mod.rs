// src/config/mod.rs

//! Configuration loading and validation for avocado.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like positive worker counts (`validate.rs`).
//! - Provide the flat dotted-key view used for job data and replay
//!   (`dict.rs`).

pub mod dict;
pub mod loader;
pub mod model;
pub mod validate;

pub use dict::{CONFIG_REFERENCE, ConfigDict};
pub use loader::{load_and_validate, load_effective, load_from_path};
pub use model::{
    DatadirSection, EngineConfig, RawEngineConfig, RunSection, RunnerSection, RunnerTimeouts,
    SchedulerSection, SpawnerSection, TaskSection,
};
pub use validate::validate_config;
