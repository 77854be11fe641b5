// src/task/mod.rs

//! Tasks: a runnable plus the mutable orchestration state the scheduler
//! drives through REQUESTED → TRIAGING → READY → STARTED → FINISHED.

pub mod graph;
pub mod id;
pub mod runtime;

pub use graph::create_runtime_tasks;
pub use id::TaskId;
pub use runtime::{RuntimeTask, TaskResult};
