// src/lib.rs

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exit_codes;
pub mod job;
pub mod jobdata;
pub mod logging;
pub mod paths;
pub mod resolver;
pub mod result;
pub mod runnable;
pub mod runner;
pub mod spawner;
pub mod status;
pub mod task;
pub mod types;
pub mod variants;

use crate::cli::CliArgs;
use crate::errors::Result;
use crate::logging::JobLogSink;

/// High-level entry point used by `main.rs`.
///
/// Returns the process exit code of the command. `sink` is the job log
/// layer installed by [`logging::init_logging`]; jobs attach their
/// `job.log` to it.
pub async fn run(args: CliArgs, sink: JobLogSink) -> Result<i32> {
    commands::dispatch(args, sink).await
}
