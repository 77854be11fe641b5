// src/commands/mod.rs

//! Sub-command implementations.
//!
//! Every command returns the process exit code; errors bubble up to
//! `main`, which maps them through [`AvocadoError::exit_code`].
//!
//! [`AvocadoError::exit_code`]: crate::errors::AvocadoError::exit_code

pub mod inspect;
pub mod job;
pub mod runner;

use std::path::Path;

use crate::cli::{CliArgs, Command, ConfigCommand, JobsCommand};
use crate::config::{EngineConfig, load_effective};
use crate::errors::Result;
use crate::logging::JobLogSink;

/// Run the parsed command line.
pub async fn dispatch(args: CliArgs, sink: JobLogSink) -> Result<i32> {
    let config_path = args.config.as_deref();
    let argv: Vec<String> = std::env::args().collect();

    match args.command {
        Command::Run(run) => job::run(config_path, &run, sink, argv).await,
        Command::Replay(replay) => job::replay(config_path, &replay, sink, argv).await,
        Command::List(list) => inspect::list(&list, false),
        Command::Resolve(list) => inspect::list(&list, true),
        Command::Jobs { action } => match action {
            JobsCommand::List { job_results_dir } => {
                let config = config_with_logs_dir(config_path, job_results_dir.as_deref())?;
                inspect::jobs_list(&config)
            }
            JobsCommand::Show {
                job,
                job_results_dir,
            } => {
                let config = config_with_logs_dir(config_path, job_results_dir.as_deref())?;
                inspect::jobs_show(&config, &job)
            }
        },
        Command::Diff(diff) => {
            let config = config_with_logs_dir(config_path, diff.job_results_dir.as_deref())?;
            inspect::diff(&config, &diff)
        }
        Command::Config { action } => match action {
            None => inspect::config(&load_effective(config_path)?),
            Some(ConfigCommand::Reference) => inspect::config_reference(),
        },
        Command::RunnableRun(run) => runner::runnable_run(config_path, &run).await,
        Command::TaskRun(run) => runner::task_run(config_path, &run).await,
        Command::TaskRunRecipe(run) => runner::task_run_recipe(&run).await,
    }
}

/// Effective configuration, with the logs root replaced when given.
pub(crate) fn config_with_logs_dir(
    config_path: Option<&Path>,
    logs_dir: Option<&Path>,
) -> Result<EngineConfig> {
    let mut config = load_effective(config_path)?;
    if let Some(dir) = logs_dir {
        config.datadir.logs_dir = dir.to_path_buf();
    }
    Ok(config)
}
