// src/commands/runner.rs

//! `runnable-run`, `task-run` and `task-run-recipe`: the runner side of the
//! status pipe.
//!
//! The outcome of the test travels in the status messages; the exit code
//! only says whether the runner itself managed to run it.

use std::path::Path;

use tracing::info;

use crate::cli::{RunnableRunArgs, RunnableSpec, TaskRunArgs, TaskRunRecipeArgs};
use crate::config::load_effective;
use crate::errors::{AvocadoError, Result};
use crate::exit_codes;
use crate::runnable::Runnable;
use crate::runnable::model::{decode_arg, parse_kwarg};
use crate::runner::{RunIdentity, RunnerOptions, run_runnable, run_task_recipe, termination_signal};

pub async fn runnable_run(config_path: Option<&Path>, args: &RunnableRunArgs) -> Result<i32> {
    let runnable = match &args.recipe {
        Some(path) => Runnable::from_recipe(path)?,
        None => runnable_from_spec(&args.runnable)?,
    };
    let options = options_from_config(config_path)?;
    run(&runnable, RunIdentity::default(), &options).await
}

pub async fn task_run(config_path: Option<&Path>, args: &TaskRunArgs) -> Result<i32> {
    let runnable = runnable_from_spec(&args.runnable)?;
    let identity = RunIdentity {
        id: Some(args.identifier.clone()),
        job_id: args.job_id.clone(),
    };
    let options = options_from_config(config_path)?;
    run(&runnable, identity, &options).await
}

pub async fn task_run_recipe(args: &TaskRunRecipeArgs) -> Result<i32> {
    let options = RunnerOptions {
        skip_codes: args.skip_codes.clone(),
        keep_tmp: args.keep_tmp,
    };
    let outcome = run_task_recipe(&args.recipe, &options).await?;
    info!(%outcome, "task recipe done");
    Ok(exit_codes::ALL_OK)
}

async fn run(runnable: &Runnable, identity: RunIdentity, options: &RunnerOptions) -> Result<i32> {
    let outcome = run_runnable(
        runnable,
        identity,
        options,
        tokio::io::stdout(),
        termination_signal(),
    )
    .await?;
    info!(%outcome, "runnable done");
    Ok(exit_codes::ALL_OK)
}

fn options_from_config(config_path: Option<&Path>) -> Result<RunnerOptions> {
    let config = load_effective(config_path)?;
    Ok(RunnerOptions {
        skip_codes: config.runner.exectest_skip_codes.clone(),
        keep_tmp: config.run.keep_tmp,
    })
}

/// Build a runnable from `-k/-u/-a` and `key=value` items.
pub fn runnable_from_spec(spec: &RunnableSpec) -> Result<Runnable> {
    let kind = spec
        .kind
        .as_deref()
        .ok_or_else(|| AvocadoError::Recipe("a runnable kind (-k) is required".into()))?;
    let args = spec
        .args
        .iter()
        .map(|a| decode_arg(a))
        .collect::<Result<Vec<_>>>()?;
    let mut runnable = Runnable::new(kind, spec.uri.clone().unwrap_or_default()).with_args(args);
    for item in &spec.kwargs {
        let (key, value) = parse_kwarg(item)?;
        runnable = runnable.with_kwarg(key, value);
    }
    Ok(runnable)
}
