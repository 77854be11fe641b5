// src/commands/job.rs

//! `run` and `replay`.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::cli::{ReplayArgs, RunArgs, RunOptions};
use crate::commands::config_with_logs_dir;
use crate::config::ConfigDict;
use crate::errors::Result;
use crate::job::Job;
use crate::jobdata::replay::{ReplayIgnore, ReplayRequest, plan_replay};
use crate::logging::JobLogSink;
use crate::result::HumanResult;

pub async fn run(
    config_path: Option<&Path>,
    args: &RunArgs,
    sink: JobLogSink,
    argv: Vec<String>,
) -> Result<i32> {
    let overrides = args.overrides()?;
    let job = match &args.replay {
        Some(source) => replay_job(
            config_path,
            &args.options,
            source,
            args.replay_test_status.as_deref(),
            &args.replay_ignore,
            &overrides,
        )?,
        None => {
            let base = config_with_logs_dir(config_path, None)?;
            Job::new(base.apply_overrides(&overrides)?)
        }
    };
    execute(job, sink, argv).await
}

pub async fn replay(
    config_path: Option<&Path>,
    args: &ReplayArgs,
    sink: JobLogSink,
    argv: Vec<String>,
) -> Result<i32> {
    let overrides = args.options.overrides()?;
    let job = replay_job(
        config_path,
        &args.options,
        &args.job,
        args.replay_test_status.as_deref(),
        &args.replay_ignore,
        &overrides,
    )?;
    execute(job, sink, argv).await
}

fn replay_job(
    config_path: Option<&Path>,
    options: &RunOptions,
    source: &str,
    test_status: Option<&str>,
    ignore: &[ReplayIgnore],
    overrides: &ConfigDict,
) -> Result<Job> {
    // The source job is looked up where the new one is written.
    let base = config_with_logs_dir(config_path, options.job_results_dir.as_deref())?;
    let mut request = ReplayRequest::new(source);
    if let Some(raw) = test_status {
        request.test_status = ReplayRequest::parse_statuses(raw)?;
    }
    request.ignore = ignore.to_vec();
    let plan = plan_replay(&request, &base, overrides)?;
    debug!(
        source = %plan.source_job_id,
        skipped = plan.skip_positions.len(),
        "replay planned"
    );
    Ok(Job::replay(plan))
}

async fn execute(job: Job, sink: JobLogSink, argv: Vec<String>) -> Result<i32> {
    let outcome = job
        .with_listener(Arc::new(HumanResult::stdout()))
        .with_log_sink(sink)
        .with_cmdline(argv)
        .run()
        .await?;

    if let Some(error) = &outcome.error {
        eprintln!("{error}");
    }
    println!("JOB RESULTS: {}", outcome.results_dir.display());
    Ok(outcome.exit_code)
}
