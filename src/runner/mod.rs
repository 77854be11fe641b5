// src/runner/mod.rs

//! Built-in runners.
//!
//! This is the code that lives on the far side of the status pipe: it runs
//! one runnable in the current process and prints newline-delimited status
//! messages to stdout. The engine reaches it through
//! `avocado task-run-recipe`; `task-run` and `runnable-run` expose the same
//! path for debugging.

pub mod emitter;
pub mod exec;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::paths::TaskDir;
use crate::runnable::{Runnable, TaskRecipe};
use crate::spawner::TaskEnvironment;
use crate::status::StatusMessage;
use crate::task::TaskResult;
use crate::types::Outcome;

pub use emitter::StatusEmitter;

pub const NOOP_KIND: &str = "noop";
pub const EXEC_KIND: &str = "exec";
pub const EXEC_TEST_KIND: &str = "exec-test";
/// Stand-in kind for tasks of a dry run; reports CANCEL without running.
pub const DRY_RUN_KIND: &str = "dry-run";

pub const SUPPORTED_KINDS: &[&str] = &[NOOP_KIND, EXEC_KIND, EXEC_TEST_KIND, DRY_RUN_KIND];

/// Longest silence on the status pipe while a test runs.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Knobs handed to the runner by the spawner's command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// `exec-test` exit codes reported as SKIP.
    pub skip_codes: Vec<i32>,
    /// Keep the task work directory after the run.
    pub keep_tmp: bool,
}

/// Identity stamped on emitted messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunIdentity {
    pub id: Option<String>,
    pub job_id: Option<String>,
}

/// Run the task described by the recipe at `path`, reporting on stdout.
pub async fn run_task_recipe(path: &Path, options: &RunnerOptions) -> Result<Outcome> {
    let recipe = TaskRecipe::read(path)?;
    let identity = RunIdentity {
        id: Some(recipe.id.clone()),
        job_id: recipe.job_id.clone(),
    };
    info!(task = %recipe.id, kind = recipe.runnable.kind(), "running task recipe");
    run_runnable(
        &recipe.runnable,
        identity,
        options,
        tokio::io::stdout(),
        termination_signal(),
    )
    .await
}

/// Run `runnable` to completion, writing status lines to `out`.
///
/// `shutdown` resolving means the runner was asked to stop; the test is
/// terminated and reported INTERRUPTED.
pub async fn run_runnable<W, F>(
    runnable: &Runnable,
    identity: RunIdentity,
    options: &RunnerOptions,
    out: W,
    shutdown: F,
) -> Result<Outcome>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let mut emitter = StatusEmitter::new(out, identity);
    let logfile = std::env::var("AVOCADO_TEST_LOGFILE").ok();
    emitter.emit(StatusMessage::started(logfile)).await?;

    let result = match runnable.kind() {
        NOOP_KIND => TaskResult::new(Outcome::Pass),
        DRY_RUN_KIND => TaskResult::new(Outcome::Cancel).with_reason("dry run"),
        EXEC_KIND | EXEC_TEST_KIND => {
            let env = runner_environment(runnable);
            let workdir = env.get("AVOCADO_TEST_WORKDIR").map(std::path::PathBuf::from);
            let result = exec::run_process(
                runnable,
                runnable.kind() == EXEC_TEST_KIND,
                options,
                &env,
                &mut emitter,
                shutdown,
            )
            .await?;
            if let Some(dir) = workdir {
                cleanup_workdir(&dir, options.keep_tmp).await;
            }
            result
        }
        other => {
            warn!(kind = other, "unsupported runnable kind");
            TaskResult::new(Outcome::Error).with_reason("unsupported kind")
        }
    };

    debug!(outcome = %result.outcome, "runner finished");
    emitter.emit(StatusMessage::finished(&result)).await?;
    Ok(result.outcome)
}

/// Variables exported to the test process on top of the inherited ones.
///
/// Under a spawner the test variables are already inherited; a standalone
/// run with an `output_dir` gets them computed here.
pub fn runner_environment(runnable: &Runnable) -> std::collections::BTreeMap<String, String> {
    let mut env = std::collections::BTreeMap::new();
    if std::env::var_os("AVOCADO_TEST_LOGDIR").is_none() {
        if let Some(dir) = runnable.output_dir() {
            let computed = TaskEnvironment::new(runnable, &TaskDir::new(dir));
            env.extend(computed.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        }
    } else if let Ok(workdir) = std::env::var("AVOCADO_TEST_WORKDIR") {
        env.insert("AVOCADO_TEST_WORKDIR".to_string(), workdir);
    }
    for (key, value) in runnable.kwargs() {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.insert(key.clone(), rendered);
    }
    if let Some(variant) = runnable.variant() {
        env.extend(variant.env());
    }
    env
}

async fn cleanup_workdir(dir: &Path, keep_tmp: bool) {
    if keep_tmp {
        return;
    }
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "removed work directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove work directory"),
    }
}

/// Resolves when the process receives SIGTERM (Ctrl-C off unix).
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
