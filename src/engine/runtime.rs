// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::engine::state_machine::StateMachine;
use crate::engine::worker::{Shared, Worker};
use crate::engine::{SchedulerControl, SchedulerOptions};
use crate::errors::{AvocadoError, Result};
use crate::result::ResultAggregator;
use crate::spawner::Spawner;
use crate::status::{StatusRepo, StatusServer, status_channel};
use crate::task::RuntimeTask;

/// How long the status drain may keep running once every worker is done.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What a scheduler run produced.
#[derive(Debug)]
pub struct RunSummary {
    /// Finished tasks in creation order.
    pub tasks: Vec<RuntimeTask>,
    pub interrupted: bool,
    pub failfast: bool,
    pub job_timeout: bool,
}

/// Async shell around the state machine: N cooperative workers plus the
/// status drain, on the current Tokio runtime.
pub struct Runtime {
    options: SchedulerOptions,
    spawner: Arc<dyn Spawner>,
    control: Arc<SchedulerControl>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .field("spawner", &self.spawner.name())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(options: SchedulerOptions, spawner: Arc<dyn Spawner>) -> Self {
        Self::with_control(options, spawner, Arc::new(SchedulerControl::new()))
    }

    /// Runtime sharing `control` with earlier runs, so an interrupt or
    /// failfast of one suite carries over to the next.
    pub fn with_control(
        options: SchedulerOptions,
        spawner: Arc<dyn Spawner>,
        control: Arc<SchedulerControl>,
    ) -> Self {
        Self {
            options,
            spawner,
            control,
        }
    }

    /// Handle to interrupt the run from outside.
    pub fn control(&self) -> Arc<SchedulerControl> {
        Arc::clone(&self.control)
    }

    /// Drive `tasks` until every one of them is FINISHED.
    pub async fn run(
        self,
        tasks: Vec<RuntimeTask>,
        aggregator: Arc<ResultAggregator>,
    ) -> Result<RunSummary> {
        let task_count = tasks.len();
        info!(
            tasks = task_count,
            workers = self.options.workers,
            max_running = self.options.max_running,
            spawner = self.spawner.name(),
            "scheduler started"
        );

        let repo = StatusRepo::shared();
        let (status_tx, status_rx) = status_channel();
        let mut drain = tokio::spawn(StatusServer::new(Arc::clone(&repo), status_rx).run());

        let mut watchers: Vec<JoinHandle<()>> = Vec::new();
        if self.options.handle_signals {
            watchers.push(spawn_interrupt_watcher(Arc::clone(&self.control)));
        }
        if let Some(limit) = self.options.job_timeout {
            watchers.push(spawn_job_timer(Arc::clone(&self.control), limit));
        }

        let shared = Arc::new(Shared {
            sm: StateMachine::new(tasks, aggregator),
            spawner: self.spawner,
            repo,
            status: status_tx,
            control: Arc::clone(&self.control),
            options: self.options.clone(),
        });

        let mut workers = JoinSet::new();
        for index in 0..self.options.workers {
            workers.spawn(Worker::new(index, Arc::clone(&shared)).run());
        }
        let mut crashed = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "scheduler worker crashed");
                crashed = Some(err);
                break;
            }
        }
        workers.abort_all();
        for watcher in &watchers {
            watcher.abort();
        }
        if let Some(err) = crashed {
            drain.abort();
            return Err(AvocadoError::Job(format!("scheduler worker crashed: {err}")));
        }

        let Shared { sm, status, .. } = Arc::try_unwrap(shared)
            .map_err(|_| AvocadoError::Job("scheduler state still shared after run".into()))?;
        drop(status);
        if tokio::time::timeout(DRAIN_GRACE, &mut drain).await.is_err() {
            debug!("status pipes still open; stopping drain");
            drain.abort();
        }

        let summary = RunSummary {
            tasks: sm.into_finished(),
            interrupted: self.control.is_interrupted(),
            failfast: self.control.failfast_triggered(),
            job_timeout: self.control.job_timed_out(),
        };
        info!(
            tasks = summary.tasks.len(),
            interrupted = summary.interrupted,
            failfast = summary.failfast,
            "scheduler finished"
        );
        if summary.tasks.len() != task_count {
            warn!(expected = task_count, finished = summary.tasks.len(), "task count mismatch");
        }
        Ok(summary)
    }
}

fn spawn_interrupt_watcher(control: Arc<SchedulerControl>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; stopping gracefully");
                control.interrupt();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
        }
    })
}

fn spawn_job_timer(control: Arc<SchedulerControl>, limit: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        warn!(limit_secs = limit.as_secs_f64(), "job timeout reached; stopping");
        control.expire_job();
    })
}
