// src/job/mod.rs

//! A job: one invocation of the engine, owning one results directory.
//!
//! `Job::run` creates the results directory and `latest` link, attaches
//! `job.log`, records the job data, turns every suite into tasks, drives
//! them through the scheduler and finally writes `results.json` and derives
//! the exit code.

pub mod suite;
pub mod sysinfo;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::{Runtime, SchedulerControl, SchedulerOptions};
use crate::errors::{AvocadoError, Result};
use crate::exit_codes;
use crate::jobdata::replay::ReplayPlan;
use crate::jobdata::{self, JobData};
use crate::logging::JobLogSink;
use crate::paths::{JobLayout, create_job_logs_dir, create_unique_job_id, update_latest_link};
use crate::resolver::ResolverRegistry;
use crate::result::{
    JobEnd, JobResults, ResultAggregator, ResultCounters, ResultEventDispatcher, ResultEvents,
};
use crate::spawner::{ProcessSpawner, Spawner};
use crate::task::create_runtime_tasks;

pub use suite::TestSuite;
pub use sysinfo::{Sysinfo, SysinfoCollector, SysinfoPhase};

/// Message of a job that found nothing to run.
pub const NO_TESTS_MESSAGE: &str = "No tests found for given test references";

/// What a finished job produced.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub results_dir: PathBuf,
    pub results: JobResults,
    /// Bitmask of `exit_codes` conditions.
    pub exit_code: i32,
    /// Why the job failed before running any test.
    pub error: Option<String>,
}

pub struct Job {
    config: EngineConfig,
    suites: Option<Vec<TestSuite>>,
    registry: ResolverRegistry,
    spawner: Option<Arc<dyn Spawner>>,
    events: ResultEventDispatcher,
    log_sink: Option<JobLogSink>,
    cmdline: Vec<String>,
    replay: Option<ReplayPlan>,
    sysinfo: Sysinfo,
    handle_signals: bool,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("config", &self.config)
            .field("suites", &self.suites)
            .field("events", &self.events)
            .field("replay", &self.replay)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Job resolving `run.references` of `config` into a single suite.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            suites: None,
            registry: ResolverRegistry::with_builtins(),
            spawner: None,
            events: ResultEventDispatcher::new(),
            log_sink: None,
            cmdline: Vec::new(),
            replay: None,
            sysinfo: Sysinfo::new(),
            handle_signals: true,
        }
    }

    /// Job re-running a previous one; the plan carries the configuration.
    pub fn replay(plan: ReplayPlan) -> Self {
        let mut job = Self::new(plan.config.clone());
        job.replay = Some(plan);
        job
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run these suites instead of resolving `run.references`.
    pub fn with_suites(mut self, suites: Vec<TestSuite>) -> Self {
        self.suites = Some(suites);
        self
    }

    pub fn with_registry(mut self, registry: ResolverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ResultEvents>) -> Self {
        self.events = self.events.with_listener(listener);
        self
    }

    pub fn with_log_sink(mut self, sink: JobLogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_cmdline(mut self, argv: Vec<String>) -> Self {
        self.cmdline = argv;
        self
    }

    pub fn with_collector(mut self, collector: Arc<dyn SysinfoCollector>) -> Self {
        self.sysinfo.register(collector);
        self
    }

    /// Whether Ctrl-C stops the job gracefully (on by default).
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub async fn run(self) -> Result<JobOutcome> {
        let job_id = create_unique_job_id();
        let logs_root = self.config.datadir.logs_dir.clone();
        let results_dir = create_job_logs_dir(&logs_root, &job_id, Local::now())?;
        let layout = JobLayout::new(&results_dir);
        fs::write(layout.id_file(), format!("{job_id}\n"))?;
        if let Err(err) = update_latest_link(&logs_root, &results_dir) {
            warn!(error = %err, "could not update the latest link");
        }

        let command_line = format!("Command line: {}", self.cmdline.join(" "));
        match &self.log_sink {
            Some(sink) => {
                sink.attach(&layout.job_log())?;
                sink.write_line(&command_line)?;
            }
            None => fs::write(layout.job_log(), format!("{command_line}\n"))?,
        }
        info!(job_id = %job_id, dir = %results_dir.display(), "job started");

        let outcome = self.run_in(&job_id, &layout).await;

        if let Some(sink) = &self.log_sink {
            sink.detach();
        }
        outcome
    }

    async fn run_in(&self, job_id: &str, layout: &JobLayout) -> Result<JobOutcome> {
        let aggregator = Arc::new(ResultAggregator::new(
            job_id,
            layout.clone(),
            self.events.clone(),
        ));
        self.events
            .pre_tests(job_id, &layout.job_log().display().to_string());

        let suites = match self.prepare(layout) {
            Ok(suites) => suites,
            Err(err) => return self.abort(&aggregator, layout, err.to_string()),
        };
        let total: usize = suites.iter().map(TestSuite::size).sum();
        if total == 0 {
            return self.abort(&aggregator, layout, NO_TESTS_MESSAGE.to_string());
        }

        let spawner: Arc<dyn Spawner> = match &self.spawner {
            Some(spawner) => Arc::clone(spawner),
            None => match ProcessSpawner::new(&self.config) {
                Ok(spawner) => Arc::new(spawner),
                Err(err) => return self.abort(&aggregator, layout, err.to_string()),
            },
        };

        if self.config.run.sysinfo {
            self.sysinfo
                .collect(SysinfoPhase::Pre, &layout.sysinfo_dir(SysinfoPhase::Pre.as_str()))?;
        }

        let control = Arc::new(SchedulerControl::new());
        let options = SchedulerOptions {
            handle_signals: self.handle_signals,
            ..SchedulerOptions::from_config(&self.config)
        };
        let job_deadline = options
            .job_timeout
            .and_then(|limit| Instant::now().checked_add(limit));

        let mut position = 0;
        for (index, suite) in suites.iter().enumerate() {
            let mut tasks = create_runtime_tasks(index + 1, suite, layout, job_id, position);
            position += tasks.len();

            for task in &mut tasks {
                if self.replay.as_ref().is_some_and(|p| p.skips(task.position())) {
                    task.mark_replay_skip();
                }
                if self.config.run.sysinfo {
                    for phase in [SysinfoPhase::Pre, SysinfoPhase::Post] {
                        fs::create_dir_all(task.task_dir().sysinfo_dir(phase.as_str()))?;
                    }
                }
            }

            let mut suite_options = options.clone();
            if let Some(deadline) = job_deadline {
                suite_options.job_timeout = Some(deadline.saturating_duration_since(Instant::now()));
            }
            debug!(suite = %suite.name, tasks = tasks.len(), "running suite");
            let summary = Runtime::with_control(
                suite_options,
                Arc::clone(&spawner),
                Arc::clone(&control),
            )
            .run(tasks, Arc::clone(&aggregator))
            .await?;
            debug!(
                suite = %suite.name,
                finished = summary.tasks.len(),
                interrupted = summary.interrupted,
                "suite done"
            );
        }

        if self.config.run.sysinfo {
            self.sysinfo
                .collect(SysinfoPhase::Post, &layout.sysinfo_dir(SysinfoPhase::Post.as_str()))?;
        }

        let interrupted =
            control.is_interrupted() || control.failfast_triggered() || control.job_timed_out();
        let results = aggregator.finalize(JobEnd {
            interrupted,
            errored: false,
        })?;
        let exit_code = job_exit_code(&results.counters(), interrupted);
        info!(
            job_id = %job_id,
            status = %results.status,
            exit_code,
            "job finished"
        );

        Ok(JobOutcome {
            job_id: job_id.to_string(),
            results_dir: layout.root().to_path_buf(),
            results,
            exit_code,
            error: None,
        })
    }

    /// Build the suites, apply replayed variants and record the job data.
    fn prepare(&self, layout: &JobLayout) -> Result<Vec<TestSuite>> {
        let base_dir = self.replay.as_ref().and_then(|p| p.pwd.as_deref());
        let mut suites = match &self.suites {
            Some(suites) => suites.clone(),
            None => vec![TestSuite::from_config(
                "main",
                &self.config,
                &self.registry,
                base_dir,
            )?],
        };

        if let Some(plan) = &self.replay {
            for (index, suite) in suites.iter_mut().enumerate() {
                if let Some(variants) = plan.variants_for(index) {
                    suite.variants = variants.clone();
                }
            }
        }

        let pwd = std::env::current_dir()?;
        jobdata::record(
            layout,
            &JobData {
                references: &self.config.run.references,
                suites: suites.iter().map(|s| (s.name.as_str(), &s.variants)).collect(),
                config: &self.config,
                pwd: &pwd,
                cmdline: &self.cmdline,
            },
        )
        .map_err(|e| AvocadoError::Job(format!("cannot record job data: {e}")))?;
        Ok(suites)
    }

    /// End a job that could not run any test.
    fn abort(
        &self,
        aggregator: &ResultAggregator,
        layout: &JobLayout,
        message: String,
    ) -> Result<JobOutcome> {
        error!(job_id = %aggregator.job_id(), error = %message, "job aborted");
        let results = aggregator.finalize(JobEnd {
            interrupted: false,
            errored: true,
        })?;
        Ok(JobOutcome {
            job_id: aggregator.job_id().to_string(),
            results_dir: layout.root().to_path_buf(),
            results,
            exit_code: exit_codes::JOB_FAIL,
            error: Some(message),
        })
    }
}

/// Exit code of a job that ran: the OR of every condition that applies.
pub fn job_exit_code(counters: &ResultCounters, interrupted: bool) -> i32 {
    let mut code = exit_codes::ALL_OK;
    if counters.any_failure() {
        code |= exit_codes::TESTS_FAIL;
    }
    if interrupted || counters.interrupted > 0 {
        code |= exit_codes::JOB_INTERRUPTED;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_a_bitmask() {
        let clean = ResultCounters {
            pass: 2,
            ..Default::default()
        };
        assert_eq!(job_exit_code(&clean, false), exit_codes::ALL_OK);

        let failed = ResultCounters {
            pass: 1,
            fail: 1,
            cancel: 1,
            ..Default::default()
        };
        assert_eq!(job_exit_code(&failed, false), exit_codes::TESTS_FAIL);
        assert_eq!(
            job_exit_code(&failed, true),
            exit_codes::TESTS_FAIL | exit_codes::JOB_INTERRUPTED
        );

        let interrupted = ResultCounters {
            interrupted: 1,
            ..Default::default()
        };
        assert_eq!(job_exit_code(&interrupted, false), exit_codes::JOB_INTERRUPTED);
    }
}
