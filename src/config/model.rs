// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ExecutionOrder, SpawnerKind};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [datadir]
/// logs_dir = "/srv/results"
///
/// [run]
/// failfast = true
/// execution_order = "tests-per-variant"
///
/// [task]
/// timeout = 30.0
///
/// [scheduler]
/// workers = 4
/// max_running_tasks = 2
///
/// [runner.timeout]
/// process_alive = 5.0
/// ```
///
/// All sections are optional and have reasonable defaults. Unknown keys are
/// rejected so typos do not silently fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    #[serde(default)]
    pub datadir: DatadirSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub task: TaskSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub spawner: SpawnerSection,
}

/// Validated engine configuration.
///
/// Built through `EngineConfig::try_from(RawEngineConfig)`; once a job is
/// created it only hands out shared references to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub datadir: DatadirSection,
    pub run: RunSection,
    pub task: TaskSection,
    pub scheduler: SchedulerSection,
    pub runner: RunnerSection,
    pub spawner: SpawnerSection,
}

impl EngineConfig {
    pub(crate) fn new_unchecked(raw: RawEngineConfig) -> Self {
        Self {
            datadir: raw.datadir,
            run: raw.run,
            task: raw.task,
            scheduler: raw.scheduler,
            runner: raw.runner,
            spawner: raw.spawner,
        }
    }

    pub fn into_raw(self) -> RawEngineConfig {
        RawEngineConfig {
            datadir: self.datadir,
            run: self.run,
            task: self.task,
            scheduler: self.scheduler,
            runner: self.runner,
            spawner: self.spawner,
        }
    }

    /// Concurrency cap, resolving the CPU-derived default.
    pub fn max_running_tasks(&self) -> usize {
        self.scheduler
            .max_running_tasks
            .unwrap_or_else(default_max_running_tasks)
            .max(1)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task.timeout.map(seconds)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.run.job_timeout.map(seconds)
    }
}

/// Seconds as a [`Duration`], saturating where validation would have failed.
///
/// The sections have public fields, so a config mutated after validation
/// can still hold a negative or huge value here.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new_unchecked(RawEngineConfig::default())
    }
}

/// `[datadir]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatadirSection {
    /// Root under which every `job-*` results directory is created.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for DatadirSection {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join("avocado").join("job-results"),
        _ => PathBuf::from("job-results"),
    }
}

/// `[run]` section: what a job runs and how it reacts to failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub failfast: bool,
    #[serde(default)]
    pub execution_order: ExecutionOrder,
    #[serde(default)]
    pub ignore_missing_references: bool,
    /// Keep each task's `work` directory after it finishes.
    #[serde(default)]
    pub keep_tmp: bool,
    #[serde(default)]
    pub sysinfo: bool,
    /// Resolve and create tasks, but have every task report CANCEL instead
    /// of running.
    #[serde(default)]
    pub dry_run: bool,
    /// Tag filter groups, OR-ed together.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tags_include_empty: bool,
    #[serde(default)]
    pub tags_include_empty_key: bool,
    /// JSON file holding a serialized variant set.
    #[serde(default)]
    pub variants_file: Option<PathBuf>,
    /// Whole-job limit in seconds; hitting it interrupts the job.
    #[serde(default)]
    pub job_timeout: Option<f64>,
    /// `key = value` parameters exposed to every test as a single variant.
    #[serde(default)]
    pub test_parameters: BTreeMap<String, String>,
}

/// `[task]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSection {
    /// Per-task timeout in seconds. Unbounded when absent.
    #[serde(default)]
    pub timeout: Option<f64>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Defaults to `2 * cpus - 1` when absent.
    #[serde(default)]
    pub max_running_tasks: Option<usize>,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_running_tasks: None,
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_tick_ms() -> u64 {
    50
}

pub fn default_max_running_tasks() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (2 * cpus).saturating_sub(1).max(1)
}

/// `[runner]` section: how execution contexts are supervised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    /// Seconds a context may run without sending `started`.
    #[serde(default = "default_early_status_timeout")]
    pub early_status_timeout: f64,
    #[serde(default)]
    pub timeout: RunnerTimeouts,
    /// Seconds between the graceful signal and the forced kill.
    #[serde(default = "default_interrupt_grace")]
    pub interrupt_grace: f64,
    /// Command used to run a task recipe; the recipe path is appended.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Exit codes of `exec-test` tests that mean SKIP.
    #[serde(default)]
    pub exectest_skip_codes: Vec<i32>,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            early_status_timeout: default_early_status_timeout(),
            timeout: RunnerTimeouts::default(),
            interrupt_grace: default_interrupt_grace(),
            command: None,
            exectest_skip_codes: Vec::new(),
        }
    }
}

impl RunnerSection {
    pub fn early_status_timeout(&self) -> Duration {
        seconds(self.early_status_timeout)
    }

    pub fn interrupt_grace(&self) -> Duration {
        seconds(self.interrupt_grace)
    }
}

fn default_early_status_timeout() -> f64 {
    60.0
}

fn default_interrupt_grace() -> f64 {
    10.0
}

/// `[runner.timeout]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerTimeouts {
    /// Seconds a context may stay alive after reporting `finished`.
    #[serde(default = "default_process_grace")]
    pub process_alive: f64,
    /// Seconds to wait for trailing messages after the context exited.
    #[serde(default = "default_process_grace")]
    pub process_died: f64,
}

impl Default for RunnerTimeouts {
    fn default() -> Self {
        Self {
            process_alive: default_process_grace(),
            process_died: default_process_grace(),
        }
    }
}

impl RunnerTimeouts {
    pub fn process_alive(&self) -> Duration {
        seconds(self.process_alive)
    }

    pub fn process_died(&self) -> Duration {
        seconds(self.process_died)
    }
}

fn default_process_grace() -> f64 {
    5.0
}

/// `[spawner]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpawnerSection {
    #[serde(default)]
    pub kind: SpawnerKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unvalidated_timeouts_saturate() {
        let mut cfg = EngineConfig::default();
        cfg.task.timeout = Some(1e20);
        cfg.runner.interrupt_grace = f64::INFINITY;
        cfg.runner.timeout.process_died = -3.0;
        cfg.runner.timeout.process_alive = f64::NAN;

        assert_eq!(cfg.task_timeout(), Some(Duration::MAX));
        assert_eq!(cfg.runner.interrupt_grace(), Duration::MAX);
        assert_eq!(cfg.runner.timeout.process_died(), Duration::ZERO);
        assert_eq!(cfg.runner.timeout.process_alive(), Duration::ZERO);
    }

    #[test]
    fn fractional_seconds_are_kept() {
        let mut cfg = EngineConfig::default();
        cfg.run.job_timeout = Some(1.5);
        assert_eq!(cfg.job_timeout(), Some(Duration::from_millis(1500)));
    }
}
