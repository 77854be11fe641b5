#![allow(dead_code)]

use std::path::Path;

use avocado::config::{EngineConfig, RawEngineConfig};
use avocado::types::ExecutionOrder;

/// Builder for `EngineConfig` with test-friendly timings.
///
/// Starts from the defaults with a short scheduler tick, short monitor
/// graces and no signal-sensitive settings, writing results under
/// `logs_dir`.
pub struct EngineConfigBuilder {
    config: RawEngineConfig,
}

impl EngineConfigBuilder {
    pub fn new(logs_dir: &Path) -> Self {
        let mut config = RawEngineConfig::default();
        config.datadir.logs_dir = logs_dir.to_path_buf();
        config.scheduler.tick_ms = 5;
        config.scheduler.workers = 2;
        config.runner.early_status_timeout = 2.0;
        config.runner.timeout.process_alive = 0.5;
        config.runner.timeout.process_died = 0.5;
        config.runner.interrupt_grace = 0.5;
        Self { config }
    }

    pub fn with_references(mut self, refs: &[&str]) -> Self {
        self.config.run.references = refs.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_failfast(mut self, on: bool) -> Self {
        self.config.run.failfast = on;
        self
    }

    pub fn with_execution_order(mut self, order: ExecutionOrder) -> Self {
        self.config.run.execution_order = order;
        self
    }

    pub fn with_max_running(mut self, n: usize) -> Self {
        self.config.scheduler.max_running_tasks = Some(n);
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.config.scheduler.workers = n;
        self
    }

    pub fn with_task_timeout(mut self, secs: f64) -> Self {
        self.config.task.timeout = Some(secs);
        self
    }

    pub fn with_job_timeout(mut self, secs: f64) -> Self {
        self.config.run.job_timeout = Some(secs);
        self
    }

    pub fn with_early_status_timeout(mut self, secs: f64) -> Self {
        self.config.runner.early_status_timeout = secs;
        self
    }

    pub fn with_sysinfo(mut self, on: bool) -> Self {
        self.config.run.sysinfo = on;
        self
    }

    pub fn with_dry_run(mut self, on: bool) -> Self {
        self.config.run.dry_run = on;
        self
    }

    pub fn with_test_parameter(mut self, key: &str, value: &str) -> Self {
        self.config
            .run
            .test_parameters
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Runnables understood by [`crate::ScriptedSpawner`].
pub mod fake {
    use avocado::runnable::Runnable;

    pub const PASS: &str = "fake-pass";
    pub const FAIL: &str = "fake-fail";
    pub const SLEEP: &str = "fake-sleep";
    pub const SILENT: &str = "fake-silent";
    pub const CRASH: &str = "fake-crash";

    /// Reports `started`, then `finished(pass)`.
    pub fn pass(name: &str) -> Runnable {
        Runnable::new(PASS, name)
    }

    /// Reports `started`, then `finished(fail)`.
    pub fn fail(name: &str) -> Runnable {
        Runnable::new(FAIL, name)
    }

    /// Reports `started`, sleeps `ms` milliseconds, then passes.
    pub fn sleep(ms: u64) -> Runnable {
        Runnable::new(SLEEP, ms.to_string())
    }

    /// Never reports anything and never exits on its own.
    pub fn silent(name: &str) -> Runnable {
        Runnable::new(SILENT, name)
    }

    /// Reports `started`, writes to stderr and exits with code 3.
    pub fn crash(name: &str) -> Runnable {
        Runnable::new(CRASH, name)
    }
}
