// src/engine/mod.rs

//! Task execution engine.
//!
//! This module ties together:
//! - the per-state task queues ([`state_machine`])
//! - the pure monitor decisions ([`core`])
//! - the cooperative workers driving tasks through the queues ([`worker`])
//! - the async shell running workers, the status drain, Ctrl-C and the job
//!   timeout ([`runtime`])

pub mod core;
pub mod runtime;
pub mod state_machine;
pub mod worker;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::types::Outcome;

pub use self::core::{MonitorAction, MonitorTimeouts, Observation};
pub use runtime::{Runtime, RunSummary};
pub use state_machine::{QueueCounts, StateMachine};

/// Scheduler knobs, derived from the engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub max_running: usize,
    /// Idle sleep of a worker that found nothing to do.
    pub tick: Duration,
    pub failfast: bool,
    pub monitor: MonitorTimeouts,
    /// Graceful-stop window on interrupt; also the failfast deadline
    /// tightening.
    pub interrupt_grace: Duration,
    pub job_timeout: Option<Duration>,
    /// Turn Ctrl-C into a graceful stop.
    pub handle_signals: bool,
}

impl SchedulerOptions {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            workers: cfg.scheduler.workers.max(1),
            max_running: cfg.max_running_tasks(),
            tick: Duration::from_millis(cfg.scheduler.tick_ms.max(1)),
            failfast: cfg.run.failfast,
            monitor: MonitorTimeouts {
                early_status: cfg.runner.early_status_timeout(),
                process_alive: cfg.runner.timeout.process_alive(),
                process_died: cfg.runner.timeout.process_died(),
            },
            interrupt_grace: cfg.runner.interrupt_grace(),
            job_timeout: cfg.job_timeout(),
            handle_signals: true,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Cross-worker control flags of one scheduler run.
#[derive(Debug, Default)]
pub struct SchedulerControl {
    interrupted: AtomicBool,
    interrupt_claimed: AtomicBool,
    failfast: AtomicBool,
    job_timeout: AtomicBool,
    stop_deadline: Mutex<Option<Instant>>,
}

impl SchedulerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop (user interrupt).
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Stop because the job ran out of time.
    pub fn expire_job(&self) {
        self.job_timeout.store(true, Ordering::SeqCst);
        self.interrupt();
    }

    pub fn job_timed_out(&self) -> bool {
        self.job_timeout.load(Ordering::SeqCst)
    }

    /// Exactly one caller wins the right to run the interrupt sequence.
    pub(crate) fn claim_interrupt(&self) -> bool {
        !self.interrupt_claimed.swap(true, Ordering::SeqCst)
    }

    /// Returns `true` only for the call that actually triggered failfast.
    ///
    /// STARTED tasks get `tighten_to` as their deadline; `None` leaves
    /// their own deadlines in place.
    pub fn trigger_failfast(&self, tighten_to: Option<Instant>) -> bool {
        if self.failfast.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut deadline) = self.stop_deadline.lock() {
            *deadline = tighten_to;
        }
        true
    }

    pub fn failfast_triggered(&self) -> bool {
        self.failfast.load(Ordering::SeqCst)
    }

    /// Deadline imposed on STARTED tasks after failfast.
    pub fn stop_deadline(&self) -> Option<Instant> {
        self.stop_deadline.lock().ok().and_then(|d| *d)
    }

    /// Outcome for tasks that must not start any more.
    pub fn stop_reason(&self) -> Option<(Outcome, &'static str)> {
        if self.is_interrupted() {
            Some((Outcome::Interrupted, self::core::INTERRUPTED_REASON))
        } else if self.failfast_triggered() {
            Some((Outcome::Cancel, worker::FAILFAST_REASON))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failfast_triggers_once() {
        let control = SchedulerControl::new();
        let when = Instant::now();
        assert!(control.trigger_failfast(Some(when)));
        assert!(!control.trigger_failfast(Some(when + Duration::from_secs(1))));
        assert_eq!(control.stop_deadline(), Some(when));
        assert_eq!(control.stop_reason(), Some((Outcome::Cancel, "failfast")));
    }

    #[test]
    fn failfast_without_a_deadline_still_cancels() {
        let control = SchedulerControl::new();
        assert!(control.trigger_failfast(Instant::now().checked_add(Duration::MAX)));
        assert_eq!(control.stop_deadline(), None);
        assert_eq!(control.stop_reason(), Some((Outcome::Cancel, "failfast")));
    }

    #[test]
    fn interrupt_wins_over_failfast() {
        let control = SchedulerControl::new();
        control.trigger_failfast(Some(Instant::now()));
        control.expire_job();
        assert!(control.job_timed_out());
        assert_eq!(control.stop_reason().map(|r| r.0), Some(Outcome::Interrupted));
        assert!(control.claim_interrupt());
        assert!(!control.claim_interrupt());
    }

    #[test]
    fn options_follow_config() {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.workers = 2;
        cfg.scheduler.max_running_tasks = Some(3);
        cfg.run.failfast = true;
        let opts = SchedulerOptions::from_config(&cfg);
        assert_eq!(opts.workers, 2);
        assert_eq!(opts.max_running, 3);
        assert!(opts.failfast);
        assert_eq!(opts.monitor.early_status, Duration::from_secs(60));
    }
}
