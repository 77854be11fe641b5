// src/engine/worker.rs

//! Cooperative scheduler workers.
//!
//! Each worker loops over `bootstrap`, `triage`, `start` and `monitor`.
//! Every step handles at most one task and suspends only on spawner calls,
//! queue locks and the idle tick, so any number of workers can share the
//! same [`StateMachine`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::engine::core::{
    INTERRUPTED_REASON, MonitorAction, Observation, TIMEOUT_REASON, aborted_result, decide,
};
use crate::engine::state_machine::{StartSlot, StateMachine};
use crate::engine::{SchedulerControl, SchedulerOptions};
use crate::spawner::Spawner;
use crate::status::{SharedRepo, StatusSender};
use crate::task::{RuntimeTask, TaskResult};
use crate::types::Outcome;

pub const REPLAY_SKIP_REASON: &str = "replay skip";
pub const REQUIREMENTS_REASON: &str = "requirements not met";
pub const FAILED_ON_START: &str = "FAILED ON START";
pub const FAILFAST_REASON: &str = "failfast";
const STDERR_TAIL_LINES: usize = 20;

/// State shared by all workers of one scheduler run.
pub(crate) struct Shared {
    pub(crate) sm: StateMachine,
    pub(crate) spawner: Arc<dyn Spawner>,
    pub(crate) repo: SharedRepo,
    pub(crate) status: StatusSender,
    pub(crate) control: Arc<SchedulerControl>,
    pub(crate) options: SchedulerOptions,
}

pub(crate) struct Worker {
    index: usize,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(index: usize, shared: Arc<Shared>) -> Self {
        Self { index, shared }
    }

    pub(crate) async fn run(self) {
        debug!(worker = self.index, "worker started");
        loop {
            let control = &self.shared.control;
            if control.is_interrupted() && control.claim_interrupt() {
                self.handle_interrupt().await;
            }
            if self.shared.sm.complete().await {
                break;
            }

            let mut progressed = self.bootstrap().await;
            progressed |= self.triage().await;
            progressed |= self.start().await;
            progressed |= self.monitor().await;

            if progressed {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.shared.options.tick).await;
            }
        }
        debug!(worker = self.index, "worker done");
    }

    async fn bootstrap(&self) -> bool {
        self.shared.sm.bootstrap().await
    }

    async fn triage(&self) -> bool {
        let Some(task) = self.shared.sm.pop_triaging().await else {
            return false;
        };

        if let Some((outcome, reason)) = self.shared.control.stop_reason() {
            self.finish_with_reason(task, outcome, reason, false).await;
            return true;
        }
        if task.is_replay_skip() {
            self.finish_with_reason(task, Outcome::Skip, REPLAY_SKIP_REASON, false)
                .await;
            return true;
        }
        if !self.shared.spawner.check_requirements(&task).await {
            warn!(
                task = %task.id(),
                kind = task.runnable().kind(),
                spawner = self.shared.spawner.name(),
                "requirements not met"
            );
            self.finish(
                task,
                TaskResult::new(Outcome::Error).with_reason(REQUIREMENTS_REASON),
                None,
                false,
            )
            .await;
            return true;
        }

        trace!(task = %task.id(), "triaged");
        self.shared.sm.push_ready(task).await;
        true
    }

    async fn start(&self) -> bool {
        let max = self.shared.options.max_running;
        let mut task = match self.shared.sm.reserve_start(max).await {
            StartSlot::Empty | StartSlot::Waiting => return false,
            StartSlot::Reserved(task) => task,
        };

        if let Some((outcome, reason)) = self.shared.control.stop_reason() {
            self.finish_with_reason(task, outcome, reason, true).await;
            return true;
        }
        if task.timeout() == Some(Duration::ZERO) {
            self.finish(
                task,
                TaskResult::new(Outcome::Fail).with_reason(TIMEOUT_REASON),
                None,
                true,
            )
            .await;
            return true;
        }

        if let Ok(mut repo) = self.shared.repo.lock() {
            repo.register(task.id(), task.task_dir().clone());
        }

        match self
            .shared
            .spawner
            .spawn(&task, self.shared.status.clone())
            .await
        {
            Ok(handle) => {
                let now = Instant::now();
                info!(task = %task.id(), worker = self.index, pid = ?handle.pid, "task started");
                task.handle = Some(handle);
                task.spawned_at = Some(now);
                task.arm_deadline(now);
                self.shared.sm.push_started(task).await;
            }
            Err(err) => {
                warn!(task = %task.id(), error = %err, "spawner rejected task");
                let result = TaskResult::new(Outcome::Error)
                    .with_reason(err.to_string())
                    .with_class("SpawnerError");
                self.finish(task, result, Some(FAILED_ON_START), true).await;
            }
        }
        true
    }

    async fn monitor(&self) -> bool {
        let Some(mut task) = self.shared.sm.pop_started().await else {
            return false;
        };
        let now = Instant::now();
        if let Some(limit) = self.shared.control.stop_deadline() {
            task.tighten_deadline(limit);
        }

        let Some(handle) = task.handle.clone() else {
            let result = TaskResult::new(Outcome::Error).with_reason("lost execution context");
            self.finish(task, result, None, true).await;
            return true;
        };

        if task.exit.is_none() {
            if let Some(exit) = self.shared.spawner.wait(&handle, Some(Duration::ZERO)).await {
                debug!(task = %task.id(), exit = %exit.describe(), "execution context exited");
                task.exit = Some((exit, now));
            }
        }

        let (started, finished, pipe_closed, fresh) = match self.shared.repo.lock() {
            Ok(repo) => {
                let seen = task.status_messages().len();
                let fresh = repo.messages_since(task.id().as_str(), seen);
                match repo.get(task.id().as_str()) {
                    Some(log) => (log.has_started(), log.finished.clone(), log.pipe_closed, fresh),
                    None => (false, None, false, fresh),
                }
            }
            Err(_) => (false, None, false, Vec::new()),
        };
        for message in fresh {
            task.append_status(message);
        }
        if finished.is_some() && task.finished_seen_at.is_none() {
            task.finished_seen_at = Some(now);
        }

        let observation = Observation {
            now,
            spawned_at: task.spawned_at.unwrap_or(now),
            deadline: task.deadline(),
            started,
            finished: finished.map(|r| (r, task.finished_seen_at.unwrap_or(now))),
            exit: task.exit,
            pipe_closed,
            interrupted: self.shared.control.is_interrupted(),
        };

        match decide(&observation, &self.shared.options.monitor) {
            MonitorAction::Keep => {
                self.shared.sm.requeue_started(task).await;
                false
            }
            MonitorAction::Finish(result) => {
                self.finish(task, result, None, true).await;
                true
            }
            MonitorAction::TerminateAndFinish { result, grace } => {
                info!(
                    task = %task.id(),
                    outcome = %result.outcome,
                    reason = result.fail_reason.as_deref().unwrap_or(""),
                    "stopping execution context"
                );
                self.finish(task, result, None, true).await;
                if let Err(err) = self.shared.spawner.terminate(&handle, grace).await {
                    warn!(task = %handle.task_id, error = %err, "failed to terminate execution context");
                }
                true
            }
            MonitorAction::Aborted(exit) => {
                warn!(task = %task.id(), exit = %exit.describe(), "execution context died without a result");
                let tail = stderr_tail(&task).await;
                self.finish(task, aborted_result(exit, tail.as_deref()), None, true)
                    .await;
                true
            }
        }
    }

    /// Graceful stop: cancel pending work, then terminate every STARTED
    /// context concurrently.
    async fn handle_interrupt(&self) {
        let shared = &self.shared;
        warn!(worker = self.index, "interrupt requested; stopping job");
        shared
            .sm
            .abort_pending(Outcome::Interrupted, INTERRUPTED_REASON)
            .await;

        let started = shared.sm.take_started().await;
        let mut terminations = JoinSet::new();
        for task in &started {
            if let Some(handle) = task.handle.clone() {
                let spawner = Arc::clone(&shared.spawner);
                let grace = shared.options.interrupt_grace;
                terminations.spawn(async move {
                    if let Err(err) = spawner.terminate(&handle, grace).await {
                        warn!(task = %handle.task_id, error = %err, "failed to terminate execution context");
                    }
                });
            }
        }
        while terminations.join_next().await.is_some() {}

        for task in started {
            let reported = shared
                .repo
                .lock()
                .ok()
                .and_then(|repo| repo.get(task.id().as_str()).and_then(|l| l.finished.clone()));
            let result = reported.unwrap_or_else(|| {
                TaskResult::new(Outcome::Interrupted)
                    .with_reason(INTERRUPTED_REASON)
            });
            self.finish(task, result, None, true).await;
        }
    }

    async fn finish_with_reason(&self, task: RuntimeTask, outcome: Outcome, reason: &str, held_slot: bool) {
        let result = TaskResult::new(outcome).with_reason(reason);
        self.finish(task, result, Some(reason), held_slot).await;
    }

    /// Finish `task`, triggering failfast on the first bad outcome.
    async fn finish(
        &self,
        task: RuntimeTask,
        result: TaskResult,
        reason: Option<&str>,
        held_slot: bool,
    ) {
        let shared = &self.shared;
        // Raised before the slot is released.
        let failfast = shared.options.failfast
            && task.outcome().is_none()
            && !result.outcome.is_good()
            && !shared.control.is_interrupted()
            && shared
                .control
                .trigger_failfast(Instant::now().checked_add(shared.options.interrupt_grace));
        let outcome = shared.sm.finish_task(task, result, reason, held_slot).await;

        if failfast {
            warn!(outcome = %outcome, "failfast: cancelling remaining tasks");
            shared.sm.abort_pending(Outcome::Cancel, FAILFAST_REASON).await;
        }
    }
}

/// Last lines of the task's `stderr` artifact.
async fn stderr_tail(task: &RuntimeTask) -> Option<String> {
    let text = tokio::fs::read_to_string(task.task_dir().stderr()).await.ok()?;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Some(lines[start..].join("\n"))
}
