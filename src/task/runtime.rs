// src/task/runtime.rs

use std::time::{Duration, Instant};

use tracing::warn;

use crate::paths::TaskDir;
use crate::result::TestResultRecord;
use crate::runnable::Runnable;
use crate::spawner::{ExitInfo, SpawnHandle};
use crate::status::StatusMessage;
use crate::task::TaskId;
use crate::types::{Outcome, TaskStatus};

/// Final result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub outcome: Outcome,
    pub fail_reason: Option<String>,
    pub fail_class: Option<String>,
    pub traceback: Option<String>,
    pub returncode: Option<i32>,
}

impl TaskResult {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            fail_reason: None,
            fail_class: None,
            traceback: None,
            returncode: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.fail_reason = Some(reason.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.fail_class = Some(class.into());
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn with_returncode(mut self, code: Option<i32>) -> Self {
        self.returncode = code;
        self
    }
}

/// A runnable plus everything the scheduler tracks about it.
#[derive(Debug)]
pub struct RuntimeTask {
    id: TaskId,
    runnable: Runnable,
    category: String,
    position: usize,
    task_dir: TaskDir,
    job_id: String,
    status: TaskStatus,
    status_reason: Option<String>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    status_messages: Vec<StatusMessage>,
    result: Option<TaskResult>,
    pub(crate) handle: Option<SpawnHandle>,
    pub(crate) spawned_at: Option<Instant>,
    pub(crate) exit: Option<(ExitInfo, Instant)>,
    pub(crate) finished_seen_at: Option<Instant>,
    pub(crate) time_start: Option<f64>,
    pub(crate) time_end: Option<f64>,
    pub(crate) replay_skip: bool,
}

impl RuntimeTask {
    pub fn new(
        id: TaskId,
        runnable: Runnable,
        position: usize,
        task_dir: TaskDir,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            runnable,
            category: "test".to_string(),
            position,
            task_dir,
            job_id: job_id.into(),
            status: TaskStatus::Requested,
            status_reason: None,
            timeout: None,
            deadline: None,
            status_messages: Vec::new(),
            result: None,
            handle: None,
            spawned_at: None,
            exit: None,
            finished_seen_at: None,
            time_start: None,
            time_end: None,
            replay_skip: false,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn runnable(&self) -> &Runnable {
        &self.runnable
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Creation order inside the job, starting at 0.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn task_dir(&self) -> &TaskDir {
        &self.task_dir
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Extra detail on the current status, e.g. `WAITING`.
    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn status_messages(&self) -> &[StatusMessage] {
        &self.status_messages
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.result.as_ref().map(|r| r.outcome)
    }

    pub fn is_replay_skip(&self) -> bool {
        self.replay_skip
    }

    pub fn mark_replay_skip(&mut self) {
        self.replay_skip = true;
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus, reason: Option<&str>) {
        self.status = status;
        self.status_reason = reason.map(str::to_string);
    }

    /// Start the deadline clock; unbounded when no timeout is set or the
    /// timeout reaches past the clock's range.
    pub(crate) fn arm_deadline(&mut self, now: Instant) {
        self.deadline = self.timeout.and_then(|t| now.checked_add(t));
    }

    /// Move the deadline earlier to `limit`, never later.
    pub(crate) fn tighten_deadline(&mut self, limit: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) if current < limit => current,
            _ => limit,
        });
    }

    pub fn append_status(&mut self, message: StatusMessage) {
        self.status_messages.push(message);
    }

    /// Record the final result.
    ///
    /// The outcome is set exactly once; later calls are ignored and return
    /// `false`.
    pub(crate) fn finish(&mut self, result: TaskResult, reason: Option<&str>) -> bool {
        if let Some(existing) = &self.result {
            warn!(
                task = %self.id,
                existing = %existing.outcome,
                ignored = %result.outcome,
                "task already finished"
            );
            return false;
        }
        self.result = Some(result);
        self.set_status(TaskStatus::Finished, reason);
        true
    }

    /// Result record handed to the aggregator.
    pub fn result_record(&self) -> TestResultRecord {
        TestResultRecord::from_task(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> RuntimeTask {
        RuntimeTask::new(
            TaskId::from("1-1-noop"),
            Runnable::new("noop", ""),
            0,
            TaskDir::new("/tmp/x"),
            "job",
        )
    }

    #[test]
    fn outcome_is_set_once() {
        let mut t = task();
        assert!(t.finish(TaskResult::new(Outcome::Pass), None));
        assert!(!t.finish(TaskResult::new(Outcome::Fail), None));
        assert_eq!(t.outcome(), Some(Outcome::Pass));
        assert_eq!(t.status(), TaskStatus::Finished);
    }

    #[test]
    fn deadlines_only_tighten() {
        let mut t = task();
        let now = Instant::now();
        t.arm_deadline(now);
        assert_eq!(t.deadline(), None);

        t.set_timeout(Some(Duration::from_secs(10)));
        t.arm_deadline(now);
        t.tighten_deadline(now + Duration::from_secs(2));
        assert_eq!(t.deadline(), Some(now + Duration::from_secs(2)));
        t.tighten_deadline(now + Duration::from_secs(5));
        assert_eq!(t.deadline(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn out_of_range_timeout_arms_no_deadline() {
        let mut t = task();
        t.set_timeout(Some(Duration::MAX));
        t.arm_deadline(Instant::now());
        assert_eq!(t.deadline(), None);
    }
}
