// src/result/aggregator.rs

//! Accumulates finished tests into the job result.
//!
//! Every FINISHED transition lands here: the record is appended, counters
//! move, `<task_dir>/result.json` and the job's `results.json` are
//! rewritten atomically off the async workers and the result events fire. The job reads the
//! final [`JobResults`] back at teardown.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AvocadoError, Result};
use crate::paths::JobLayout;
use crate::result::events::{ResultEventDispatcher, TestProgress};
use crate::result::persist::{atomic_write_json, atomic_write_json_async};
use crate::result::record::{ResultCounters, TestResultRecord};
use crate::task::RuntimeTask;

/// Canonical `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: String,
    pub debuglog: String,
    pub logdir: String,
    pub start: String,
    pub end: Option<String>,
    /// Wall time of the job in seconds.
    pub time: f64,
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub errors: usize,
    pub skip: usize,
    pub cancel: usize,
    pub warn: usize,
    pub interrupt: usize,
    pub tests: Vec<TestResultRecord>,
    /// `PASS`, `FAIL`, `INTERRUPTED` or `ERROR`.
    pub status: String,
}

impl JobResults {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| AvocadoError::Job(format!("invalid {}: {e}", path.display())))
    }

    pub fn counters(&self) -> ResultCounters {
        ResultCounters {
            pass: self.pass,
            fail: self.fail,
            error: self.errors,
            skip: self.skip,
            cancel: self.cancel,
            warn: self.warn,
            interrupted: self.interrupt,
        }
    }
}

/// How the job as a whole ended, beyond the test outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobEnd {
    pub interrupted: bool,
    pub errored: bool,
}

#[derive(Debug, Default)]
struct State {
    records: Vec<(usize, TestResultRecord)>,
    counters: ResultCounters,
    expected: usize,
    started: usize,
    ended: usize,
    end: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub struct ResultAggregator {
    job_id: String,
    layout: JobLayout,
    events: ResultEventDispatcher,
    start: DateTime<Local>,
    start_mono: Instant,
    state: Mutex<State>,
    /// Tests ended as of the last `results.json` write.
    persisted: tokio::sync::Mutex<usize>,
}

impl ResultAggregator {
    pub fn new(job_id: impl Into<String>, layout: JobLayout, events: ResultEventDispatcher) -> Self {
        Self {
            job_id: job_id.into(),
            layout,
            events,
            start: Local::now(),
            start_mono: Instant::now(),
            state: Mutex::new(State::default()),
            persisted: tokio::sync::Mutex::new(0),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    pub fn events(&self) -> &ResultEventDispatcher {
        &self.events
    }

    /// Announce `count` more tests (one call per suite).
    pub fn expect_tests(&self, count: usize) {
        self.lock_state().expected += count;
    }

    pub fn start_test(&self, task: &RuntimeTask) {
        let progress = {
            let mut state = self.lock_state();
            state.started += 1;
            TestProgress {
                index: state.started,
                total: state.expected.max(state.started),
            }
        };
        self.events.start_test(task.id().as_str(), progress);
    }

    /// Record a finished task. Persistence failures are logged, not raised.
    ///
    /// Files are written on the blocking pool and never under the state
    /// lock.
    pub async fn end_test(&self, task: &RuntimeTask) -> TestResultRecord {
        let whiteboard = tokio::fs::read_to_string(task.task_dir().whiteboard())
            .await
            .unwrap_or_default();
        let record = task.result_record().with_whiteboard(whiteboard);
        if let Err(err) =
            atomic_write_json_async(task.task_dir().result_json(), record.clone()).await
        {
            warn!(task = %task.id(), error = %err, "failed to write test result");
        }

        let progress = {
            let mut state = self.lock_state();
            if let Some(outcome) = task.outcome() {
                state.counters.add(outcome);
            }
            state.ended += 1;
            state.records.push((task.position(), record.clone()));
            TestProgress {
                index: state.ended,
                total: state.expected.max(state.ended),
            }
        };
        self.persist_progress().await;

        debug!(task = %task.id(), status = %record.status, "test result recorded");
        self.events.end_test(&record, progress);
        record
    }

    /// Rewrite `results.json` with every test ended so far.
    ///
    /// Writers queue on `persisted`; one that finds its tests already
    /// written by a later snapshot skips the write.
    async fn persist_progress(&self) {
        let mut persisted = self.persisted.lock().await;
        let snapshot = {
            let state = self.lock_state();
            if state.ended <= *persisted {
                return;
            }
            *persisted = state.ended;
            self.snapshot(&state, JobEnd::default())
        };
        if let Err(err) = atomic_write_json_async(self.layout.results_json(), snapshot).await {
            warn!(error = %err, "failed to update results.json");
        }
    }

    pub fn counters(&self) -> ResultCounters {
        self.lock_state().counters
    }

    /// Records ordered by task creation.
    pub fn records(&self) -> Vec<TestResultRecord> {
        sorted_records(&self.lock_state().records)
    }

    /// Current job result.
    pub fn results(&self, end: JobEnd) -> JobResults {
        self.snapshot(&self.lock_state(), end)
    }

    /// Close the job: stamp the end time, write `results.json` and notify
    /// listeners.
    pub fn finalize(&self, end: JobEnd) -> Result<JobResults> {
        let results = {
            let mut state = self.lock_state();
            state.end = Some(Local::now());
            self.snapshot(&state, end)
        };
        atomic_write_json(&self.layout.results_json(), &results)?;
        self.events.post_tests(&results);
        Ok(results)
    }

    /// The state stays usable after a panicking listener poisoned the lock.
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &State, end: JobEnd) -> JobResults {
        let c = state.counters;
        let status = if end.errored {
            "ERROR"
        } else if end.interrupted {
            "INTERRUPTED"
        } else if c.any_failure() {
            "FAIL"
        } else {
            "PASS"
        };
        JobResults {
            job_id: self.job_id.clone(),
            debuglog: self.layout.job_log().display().to_string(),
            logdir: self.layout.root().display().to_string(),
            start: self.start.to_rfc3339(),
            end: state.end.map(|t| t.to_rfc3339()),
            time: self.start_mono.elapsed().as_secs_f64(),
            total: c.total(),
            pass: c.pass,
            fail: c.fail,
            errors: c.error,
            skip: c.skip,
            cancel: c.cancel,
            warn: c.warn,
            interrupt: c.interrupted,
            tests: sorted_records(&state.records),
            status: status.to_string(),
        }
    }
}

fn sorted_records(records: &[(usize, TestResultRecord)]) -> Vec<TestResultRecord> {
    let mut sorted: Vec<_> = records.iter().collect();
    sorted.sort_by_key(|(position, _)| *position);
    sorted.into_iter().map(|(_, r)| r.clone()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::paths::TaskDir;
    use crate::runnable::Runnable;
    use crate::task::{TaskId, TaskResult};
    use crate::types::Outcome;

    fn finished(layout: &JobLayout, position: usize, outcome: Outcome) -> RuntimeTask {
        let id = TaskId::from(format!("1-{position}-noop").as_str());
        let dir: TaskDir = layout.task_dir(id.as_str());
        let mut task = RuntimeTask::new(id, Runnable::new("noop", ""), position, dir, "job");
        task.finish(TaskResult::new(outcome), None);
        task
    }

    #[tokio::test]
    async fn results_are_ordered_by_position_and_totals_match() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(tmp.path());
        let agg = ResultAggregator::new("job", layout.clone(), ResultEventDispatcher::new());
        agg.expect_tests(3);

        agg.end_test(&finished(&layout, 2, Outcome::Cancel)).await;
        agg.end_test(&finished(&layout, 0, Outcome::Pass)).await;
        agg.end_test(&finished(&layout, 1, Outcome::Fail)).await;

        let results = agg.finalize(JobEnd::default()).unwrap();
        assert_eq!(results.total, 3);
        assert_eq!(
            results.total,
            results.pass + results.fail + results.errors + results.skip + results.cancel
                + results.warn + results.interrupt
        );
        let ids: Vec<_> = results.tests.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["1-0-noop", "1-1-noop", "1-2-noop"]);
        assert_eq!(results.status, "FAIL");

        let on_disk = JobResults::load(&layout.results_json()).unwrap();
        assert_eq!(on_disk.tests.len(), 3);
        assert!(layout.task_dir("1-0-noop").result_json().is_file());
    }

    #[test]
    fn interrupted_job_status() {
        let tmp = tempfile::tempdir().unwrap();
        let agg = ResultAggregator::new(
            "job",
            JobLayout::new(tmp.path()),
            ResultEventDispatcher::new(),
        );
        let results = agg.results(JobEnd {
            interrupted: true,
            errored: false,
        });
        assert_eq!(results.status, "INTERRUPTED");
        assert_eq!(results.total, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_finishes_keep_counters_and_file_in_step() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(tmp.path());
        let agg = Arc::new(ResultAggregator::new(
            "job",
            layout.clone(),
            ResultEventDispatcher::new(),
        ));
        agg.expect_tests(16);

        let mut set = tokio::task::JoinSet::new();
        for position in 0..16 {
            let agg = Arc::clone(&agg);
            let task = finished(&layout, position, Outcome::Pass);
            set.spawn(async move { agg.end_test(&task).await });
        }
        while let Some(joined) = set.join_next().await {
            joined.unwrap();
        }

        assert_eq!(agg.counters().pass, 16);
        assert_eq!(agg.records().len(), 16);
        let on_disk = JobResults::load(&layout.results_json()).unwrap();
        assert_eq!(on_disk.tests.len(), 16);
        assert_eq!(on_disk.pass, 16);
    }

    #[tokio::test]
    async fn whiteboard_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(tmp.path());
        let agg = ResultAggregator::new("job", layout.clone(), ResultEventDispatcher::new());
        let task = finished(&layout, 0, Outcome::Pass);
        std::fs::create_dir_all(task.task_dir().path()).unwrap();
        std::fs::write(task.task_dir().whiteboard(), "notes").unwrap();

        let record = agg.end_test(&task).await;
        assert_eq!(record.whiteboard, "notes");
    }

    #[tokio::test]
    async fn poisoned_state_still_counts_tests() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(tmp.path());
        let agg = Arc::new(ResultAggregator::new(
            "job",
            layout.clone(),
            ResultEventDispatcher::new(),
        ));
        let poisoner = Arc::clone(&agg);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.lock().unwrap();
            panic!("listener blew up");
        })
        .join();
        assert!(agg.state.is_poisoned());

        agg.end_test(&finished(&layout, 0, Outcome::Fail)).await;
        assert_eq!(agg.counters().fail, 1);
        let results = agg.finalize(JobEnd::default()).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.status, "FAIL");
    }
}
