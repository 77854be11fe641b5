// src/result/events.rs

//! Result events for external writers.
//!
//! Listeners see every test start and end plus the final job result. A
//! failing listener is logged and skipped; it never changes the job outcome.

use std::sync::Arc;

use tracing::warn;

use crate::errors::Result;
use crate::result::aggregator::JobResults;
use crate::result::record::TestResultRecord;

/// Position of a test inside the job, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestProgress {
    pub index: usize,
    pub total: usize,
}

pub trait ResultEvents: Send + Sync {
    fn name(&self) -> &str;

    fn pre_tests(&self, _job_id: &str, _job_log: &str) -> Result<()> {
        Ok(())
    }

    fn start_test(&self, task_id: &str, progress: TestProgress) -> Result<()>;

    fn end_test(&self, record: &TestResultRecord, progress: TestProgress) -> Result<()>;

    fn post_tests(&self, results: &JobResults) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct ResultEventDispatcher {
    listeners: Vec<Arc<dyn ResultEvents>>,
}

impl std::fmt::Debug for ResultEventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("ResultEventDispatcher")
            .field("listeners", &names)
            .finish()
    }
}

impl ResultEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn ResultEvents>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn pre_tests(&self, job_id: &str, job_log: &str) {
        self.each("pre_tests", |l| l.pre_tests(job_id, job_log));
    }

    pub fn start_test(&self, task_id: &str, progress: TestProgress) {
        self.each("start_test", |l| l.start_test(task_id, progress));
    }

    pub fn end_test(&self, record: &TestResultRecord, progress: TestProgress) {
        self.each("end_test", |l| l.end_test(record, progress));
    }

    pub fn post_tests(&self, results: &JobResults) {
        self.each("post_tests", |l| l.post_tests(results));
    }

    fn each<F>(&self, event: &str, mut call: F)
    where
        F: FnMut(&dyn ResultEvents) -> Result<()>,
    {
        for listener in &self.listeners {
            if let Err(err) = call(listener.as_ref()) {
                warn!(listener = listener.name(), event, error = %err, "result listener failed");
            }
        }
    }
}
