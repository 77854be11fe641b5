// src/result/record.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::task::RuntimeTask;
use crate::types::Outcome;

/// Wall-clock seconds since the epoch, as recorded in results.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Final state of one test as persisted in `results.json` and
/// `<task_dir>/result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultRecord {
    pub id: String,
    pub name: String,
    pub uri: Option<String>,
    pub kind: String,
    /// Uppercase outcome, e.g. `PASS`.
    pub status: String,
    pub fail_reason: Option<String>,
    pub fail_class: Option<String>,
    pub traceback: Option<String>,
    pub logdir: String,
    pub logfile: String,
    pub time_start: Option<f64>,
    pub time_end: Option<f64>,
    pub time_elapsed: Option<f64>,
    #[serde(default)]
    pub whiteboard: String,
    #[serde(default)]
    pub tags: BTreeMap<String, Option<BTreeSet<String>>>,
    pub variant_id: Option<String>,
    pub status_reason: Option<String>,
    pub returncode: Option<i32>,
}

impl TestResultRecord {
    /// Record of `task` without its whiteboard; see [`Self::with_whiteboard`].
    pub fn from_task(task: &RuntimeTask) -> Self {
        let result = task.result();
        let dir = task.task_dir();
        let time_elapsed = match (task.time_start, task.time_end) {
            (Some(start), Some(end)) => Some((end - start).max(0.0)),
            _ => None,
        };
        let runnable = task.runnable();

        Self {
            id: task.id().to_string(),
            name: runnable.name().to_string(),
            uri: runnable.uri().map(str::to_string),
            kind: runnable.kind().to_string(),
            status: result
                .map(|r| r.outcome.as_upper().to_string())
                .unwrap_or_else(|| task.status().to_string()),
            fail_reason: result.and_then(|r| r.fail_reason.clone()),
            fail_class: result.and_then(|r| r.fail_class.clone()),
            traceback: result.and_then(|r| r.traceback.clone()),
            logdir: dir.path().display().to_string(),
            logfile: dir.debug_log().display().to_string(),
            time_start: task.time_start,
            time_end: task.time_end,
            time_elapsed,
            whiteboard: String::new(),
            tags: runnable.tags().clone(),
            variant_id: runnable.variant().and_then(|v| v.variant_id.clone()),
            status_reason: task.status_reason().map(str::to_string),
            returncode: result.and_then(|r| r.returncode),
        }
    }

    pub fn with_whiteboard(mut self, whiteboard: String) -> Self {
        self.whiteboard = whiteboard;
        self
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.status.parse().ok()
    }
}

/// Number of finished tests per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounters {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub skip: usize,
    pub cancel: usize,
    pub warn: usize,
    pub interrupted: usize,
}

impl ResultCounters {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => self.pass += 1,
            Outcome::Fail => self.fail += 1,
            Outcome::Error => self.error += 1,
            Outcome::Skip => self.skip += 1,
            Outcome::Cancel => self.cancel += 1,
            Outcome::Warn => self.warn += 1,
            Outcome::Interrupted => self.interrupted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.error + self.skip + self.cancel + self.warn + self.interrupted
    }

    pub fn any_failure(&self) -> bool {
        self.fail > 0 || self.error > 0
    }

    /// `RESULTS : PASS n | ERROR n | ...`
    pub fn summary_line(&self) -> String {
        format!(
            "RESULTS : PASS {} | ERROR {} | FAIL {} | SKIP {} | WARN {} | INTERRUPT {} | CANCEL {}",
            self.pass, self.error, self.fail, self.skip, self.warn, self.interrupted, self.cancel
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_add_up() {
        let mut c = ResultCounters::default();
        for o in Outcome::ALL {
            c.add(o);
        }
        c.add(Outcome::Pass);
        assert_eq!(c.total(), Outcome::ALL.len() + 1);
        assert_eq!(c.pass, 2);
        assert!(c.any_failure());
    }

    #[test]
    fn summary_line_order() {
        let c = ResultCounters {
            pass: 1,
            fail: 2,
            cancel: 3,
            ..Default::default()
        };
        assert_eq!(
            c.summary_line(),
            "RESULTS : PASS 1 | ERROR 0 | FAIL 2 | SKIP 0 | WARN 0 | INTERRUPT 0 | CANCEL 3"
        );
    }
}
