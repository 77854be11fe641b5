// src/result/human.rs

use std::io::Write;
use std::sync::Mutex;

use crate::errors::Result;
use crate::result::aggregator::JobResults;
use crate::result::events::{ResultEvents, TestProgress};
use crate::result::record::TestResultRecord;

/// Console progress and summary.
///
/// ```text
/// JOB ID     : 5c1b...
/// JOB LOG    : /home/u/avocado/job-results/job-.../job.log
///  (1/2) 1-1-passtest.sh: STARTED
///  (1/2) 1-1-passtest.sh: PASS (0.01 s)
/// RESULTS : PASS 1 | ERROR 0 | FAIL 1 | SKIP 0 | WARN 0 | INTERRUPT 0 | CANCEL 0
/// ```
pub struct HumanResult<W: Write + Send> {
    out: Mutex<W>,
}

impl HumanResult<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> HumanResult<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> ResultEvents for HumanResult<W> {
    fn name(&self) -> &str {
        "human"
    }

    fn pre_tests(&self, job_id: &str, job_log: &str) -> Result<()> {
        self.write_line(&format!("JOB ID     : {job_id}"))?;
        self.write_line(&format!("JOB LOG    : {job_log}"))
    }

    fn start_test(&self, task_id: &str, progress: TestProgress) -> Result<()> {
        self.write_line(&format!(
            " ({}/{}) {task_id}: STARTED",
            progress.index, progress.total
        ))
    }

    fn end_test(&self, record: &TestResultRecord, progress: TestProgress) -> Result<()> {
        let elapsed = record.time_elapsed.unwrap_or(0.0);
        let mut line = format!(
            " ({}/{}) {}: {} ({elapsed:.2} s)",
            progress.index, progress.total, record.id, record.status
        );
        if let Some(reason) = &record.fail_reason {
            line.push_str(&format!(": {reason}"));
        }
        self.write_line(&line)
    }

    fn post_tests(&self, results: &JobResults) -> Result<()> {
        for test in &results.tests {
            if matches!(test.status.as_str(), "FAIL" | "ERROR" | "CANCEL") {
                self.write_line(&format!(
                    "{} {}: {} (see {})",
                    test.status,
                    test.id,
                    test.fail_reason.as_deref().unwrap_or("no reason given"),
                    test.logfile
                ))?;
            }
        }
        self.write_line(&results.counters().summary_line())?;
        self.write_line(&format!("JOB TIME   : {:.2} s", results.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::record::ResultCounters;

    fn record(id: &str, status: &str, reason: Option<&str>) -> TestResultRecord {
        TestResultRecord {
            id: id.into(),
            name: "t".into(),
            uri: None,
            kind: "noop".into(),
            status: status.into(),
            fail_reason: reason.map(str::to_string),
            fail_class: None,
            traceback: None,
            logdir: "/r/t".into(),
            logfile: "/r/t/debug.log".into(),
            time_start: Some(1.0),
            time_end: Some(1.5),
            time_elapsed: Some(0.5),
            whiteboard: String::new(),
            tags: Default::default(),
            variant_id: None,
            status_reason: None,
            returncode: None,
        }
    }

    #[test]
    fn prints_progress_and_summary() {
        let human = HumanResult::new(Vec::new());
        let progress = TestProgress { index: 1, total: 2 };
        human.start_test("1-a", progress).unwrap();
        human
            .end_test(&record("1-a", "FAIL", Some("boom")), progress)
            .unwrap();

        let counters = ResultCounters {
            fail: 1,
            ..Default::default()
        };
        let results = JobResults {
            job_id: "j".into(),
            debuglog: "/r/job.log".into(),
            logdir: "/r".into(),
            start: "now".into(),
            end: None,
            time: 0.5,
            total: counters.total(),
            pass: 0,
            fail: 1,
            errors: 0,
            skip: 0,
            cancel: 0,
            warn: 0,
            interrupt: 0,
            tests: vec![record("1-a", "FAIL", Some("boom"))],
            status: "FAIL".into(),
        };
        human.post_tests(&results).unwrap();

        let text = String::from_utf8(human.into_inner()).unwrap();
        assert!(text.contains(" (1/2) 1-a: STARTED\n"));
        assert!(text.contains(" (1/2) 1-a: FAIL (0.50 s): boom\n"));
        assert!(text.contains("FAIL 1-a: boom (see /r/t/debug.log)\n"));
        assert!(text.contains("RESULTS : PASS 0 | ERROR 0 | FAIL 1 |"));
    }
}
