// src/engine/core.rs

//! Pure monitor decisions.
//!
//! The monitor step gathers an [`Observation`] of one STARTED task (clock,
//! deadline, what the status server has seen, whether the execution context
//! exited) and asks [`decide`] what to do with it. Keeping the decision
//! free of Tokio, channels and processes lets the timing rules be unit
//! tested directly; the async shell in [`crate::engine::worker`] carries
//! the resulting action out.

use std::time::{Duration, Instant};

use crate::spawner::ExitInfo;
use crate::task::TaskResult;
use crate::types::Outcome;

pub const TIMEOUT_REASON: &str = "timeout";
pub const ABORTED_REASON: &str = "aborted";
pub const EARLY_STATUS_REASON: &str = "no early status";
pub const INTERRUPTED_REASON: &str = "interrupted";

/// Timing knobs of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimeouts {
    /// How long a context may stay silent before its `started` message.
    pub early_status: Duration,
    /// Grace after `finished` before the context is forced down.
    pub process_alive: Duration,
    /// Grace after process exit for trailing status messages.
    pub process_died: Duration,
}

/// Snapshot of one STARTED task.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub now: Instant,
    pub spawned_at: Instant,
    pub deadline: Option<Instant>,
    /// A `started` message arrived.
    pub started: bool,
    /// First `finished` result, and when the monitor first saw it.
    pub finished: Option<(TaskResult, Instant)>,
    /// Exit of the execution context, and when the monitor first saw it.
    pub exit: Option<(ExitInfo, Instant)>,
    /// The status pipe reached end of file.
    pub pipe_closed: bool,
    /// The job is being interrupted.
    pub interrupted: bool,
}

/// What the shell should do with the observed task.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    /// Keep watching: back onto the STARTED queue.
    Keep,
    /// The context is gone; record `result`.
    Finish(TaskResult),
    /// Record `result`, then stop the context, forcing it after `grace`.
    TerminateAndFinish { result: TaskResult, grace: Duration },
    /// The context died without reporting a result.
    Aborted(ExitInfo),
}

pub fn decide(obs: &Observation, timeouts: &MonitorTimeouts) -> MonitorAction {
    if let Some((result, seen_at)) = &obs.finished {
        if obs.exit.is_some() {
            return MonitorAction::Finish(result.clone());
        }
        if obs.interrupted || elapsed(obs.now, *seen_at, timeouts.process_alive) {
            return MonitorAction::TerminateAndFinish {
                result: result.clone(),
                grace: timeouts.process_alive,
            };
        }
        return MonitorAction::Keep;
    }

    if let Some((exit, seen_at)) = obs.exit {
        if obs.interrupted {
            return MonitorAction::Finish(
                TaskResult::new(Outcome::Interrupted)
                    .with_reason(INTERRUPTED_REASON)
                    .with_returncode(exit.code),
            );
        }
        if obs.pipe_closed || elapsed(obs.now, seen_at, timeouts.process_died) {
            return MonitorAction::Aborted(exit);
        }
        return MonitorAction::Keep;
    }

    if obs.interrupted {
        return MonitorAction::TerminateAndFinish {
            result: TaskResult::new(Outcome::Interrupted).with_reason(INTERRUPTED_REASON),
            grace: timeouts.process_alive,
        };
    }

    if obs.deadline.is_some_and(|deadline| obs.now >= deadline) {
        return MonitorAction::TerminateAndFinish {
            result: TaskResult::new(Outcome::Fail)
                .with_reason(TIMEOUT_REASON)
                .with_class("TestTimeoutInterrupted"),
            grace: timeouts.process_alive,
        };
    }

    if !obs.started && elapsed(obs.now, obs.spawned_at, timeouts.early_status) {
        return MonitorAction::TerminateAndFinish {
            result: TaskResult::new(Outcome::Error).with_reason(EARLY_STATUS_REASON),
            grace: timeouts.process_alive,
        };
    }

    MonitorAction::Keep
}

/// `wait` has passed since `since`. A wait past the clock's range never ends.
fn elapsed(now: Instant, since: Instant, wait: Duration) -> bool {
    since.checked_add(wait).is_some_and(|end| now >= end)
}

/// Result of a context that died silently, with a traceback built from
/// its exit and the tail of its stderr.
pub fn aborted_result(exit: ExitInfo, stderr_tail: Option<&str>) -> TaskResult {
    let mut traceback = format!("execution context ended with {} before reporting a result", exit.describe());
    if let Some(tail) = stderr_tail.filter(|t| !t.trim().is_empty()) {
        traceback.push_str("\nlast stderr output:\n");
        traceback.push_str(tail.trim_end());
    }
    TaskResult::new(Outcome::Error)
        .with_reason(ABORTED_REASON)
        .with_traceback(traceback)
        .with_returncode(exit.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUTS: MonitorTimeouts = MonitorTimeouts {
        early_status: Duration::from_secs(60),
        process_alive: Duration::from_secs(5),
        process_died: Duration::from_secs(5),
    };

    fn observe(now: Instant) -> Observation {
        Observation {
            now,
            spawned_at: now,
            deadline: None,
            started: true,
            finished: None,
            exit: None,
            pipe_closed: false,
            interrupted: false,
        }
    }

    fn exited(code: i32, at: Instant) -> Option<(ExitInfo, Instant)> {
        Some((
            ExitInfo {
                code: Some(code),
                signal: None,
            },
            at,
        ))
    }

    #[test]
    fn running_task_is_kept() {
        let obs = observe(Instant::now());
        assert_eq!(decide(&obs, &TIMEOUTS), MonitorAction::Keep);
    }

    #[test]
    fn finished_and_exited_finishes_with_reported_result() {
        let now = Instant::now();
        let mut obs = observe(now);
        obs.finished = Some((TaskResult::new(Outcome::Pass), now));
        obs.exit = exited(0, now);
        assert_eq!(
            decide(&obs, &TIMEOUTS),
            MonitorAction::Finish(TaskResult::new(Outcome::Pass))
        );
    }

    #[test]
    fn finished_but_lingering_is_terminated_after_process_alive() {
        let start = Instant::now();
        let mut obs = observe(start);
        obs.finished = Some((TaskResult::new(Outcome::Pass), start));
        assert_eq!(decide(&obs, &TIMEOUTS), MonitorAction::Keep);

        obs.now = start + TIMEOUTS.process_alive;
        assert!(matches!(
            decide(&obs, &TIMEOUTS),
            MonitorAction::TerminateAndFinish { result, .. } if result.outcome == Outcome::Pass
        ));
    }

    #[test]
    fn deadline_reached_fails_with_timeout() {
        let start = Instant::now();
        let mut obs = observe(start + Duration::from_secs(2));
        obs.deadline = Some(start + Duration::from_secs(1));
        match decide(&obs, &TIMEOUTS) {
            MonitorAction::TerminateAndFinish { result, .. } => {
                assert_eq!(result.outcome, Outcome::Fail);
                assert_eq!(result.fail_reason.as_deref(), Some(TIMEOUT_REASON));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_early_status_is_an_error() {
        let start = Instant::now();
        let mut obs = observe(start);
        obs.started = false;
        assert_eq!(decide(&obs, &TIMEOUTS), MonitorAction::Keep);
        obs.now = start + TIMEOUTS.early_status;
        assert!(matches!(
            decide(&obs, &TIMEOUTS),
            MonitorAction::TerminateAndFinish { result, .. } if result.outcome == Outcome::Error
        ));
    }

    #[test]
    fn silent_exit_aborts_once_pipe_closes_or_grace_expires() {
        let start = Instant::now();
        let mut obs = observe(start);
        obs.exit = exited(1, start);
        assert_eq!(decide(&obs, &TIMEOUTS), MonitorAction::Keep);

        obs.pipe_closed = true;
        assert!(matches!(decide(&obs, &TIMEOUTS), MonitorAction::Aborted(_)));

        obs.pipe_closed = false;
        obs.now = start + TIMEOUTS.process_died;
        assert!(matches!(decide(&obs, &TIMEOUTS), MonitorAction::Aborted(_)));
    }

    #[test]
    fn reported_result_beats_deadline_and_interrupt() {
        let start = Instant::now();
        let mut obs = observe(start + Duration::from_secs(10));
        obs.deadline = Some(start);
        obs.interrupted = true;
        obs.finished = Some((TaskResult::new(Outcome::Fail), start));
        obs.exit = exited(0, start);
        assert_eq!(
            decide(&obs, &TIMEOUTS),
            MonitorAction::Finish(TaskResult::new(Outcome::Fail))
        );
    }

    #[test]
    fn unbounded_waits_keep_watching() {
        let forever = MonitorTimeouts {
            early_status: Duration::MAX,
            process_alive: Duration::MAX,
            process_died: Duration::MAX,
        };
        let start = Instant::now();
        let mut obs = observe(start + Duration::from_secs(3600));
        obs.started = false;
        assert_eq!(decide(&obs, &forever), MonitorAction::Keep);

        obs.started = true;
        obs.finished = Some((TaskResult::new(Outcome::Pass), start));
        assert_eq!(decide(&obs, &forever), MonitorAction::Keep);

        obs.finished = None;
        obs.exit = exited(1, start);
        assert_eq!(decide(&obs, &forever), MonitorAction::Keep);
    }

    #[test]
    fn aborted_result_carries_stderr_tail() {
        let exit = ExitInfo {
            code: None,
            signal: Some(9),
        };
        let result = aborted_result(exit, Some("boom\n"));
        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.fail_reason.as_deref(), Some(ABORTED_REASON));
        let tb = result.traceback.unwrap();
        assert!(tb.contains("signal 9"));
        assert!(tb.contains("boom"));
    }
}
