// src/status/repo.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::paths::TaskDir;
use crate::status::message::{MessageKind, StatusMessage};
use crate::task::{TaskId, TaskResult};

pub type SharedRepo = Arc<Mutex<StatusRepo>>;

/// Everything the status server knows about one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatusLog {
    pub messages: Vec<StatusMessage>,
    /// Monotonic time of the `started` message.
    pub started_at: Option<f64>,
    pub logfile: Option<String>,
    /// First `finished` result received; later ones are ignored.
    pub finished: Option<TaskResult>,
    pub finished_at: Option<f64>,
    pub last_update: Option<f64>,
    pub pipe_closed: bool,
}

impl TaskStatusLog {
    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }
}

#[derive(Debug)]
struct Entry {
    dir: TaskDir,
    log: TaskStatusLog,
}

/// Authoritative per-task status state.
///
/// Only the status drain mutates it; the scheduler reads snapshots.
#[derive(Debug, Default)]
pub struct StatusRepo {
    tasks: HashMap<String, Entry>,
    result_stats: BTreeMap<String, usize>,
}

impl StatusRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRepo {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Make `task_id` known so its messages are accepted.
    pub fn register(&mut self, task_id: &TaskId, dir: TaskDir) {
        self.tasks.entry(task_id.as_str().to_string()).or_insert(Entry {
            dir,
            log: TaskStatusLog::default(),
        });
    }

    pub fn task_dir(&self, task_id: &str) -> Option<&TaskDir> {
        self.tasks.get(task_id).map(|e| &e.dir)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskStatusLog> {
        self.tasks.get(task_id).map(|e| &e.log)
    }

    /// Apply one message. Returns `false` when the task is unknown and the
    /// message was discarded.
    pub fn process_message(&mut self, task_id: &str, message: StatusMessage) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            warn!(task = task_id, "status message for unknown task discarded");
            return false;
        };
        let log = &mut entry.log;
        log.last_update = Some(message.time);

        match message.kind() {
            MessageKind::Started => {
                if log.started_at.is_none() {
                    log.started_at = Some(message.time);
                    log.logfile = message.logfile().map(str::to_string);
                }
            }
            MessageKind::Finished => {
                if log.finished.is_none() {
                    if let Some(result) = message.task_result() {
                        *self
                            .result_stats
                            .entry(result.outcome.as_lower().to_string())
                            .or_default() += 1;
                        debug!(task = task_id, outcome = %result.outcome, "finished status received");
                        log.finished = Some(result);
                        log.finished_at = Some(message.time);
                    }
                }
            }
            _ => {}
        }

        log.messages.push(message);
        true
    }

    pub fn mark_closed(&mut self, task_id: &str) {
        if let Some(entry) = self.tasks.get_mut(task_id) {
            entry.log.pipe_closed = true;
        }
    }

    /// Messages of `task_id` after the first `seen` ones.
    pub fn messages_since(&self, task_id: &str, seen: usize) -> Vec<StatusMessage> {
        self.get(task_id)
            .map(|log| log.messages.iter().skip(seen).cloned().collect())
            .unwrap_or_default()
    }

    /// Count of `finished` messages per lowercase outcome.
    pub fn result_stats(&self) -> &BTreeMap<String, usize> {
        &self.result_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    #[test]
    fn unknown_tasks_are_discarded() {
        let mut repo = StatusRepo::new();
        assert!(!repo.process_message("ghost", StatusMessage::heartbeat()));
        assert!(repo.get("ghost").is_none());
    }

    #[test]
    fn first_finished_wins() {
        let mut repo = StatusRepo::new();
        let id = TaskId::from("1-1-t");
        repo.register(&id, TaskDir::new("/tmp/t"));

        repo.process_message("1-1-t", StatusMessage::started(Some("/tmp/t/debug.log".into())));
        repo.process_message("1-1-t", StatusMessage::finished(&TaskResult::new(Outcome::Pass)));
        repo.process_message("1-1-t", StatusMessage::finished(&TaskResult::new(Outcome::Fail)));

        let log = repo.get("1-1-t").unwrap();
        assert!(log.has_started());
        assert_eq!(log.logfile.as_deref(), Some("/tmp/t/debug.log"));
        assert_eq!(log.finished.as_ref().map(|r| r.outcome), Some(Outcome::Pass));
        assert_eq!(log.messages.len(), 3);
        assert_eq!(repo.result_stats().get("pass"), Some(&1));
        assert_eq!(repo.result_stats().get("fail"), None);
        assert_eq!(repo.messages_since("1-1-t", 2).len(), 1);
    }
}
