// src/status/server.rs

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::status::handlers::write_artifacts;
use crate::status::message::StatusMessage;
use crate::status::repo::SharedRepo;
use crate::status::StatusFrame;

/// The single status drain.
///
/// Frames are applied strictly in arrival order, so a task's `finished`
/// is only visible in the repo after every earlier message of that task.
pub struct StatusServer {
    repo: SharedRepo,
    rx: mpsc::UnboundedReceiver<StatusFrame>,
}

impl StatusServer {
    pub fn new(repo: SharedRepo, rx: mpsc::UnboundedReceiver<StatusFrame>) -> Self {
        Self { repo, rx }
    }

    pub fn repo(&self) -> SharedRepo {
        SharedRepo::clone(&self.repo)
    }

    /// Drain until every sender is gone.
    pub async fn run(mut self) {
        while let Some(frame) = self.rx.recv().await {
            self.apply(frame).await;
        }
        debug!("status drain finished");
    }

    pub async fn apply(&self, frame: StatusFrame) {
        match frame {
            StatusFrame::Closed { task_id } => {
                if let Ok(mut repo) = self.repo.lock() {
                    repo.mark_closed(&task_id);
                }
                debug!(task = %task_id, "status pipe closed");
            }
            StatusFrame::Line { task_id, line } => {
                if line.trim().is_empty() {
                    return;
                }
                let message = match StatusMessage::parse_line(&line) {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(task = %task_id, error = %err, "discarding unparsable status message");
                        return;
                    }
                };
                if let Some(id) = message.id.as_deref() {
                    if id != task_id {
                        warn!(task = %task_id, reported = id, "status message carries a different task id");
                    }
                }

                let dir = self
                    .repo
                    .lock()
                    .ok()
                    .and_then(|repo| repo.task_dir(&task_id).cloned());
                let Some(dir) = dir else {
                    warn!(task = %task_id, "status message for unknown task discarded");
                    return;
                };

                if let Err(err) = write_artifacts(&dir, &message).await {
                    warn!(task = %task_id, error = %err, "failed to write status payload");
                }

                if let Ok(mut repo) = self.repo.lock() {
                    repo.process_message(&task_id, message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::TaskDir;
    use crate::status::{StatusRepo, status_channel};
    use crate::task::{TaskId, TaskResult};
    use crate::types::Outcome;

    #[tokio::test]
    async fn drains_in_order_and_survives_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = StatusRepo::shared();
        let id = TaskId::from("1-1-t");
        repo.lock()
            .unwrap()
            .register(&id, TaskDir::new(tmp.path().join("t")));

        let (tx, rx) = status_channel();
        let server = StatusServer::new(repo.clone(), rx);
        let drain = tokio::spawn(server.run());

        tx.send_message("1-1-t", &StatusMessage::started(None));
        tx.send_line("1-1-t", "{ not json");
        tx.send_message("ghost", &StatusMessage::heartbeat());
        tx.send_message("1-1-t", &StatusMessage::finished(&TaskResult::new(Outcome::Pass)));
        tx.close("1-1-t");
        drop(tx);
        drain.await.unwrap();

        let repo = repo.lock().unwrap();
        let log = repo.get("1-1-t").unwrap();
        assert_eq!(log.messages.len(), 2);
        assert!(log.pipe_closed);
        assert_eq!(log.finished.as_ref().unwrap().outcome, Outcome::Pass);
    }
}
