// src/status/mod.rs

//! Status server.
//!
//! Spawned execution contexts report over a one-way status pipe. Every line
//! read from a pipe becomes a [`StatusFrame`] on one unbounded channel; a
//! single drain task ([`StatusServer`]) parses the frames in arrival order,
//! writes progress payloads into the task directory and records the state
//! the scheduler reads back from the [`StatusRepo`].

pub mod handlers;
pub mod message;
pub mod repo;
pub mod server;

use tokio::sync::mpsc;
use tracing::trace;

pub use message::{MessageKind, ProgressKind, StatusMessage, StatusPayload, monotonic_seconds};
pub use repo::{SharedRepo, StatusRepo, TaskStatusLog};
pub use server::StatusServer;

/// One unit delivered to the status drain.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusFrame {
    /// A raw line read from the status pipe of `task_id`.
    Line { task_id: String, line: String },
    /// The status pipe of `task_id` reached end of file.
    Closed { task_id: String },
}

/// Sending half of the status channel, handed to spawners.
#[derive(Debug, Clone)]
pub struct StatusSender {
    tx: mpsc::UnboundedSender<StatusFrame>,
}

impl StatusSender {
    pub fn send_line(&self, task_id: &str, line: impl Into<String>) -> bool {
        let frame = StatusFrame::Line {
            task_id: task_id.to_string(),
            line: line.into(),
        };
        if self.tx.send(frame).is_err() {
            trace!(task = task_id, "status drain gone; dropping line");
            return false;
        }
        true
    }

    pub fn send_message(&self, task_id: &str, message: &StatusMessage) -> bool {
        match message.to_line() {
            Ok(line) => self.send_line(task_id, line),
            Err(_) => false,
        }
    }

    pub fn close(&self, task_id: &str) {
        let _ = self.tx.send(StatusFrame::Closed {
            task_id: task_id.to_string(),
        });
    }
}

pub fn status_channel() -> (StatusSender, mpsc::UnboundedReceiver<StatusFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatusSender { tx }, rx)
}
