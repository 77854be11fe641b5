// src/status/message.rs

//! Status message wire format: one JSON object per line.
//!
//! ```text
//! {"status":"started","time":812.3,"id":"1-1-noop","logfile":"/r/.../debug.log"}
//! {"status":"running","time":812.8,"type":"stdout","log":"aGkK","encoding":"base64"}
//! {"status":"finished","time":813.0,"result":"pass"}
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::errors::{AvocadoError, Result};
use crate::task::TaskResult;
use crate::types::Outcome;

/// Seconds on the system monotonic clock, comparable across processes.
#[cfg(unix)]
pub fn monotonic_seconds() -> f64 {
    use nix::time::{ClockId, clock_gettime};
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| ts.tv_sec() as f64 + ts.tv_nsec() as f64 / 1e9)
        .unwrap_or(0.0)
}

#[cfg(not(unix))]
pub fn monotonic_seconds() -> f64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Kind of a progress payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Log,
    Stdout,
    Stderr,
    Whiteboard,
}

/// Normalised message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Started,
    Running,
    Log,
    Stdout,
    Stderr,
    Whiteboard,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusPayload {
    Started {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logfile: Option<String>,
    },
    Running {
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        kind: Option<ProgressKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        log: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
    },
    Log {
        log: String,
    },
    Stdout {
        log: String,
    },
    Stderr {
        log: String,
    },
    Whiteboard {
        log: String,
    },
    Finished {
        result: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail_class: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        returncode: Option<i32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub time: f64,
    #[serde(flatten)]
    pub payload: StatusPayload,
}

impl StatusMessage {
    pub fn new(payload: StatusPayload) -> Self {
        Self {
            id: None,
            job_id: None,
            time: monotonic_seconds(),
            payload,
        }
    }

    pub fn with_identity(mut self, id: &str, job_id: Option<&str>) -> Self {
        self.id = Some(id.to_string());
        self.job_id = job_id.map(str::to_string);
        self
    }

    pub fn started(logfile: Option<String>) -> Self {
        Self::new(StatusPayload::Started { logfile })
    }

    /// Plain `running` heartbeat.
    pub fn heartbeat() -> Self {
        Self::new(StatusPayload::Running {
            kind: None,
            log: None,
            encoding: None,
        })
    }

    pub fn progress(kind: ProgressKind, data: &[u8]) -> Self {
        let (log, encoding) = match kind {
            ProgressKind::Stdout | ProgressKind::Stderr => {
                (BASE64.encode(data), Some("base64".to_string()))
            }
            ProgressKind::Log | ProgressKind::Whiteboard => {
                (String::from_utf8_lossy(data).into_owned(), None)
            }
        };
        Self::new(StatusPayload::Running {
            kind: Some(kind),
            log: Some(log),
            encoding,
        })
    }

    pub fn finished(result: &TaskResult) -> Self {
        Self::new(StatusPayload::Finished {
            result: result.outcome,
            fail_reason: result.fail_reason.clone(),
            fail_class: result.fail_class.clone(),
            traceback: result.traceback.clone(),
            returncode: result.returncode,
        })
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            StatusPayload::Started { .. } => MessageKind::Started,
            StatusPayload::Running { kind: None, .. } => MessageKind::Running,
            StatusPayload::Running {
                kind: Some(kind), ..
            } => match kind {
                ProgressKind::Log => MessageKind::Log,
                ProgressKind::Stdout => MessageKind::Stdout,
                ProgressKind::Stderr => MessageKind::Stderr,
                ProgressKind::Whiteboard => MessageKind::Whiteboard,
            },
            StatusPayload::Log { .. } => MessageKind::Log,
            StatusPayload::Stdout { .. } => MessageKind::Stdout,
            StatusPayload::Stderr { .. } => MessageKind::Stderr,
            StatusPayload::Whiteboard { .. } => MessageKind::Whiteboard,
            StatusPayload::Finished { .. } => MessageKind::Finished,
        }
    }

    /// Decoded progress bytes, if this message carries any.
    ///
    /// stdout and stderr payloads are base64 on the wire.
    pub fn progress_bytes(&self) -> Result<Option<(ProgressKind, Vec<u8>)>> {
        let (kind, log) = match &self.payload {
            StatusPayload::Running {
                kind: Some(kind),
                log: Some(log),
                ..
            } => (*kind, log),
            StatusPayload::Log { log } => (ProgressKind::Log, log),
            StatusPayload::Stdout { log } => (ProgressKind::Stdout, log),
            StatusPayload::Stderr { log } => (ProgressKind::Stderr, log),
            StatusPayload::Whiteboard { log } => (ProgressKind::Whiteboard, log),
            _ => return Ok(None),
        };

        let bytes = match kind {
            ProgressKind::Stdout | ProgressKind::Stderr => BASE64
                .decode(log.trim())
                .map_err(|e| AvocadoError::Other(anyhow::anyhow!("bad base64 payload: {e}")))?,
            ProgressKind::Log | ProgressKind::Whiteboard => log.as_bytes().to_vec(),
        };
        Ok(Some((kind, bytes)))
    }

    /// Result carried by a `finished` message.
    pub fn task_result(&self) -> Option<TaskResult> {
        match &self.payload {
            StatusPayload::Finished {
                result,
                fail_reason,
                fail_class,
                traceback,
                returncode,
            } => Some(TaskResult {
                outcome: *result,
                fail_reason: fail_reason.clone(),
                fail_class: fail_class.clone(),
                traceback: traceback.clone(),
                returncode: *returncode,
            }),
            _ => None,
        }
    }

    /// `logfile` announced by a `started` message.
    pub fn logfile(&self) -> Option<&str> {
        match &self.payload {
            StatusPayload::Started { logfile } => logfile.as_deref(),
            _ => None,
        }
    }

    /// Newline terminated JSON line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_line_shape() {
        let msg = StatusMessage {
            id: Some("1-1-noop".into()),
            job_id: None,
            time: 1.5,
            payload: StatusPayload::Finished {
                result: Outcome::Pass,
                fail_reason: None,
                fail_class: None,
                traceback: None,
                returncode: None,
            },
        };
        let line = msg.to_line().unwrap();
        assert_eq!(line, "{\"id\":\"1-1-noop\",\"time\":1.5,\"status\":\"finished\",\"result\":\"pass\"}\n");
        assert_eq!(StatusMessage::parse_line(&line).unwrap(), msg);
    }

    #[test]
    fn stdout_progress_is_base64() {
        let msg = StatusMessage::progress(ProgressKind::Stdout, b"hello\n");
        let line = msg.to_line().unwrap();
        assert!(line.contains("\"type\":\"stdout\""));
        assert!(line.contains("aGVsbG8K"));

        let back = StatusMessage::parse_line(&line).unwrap();
        assert_eq!(back.kind(), MessageKind::Stdout);
        assert_eq!(
            back.progress_bytes().unwrap(),
            Some((ProgressKind::Stdout, b"hello\n".to_vec()))
        );
    }

    #[test]
    fn bare_kinds_and_extra_keys_parse() {
        let msg = StatusMessage::parse_line(
            r#"{"status": "whiteboard", "time": 3, "log": "data", "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), MessageKind::Whiteboard);
        assert_eq!(
            msg.progress_bytes().unwrap(),
            Some((ProgressKind::Whiteboard, b"data".to_vec()))
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(StatusMessage::parse_line("not json").is_err());
        assert!(StatusMessage::parse_line(r#"{"status": "exploded", "time": 1}"#).is_err());
        assert!(StatusMessage::parse_line(r#"{"status": "started"}"#).is_err());
    }

    #[test]
    fn finished_converts_to_task_result() {
        let result = TaskResult::new(Outcome::Fail)
            .with_reason("assertion")
            .with_returncode(Some(1));
        let msg = StatusMessage::finished(&result);
        assert_eq!(msg.task_result(), Some(result));
        assert_eq!(msg.kind(), MessageKind::Finished);
    }
}
