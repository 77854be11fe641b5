// src/runner/emitter.rs

use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::Result;
use crate::runner::RunIdentity;
use crate::status::StatusMessage;

/// Writes status messages, one JSON line each, flushing after every line so
/// the engine sees them as they happen.
pub struct StatusEmitter<W> {
    out: W,
    identity: RunIdentity,
    last_emit: Instant,
}

impl<W: AsyncWrite + Unpin> StatusEmitter<W> {
    pub fn new(out: W, identity: RunIdentity) -> Self {
        Self {
            out,
            identity,
            last_emit: Instant::now(),
        }
    }

    pub async fn emit(&mut self, message: StatusMessage) -> Result<()> {
        let message = match &self.identity.id {
            Some(id) => message.with_identity(id, self.identity.job_id.as_deref()),
            None => message,
        };
        self.out.write_all(message.to_line()?.as_bytes()).await?;
        self.out.flush().await?;
        self.last_emit = Instant::now();
        Ok(())
    }

    /// Time since the last emitted line.
    pub fn silent_for(&self) -> Duration {
        self.last_emit.elapsed()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
