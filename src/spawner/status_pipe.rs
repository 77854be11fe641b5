// src/spawner/status_pipe.rs

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::status::StatusSender;

/// Forward every line of `reader` to the status server as frames of
/// `task_id`, then send the close frame.
pub fn forward_status_pipe<R>(task_id: String, reader: R, status: StatusSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !status.send_line(&task_id, line) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(task = %task_id, error = %err, "error reading status pipe");
                    break;
                }
            }
        }
        debug!(task = %task_id, "status pipe ended");
        status.close(&task_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StatusFrame, status_channel};

    #[tokio::test]
    async fn lines_then_close() {
        let (tx, mut rx) = status_channel();
        let input: &[u8] = b"{\"a\":1}\nsecond\n";
        forward_status_pipe("t".into(), input, tx).await.unwrap();

        let mut frames = Vec::new();
        while let Some(f) = rx.recv().await {
            frames.push(f);
        }
        assert_eq!(
            frames,
            vec![
                StatusFrame::Line { task_id: "t".into(), line: "{\"a\":1}".into() },
                StatusFrame::Line { task_id: "t".into(), line: "second".into() },
                StatusFrame::Closed { task_id: "t".into() },
            ]
        );
    }
}
