// src/status/handlers.rs

//! Writes progress payloads into the task directory.

use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::errors::Result;
use crate::paths::TaskDir;
use crate::status::message::{MessageKind, ProgressKind, StatusMessage};

/// Persist whatever `message` carries for `dir`.
///
/// `started` makes sure the directory exists; `log` lines go to
/// `debug.log`, `stdout`/`stderr` bytes and `whiteboard` text are appended
/// to their files as they arrive.
pub async fn write_artifacts(dir: &TaskDir, message: &StatusMessage) -> Result<()> {
    if message.kind() == MessageKind::Started {
        fs::create_dir_all(dir.path()).await?;
        return Ok(());
    }

    let Some((kind, mut bytes)) = message.progress_bytes()? else {
        return Ok(());
    };

    let path = match kind {
        ProgressKind::Log => {
            if !bytes.ends_with(b"\n") {
                bytes.push(b'\n');
            }
            dir.debug_log()
        }
        ProgressKind::Stdout => dir.stdout(),
        ProgressKind::Stderr => dir.stderr(),
        ProgressKind::Whiteboard => dir.whiteboard(),
    };
    append(&path, &bytes).await
}

async fn append(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_lands_in_the_right_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = TaskDir::new(tmp.path().join("1-1-t"));

        write_artifacts(&dir, &StatusMessage::started(None)).await.unwrap();
        write_artifacts(&dir, &StatusMessage::progress(ProgressKind::Stdout, b"out1\n")).await.unwrap();
        write_artifacts(&dir, &StatusMessage::progress(ProgressKind::Stdout, b"out2\n")).await.unwrap();
        write_artifacts(&dir, &StatusMessage::progress(ProgressKind::Stderr, b"err")).await.unwrap();
        write_artifacts(&dir, &StatusMessage::progress(ProgressKind::Log, b"a log line")).await.unwrap();
        write_artifacts(&dir, &StatusMessage::progress(ProgressKind::Whiteboard, b"wb")).await.unwrap();

        assert_eq!(std::fs::read_to_string(dir.stdout()).unwrap(), "out1\nout2\n");
        assert_eq!(std::fs::read_to_string(dir.stderr()).unwrap(), "err");
        assert_eq!(std::fs::read_to_string(dir.debug_log()).unwrap(), "a log line\n");
        assert_eq!(std::fs::read_to_string(dir.whiteboard()).unwrap(), "wb");
    }
}
