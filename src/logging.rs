// src/logging.rs

//! Logging setup for `avocado` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `AVOCADO_LOG` environment variable (e.g. "info", "debug")
//! 3. the caller supplied default (`info` for the engine)
//!
//! Logs are sent to STDERR so that command stdout can be used purely for
//! command output. A second layer copies everything at debug level into the
//! current job's `job.log` once a [`JobLogSink`] file is attached.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;

use crate::cli::LogLevel;

/// Cloneable handle to the job log file.
///
/// Writes are discarded while no file is attached.
#[derive(Debug, Clone, Default)]
pub struct JobLogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl JobLogSink {
    /// Start copying log records into `path` (created or appended to).
    pub fn attach(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut guard) = self.file.lock() {
            *guard = Some(file);
        }
        Ok(())
    }

    /// Write one raw line, bypassing the subscriber.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.make_writer();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn detach(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(mut file) = guard.take() {
                let _ = file.flush();
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.file.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Writer produced by [`JobLogSink`] for each log record.
pub struct JobLogWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for JobLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(file) => file.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(file) => file.flush(),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for JobLogSink {
    type Writer = JobLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        JobLogWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Initialise global logging subscriber.
///
/// Safe to call once at startup. Returns the job log sink that the job
/// attaches its `job.log` to.
pub fn init_logging(cli_level: Option<LogLevel>, default: tracing::Level) -> Result<JobLogSink> {
    let level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var("AVOCADO_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(default),
    };

    let sink = JobLogSink::default();

    // Send logs to stderr; keep stdout free for command output.
    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(io::stderr)
        .with_filter(LevelFilter::from_level(level));

    let job_log_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(sink.clone())
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(job_log_layer)
        .try_init()?;

    Ok(sink)
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_discards_until_attached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let sink = JobLogSink::default();

        sink.write_line("dropped").unwrap();
        assert!(!path.exists());

        sink.attach(&path).unwrap();
        sink.write_line("Command line: avocado run a").unwrap();
        sink.detach();
        sink.write_line("dropped again").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Command line: avocado run a\n");
    }

    #[test]
    fn level_strings_parse() {
        assert_eq!(parse_level_str(" WARNING "), Some(tracing::Level::WARN));
        assert_eq!(parse_level_str("nope"), None);
    }
}
