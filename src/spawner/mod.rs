// src/spawner/mod.rs

//! Spawner abstraction.
//!
//! The scheduler talks to a [`Spawner`] instead of spawning processes
//! itself, so the same state machine drives local subprocesses in
//! production and in-process fakes in tests.
//!
//! - [`process`] provides [`ProcessSpawner`], one `avocado task-run-recipe`
//!   subprocess per task.
//! - [`environment`] computes the variables exported into a running test.
//! - [`status_pipe`] forwards a child's status pipe to the status server.

pub mod environment;
pub mod process;
pub mod status_pipe;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;
use crate::status::StatusSender;
use crate::task::RuntimeTask;

pub use environment::TaskEnvironment;
pub use process::ProcessSpawner;

pub type SpawnFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque reference to a live execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnHandle {
    pub task_id: String,
    /// Spawner-local key of the context.
    pub key: u64,
    /// OS process id, when the context is a local process.
    pub pid: Option<u32>,
}

/// How an execution context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(sig)) => format!("signal {sig}"),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

/// Realises tasks as execution contexts.
///
/// Implementations must be usable from several scheduler workers at once.
pub trait Spawner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `task` can run here at all (runner available for its kind).
    fn check_requirements<'a>(&'a self, task: &'a RuntimeTask) -> SpawnFuture<'a, bool>;

    /// Start the execution context of `task`.
    ///
    /// Status lines of the context must be forwarded through `status`,
    /// followed by a close frame once its pipe ends.
    fn spawn<'a>(
        &'a self,
        task: &'a RuntimeTask,
        status: StatusSender,
    ) -> SpawnFuture<'a, Result<SpawnHandle>>;

    fn is_alive(&self, handle: &SpawnHandle) -> bool;

    /// Ask the context to stop, forcing it down after `grace`.
    fn terminate<'a>(&'a self, handle: &'a SpawnHandle, grace: Duration) -> SpawnFuture<'a, Result<()>>;

    /// Wait up to `timeout` (forever when `None`) for the context to exit.
    ///
    /// Returns `None` if it is still running when the timeout expires.
    fn wait<'a>(
        &'a self,
        handle: &'a SpawnHandle,
        timeout: Option<Duration>,
    ) -> SpawnFuture<'a, Option<ExitInfo>>;
}
