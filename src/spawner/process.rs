// src/spawner/process.rs

//! Local subprocess spawner.
//!
//! Every task becomes one runner process: the runner command (by default
//! `<current exe> task-run-recipe`) is started with the task recipe path
//! appended, inside the task directory. Its stdout is the status pipe, its
//! own stderr is appended to `<task_dir>/stderr`. A supervising task owns
//! the `Child` and publishes the exit status on a watch channel, so
//! `is_alive`/`wait` never need to touch the process directly.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{AvocadoError, Result};
use crate::runnable::TaskRecipe;
use crate::runner::SUPPORTED_KINDS;
use crate::spawner::status_pipe::forward_status_pipe;
use crate::spawner::{ExitInfo, SpawnFuture, SpawnHandle, Spawner, TaskEnvironment};
use crate::status::StatusSender;
use crate::task::RuntimeTask;

/// How long to wait for the runner to be reaped after a forced kill.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

struct ActiveContext {
    task_id: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

pub struct ProcessSpawner {
    command: Vec<String>,
    runner_args: Vec<String>,
    next_key: AtomicU64,
    active: Mutex<HashMap<u64, ActiveContext>>,
}

impl ProcessSpawner {
    /// Spawner using `runner.command` from `config`, or this executable's
    /// `task-run-recipe` subcommand when unset.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let command = match &config.runner.command {
            Some(cmd) => cmd.clone(),
            None => default_runner_command()?,
        };
        let mut runner_args = Vec::new();
        for code in &config.runner.exectest_skip_codes {
            runner_args.push("--skip-code".to_string());
            runner_args.push(code.to_string());
        }
        if config.run.keep_tmp {
            runner_args.push("--keep-tmp".to_string());
        }
        Ok(Self::with_command(command).with_runner_args(runner_args))
    }

    pub fn with_command(command: Vec<String>) -> Self {
        Self {
            command,
            runner_args: Vec::new(),
            next_key: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Options placed between the runner command and the recipe path.
    pub fn with_runner_args(mut self, args: Vec<String>) -> Self {
        self.runner_args = args;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn exit_receiver(&self, handle: &SpawnHandle) -> Option<watch::Receiver<Option<ExitInfo>>> {
        let active = self.active.lock().ok()?;
        active.get(&handle.key).map(|ctx| ctx.exit_rx.clone())
    }

    fn take_kill_sender(&self, handle: &SpawnHandle) -> Option<oneshot::Sender<()>> {
        let mut active = self.active.lock().ok()?;
        active.get_mut(&handle.key).and_then(|ctx| ctx.kill_tx.take())
    }

    /// Drop the bookkeeping of a context whose exit has been observed.
    fn release(&self, handle: &SpawnHandle) {
        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if active.remove(&handle.key).is_some() {
            debug!(task = %handle.task_id, remaining = active.len(), "released execution context");
        }
    }

    async fn spawn_inner(&self, task: &RuntimeTask, status: StatusSender) -> Result<SpawnHandle> {
        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| AvocadoError::Spawner("empty runner command".to_string()))?;

        let dir = task.task_dir();
        tokio::fs::create_dir_all(dir.data_dir()).await?;

        let recipe = TaskRecipe::new(
            task.id().as_str(),
            Some(task.job_id().to_string()),
            task.runnable().clone(),
        );
        let recipe_path = dir.recipe();
        tokio::fs::write(&recipe_path, serde_json::to_string_pretty(&recipe)?).await?;

        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.stderr())?;
        let env = TaskEnvironment::new(task.runnable(), dir);

        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .args(&self.runner_args)
            .arg(&recipe_path)
            .current_dir(dir.path())
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true);
        // Own process group: terminal interrupts reach the engine only, and
        // a forced kill can take the whole tree down.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            AvocadoError::Spawner(format!("cannot start runner for {}: {e}", task.id()))
        })?;
        let pid = child.id();
        let task_id = task.id().to_string();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AvocadoError::Spawner(format!("no status pipe for {task_id}")))?;
        forward_status_pipe(task_id.clone(), stdout, status);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(task_id.clone(), child, exit_tx, kill_rx));

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut active) = self.active.lock() {
            active.insert(
                key,
                ActiveContext {
                    task_id: task_id.clone(),
                    pid,
                    exit_rx,
                    kill_tx: Some(kill_tx),
                },
            );
        }

        info!(task = %task_id, pid = ?pid, "runner started");
        Ok(SpawnHandle { task_id, key, pid })
    }

    async fn terminate_inner(&self, handle: &SpawnHandle, grace: Duration) -> Result<()> {
        if !self.is_alive(handle) {
            self.release(handle);
            return Ok(());
        }
        info!(task = %handle.task_id, pid = ?handle.pid, "terminating runner");
        send_terminate(handle.pid);

        if self.wait(handle, Some(grace)).await.is_some() {
            return Ok(());
        }

        warn!(
            task = %handle.task_id,
            grace_ms = grace.as_millis() as u64,
            "runner ignored termination; killing"
        );
        force_kill_group(handle.pid);
        if let Some(kill) = self.take_kill_sender(handle) {
            let _ = kill.send(());
        }
        if self.wait(handle, Some(REAP_TIMEOUT)).await.is_none() {
            return Err(AvocadoError::Spawner(format!(
                "runner of {} did not exit after kill",
                handle.task_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active: Vec<(String, Option<u32>)> = self
            .active
            .lock()
            .map(|a| a.values().map(|c| (c.task_id.clone(), c.pid)).collect())
            .unwrap_or_default();
        f.debug_struct("ProcessSpawner")
            .field("command", &self.command)
            .field("runner_args", &self.runner_args)
            .field("active", &active)
            .finish()
    }
}

impl Spawner for ProcessSpawner {
    fn name(&self) -> &str {
        "process"
    }

    fn check_requirements<'a>(&'a self, task: &'a RuntimeTask) -> SpawnFuture<'a, bool> {
        Box::pin(async move {
            let kind = task.runnable().kind();
            if !SUPPORTED_KINDS.contains(&kind) {
                debug!(task = %task.id(), kind, "no runner for kind");
                return false;
            }
            match self.command.first() {
                Some(program) if program.contains(std::path::MAIN_SEPARATOR) => {
                    Path::new(program).is_file()
                }
                Some(_) => true,
                None => false,
            }
        })
    }

    fn spawn<'a>(
        &'a self,
        task: &'a RuntimeTask,
        status: StatusSender,
    ) -> SpawnFuture<'a, Result<SpawnHandle>> {
        Box::pin(self.spawn_inner(task, status))
    }

    fn is_alive(&self, handle: &SpawnHandle) -> bool {
        self.exit_receiver(handle)
            .map(|rx| rx.borrow().is_none())
            .unwrap_or(false)
    }

    fn terminate<'a>(&'a self, handle: &'a SpawnHandle, grace: Duration) -> SpawnFuture<'a, Result<()>> {
        Box::pin(self.terminate_inner(handle, grace))
    }

    fn wait<'a>(
        &'a self,
        handle: &'a SpawnHandle,
        timeout: Option<Duration>,
    ) -> SpawnFuture<'a, Option<ExitInfo>> {
        Box::pin(async move {
            let mut rx = self.exit_receiver(handle)?;
            let exited = async move {
                loop {
                    if let Some(info) = *rx.borrow_and_update() {
                        return Some(info);
                    }
                    if rx.changed().await.is_err() {
                        return *rx.borrow();
                    }
                }
            };
            let info = match timeout {
                Some(limit) => tokio::time::timeout(limit, exited).await.ok().flatten(),
                None => exited.await,
            };
            if info.is_some() {
                self.release(handle);
            }
            info
        })
    }
}

/// Own the child until it exits and publish how it ended.
async fn supervise(
    task_id: String,
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let status = tokio::select! {
        res = child.wait() => res,
        kill = &mut kill_rx => {
            if kill.is_ok() {
                if let Err(e) = child.start_kill() {
                    warn!(task = %task_id, error = %e, "failed to kill runner");
                }
            }
            child.wait().await
        }
    };

    let info = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            warn!(task = %task_id, error = %e, "failed waiting for runner");
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    };
    debug!(task = %task_id, exit = %info.describe(), "runner exited");
    let _ = exit_tx.send(Some(info));
}

fn default_runner_command() -> Result<Vec<String>> {
    let exe = std::env::current_exe()?;
    Ok(vec![
        exe.to_string_lossy().into_owned(),
        "task-run-recipe".to_string(),
    ])
}

#[cfg(unix)]
fn send_terminate(pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM not delivered");
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: Option<u32>) {}

#[cfg(unix)]
fn force_kill_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "SIGKILL to process group not delivered");
        }
    }
}

#[cfg(not(unix))]
fn force_kill_group(_pid: Option<u32>) {}
