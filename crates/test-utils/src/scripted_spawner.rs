use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use avocado::errors::Result;
use avocado::paths::TaskDir;
use avocado::runner::{DRY_RUN_KIND, NOOP_KIND};
use avocado::spawner::{ExitInfo, SpawnFuture, SpawnHandle, Spawner};
use avocado::status::{StatusMessage, StatusSender};
use avocado::task::{RuntimeTask, TaskResult};
use avocado::types::Outcome;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::builders::fake;

const SIGTERM: i32 = 15;

struct Context {
    task_id: String,
    exit: Arc<watch::Sender<Option<ExitInfo>>>,
    abort: AbortHandle,
    status: StatusSender,
}

/// In-process spawner playing a fixed script per runnable kind.
///
/// Kinds are the ones in [`crate::fake`], plus `noop` and `dry-run`. It
/// follows the status protocol of the real runners (`started`, `finished`,
/// pipe close, exit) and records the highest number of contexts alive at
/// once.
#[derive(Default)]
pub struct ScriptedSpawner {
    next_key: AtomicU64,
    contexts: Mutex<HashMap<u64, Context>>,
    alive: Arc<AtomicUsize>,
    max_alive: Arc<AtomicUsize>,
    spawned: Mutex<Vec<String>>,
    unsupported: Vec<String>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `check_requirements` for `kind`.
    pub fn without_kind(mut self, kind: &str) -> Self {
        self.unsupported.push(kind.to_string());
        self
    }

    /// Task ids in spawn order.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    /// Highest number of simultaneously alive contexts.
    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    fn context<T>(&self, key: u64, f: impl FnOnce(&Context) -> T) -> Option<T> {
        self.contexts.lock().unwrap().get(&key).map(f)
    }
}

impl Spawner for ScriptedSpawner {
    fn name(&self) -> &str {
        "scripted"
    }

    fn check_requirements<'a>(&'a self, task: &'a RuntimeTask) -> SpawnFuture<'a, bool> {
        let kind = task.runnable().kind().to_string();
        Box::pin(async move { !self.unsupported.contains(&kind) })
    }

    fn spawn<'a>(
        &'a self,
        task: &'a RuntimeTask,
        status: StatusSender,
    ) -> SpawnFuture<'a, Result<SpawnHandle>> {
        Box::pin(async move {
            task.task_dir().create()?;
            let key = self.next_key.fetch_add(1, Ordering::SeqCst);
            let task_id = task.id().as_str().to_string();
            let (exit_tx, _) = watch::channel(None);
            let exit = Arc::new(exit_tx);

            let now_alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_alive.fetch_max(now_alive, Ordering::SeqCst);
            self.spawned.lock().unwrap().push(task_id.clone());

            let script = tokio::spawn(play(
                task.runnable().kind().to_string(),
                task.runnable().uri().unwrap_or_default().to_string(),
                task_id.clone(),
                task.task_dir().clone(),
                status.clone(),
                Arc::clone(&exit),
                Arc::clone(&self.alive),
            ));

            self.contexts.lock().unwrap().insert(
                key,
                Context {
                    task_id: task_id.clone(),
                    exit,
                    abort: script.abort_handle(),
                    status,
                },
            );
            Ok(SpawnHandle {
                task_id,
                key,
                pid: None,
            })
        })
    }

    fn is_alive(&self, handle: &SpawnHandle) -> bool {
        self.context(handle.key, |c| c.exit.borrow().is_none())
            .unwrap_or(false)
    }

    fn terminate<'a>(&'a self, handle: &'a SpawnHandle, _grace: Duration) -> SpawnFuture<'a, Result<()>> {
        Box::pin(async move {
            let found = self.context(handle.key, |c| {
                (
                    c.abort.clone(),
                    Arc::clone(&c.exit),
                    c.status.clone(),
                    c.task_id.clone(),
                )
            });
            if let Some((abort, exit, status, task_id)) = found {
                abort.abort();
                publish_exit(
                    &exit,
                    ExitInfo {
                        code: None,
                        signal: Some(SIGTERM),
                    },
                    &self.alive,
                );
                status.close(&task_id);
            }
            Ok(())
        })
    }

    fn wait<'a>(
        &'a self,
        handle: &'a SpawnHandle,
        timeout: Option<Duration>,
    ) -> SpawnFuture<'a, Option<ExitInfo>> {
        Box::pin(async move {
            let mut rx = self.context(handle.key, |c| c.exit.subscribe())?;
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
            match timeout {
                Some(limit) => tokio::time::timeout(limit, exited).await.ok().flatten(),
                None => exited.await,
            }
        })
    }
}

/// Record the exit once; only the first caller counts the context down.
fn publish_exit(exit: &watch::Sender<Option<ExitInfo>>, info: ExitInfo, alive: &AtomicUsize) {
    let first = exit.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(info);
        true
    });
    if first {
        alive.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn play(
    kind: String,
    uri: String,
    task_id: String,
    dir: TaskDir,
    status: StatusSender,
    exit: Arc<watch::Sender<Option<ExitInfo>>>,
    alive: Arc<AtomicUsize>,
) {
    let send = |message: StatusMessage| {
        status.send_message(&task_id, &message.with_identity(&task_id, None));
    };

    if kind == fake::SILENT {
        std::future::pending::<()>().await;
    }

    send(StatusMessage::started(None));
    let code = match kind.as_str() {
        fake::PASS | NOOP_KIND => {
            send(StatusMessage::finished(&TaskResult::new(Outcome::Pass)));
            0
        }
        fake::FAIL => {
            send(StatusMessage::finished(
                &TaskResult::new(Outcome::Fail).with_reason("scripted failure"),
            ));
            1
        }
        fake::SLEEP => {
            let ms = uri.parse::<u64>().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            send(StatusMessage::finished(&TaskResult::new(Outcome::Pass)));
            0
        }
        fake::CRASH => {
            let _ = std::fs::write(dir.stderr(), "scripted crash\n");
            3
        }
        DRY_RUN_KIND => {
            send(StatusMessage::finished(
                &TaskResult::new(Outcome::Cancel).with_reason("dry run"),
            ));
            0
        }
        _ => {
            send(StatusMessage::finished(
                &TaskResult::new(Outcome::Error).with_reason("unsupported kind"),
            ));
            1
        }
    };
    status.close(&task_id);
    publish_exit(
        &exit,
        ExitInfo {
            code: Some(code),
            signal: None,
        },
        &alive,
    );
}
