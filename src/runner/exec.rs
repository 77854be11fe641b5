// src/runner/exec.rs

//! `exec` and `exec-test` runners: run an executable, stream its output.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::resolver::builtin::is_executable_file;
use crate::runner::{HEARTBEAT_INTERVAL, RunnerOptions, StatusEmitter};
use crate::runnable::Runnable;
use crate::spawner::ExitInfo;
use crate::status::{ProgressKind, StatusMessage};
use crate::task::TaskResult;
use crate::types::Outcome;

const READ_CHUNK: usize = 8192;
/// How long trailing output is collected after the process exits.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);
/// Grace given to the test process once the runner is told to stop.
const CHILD_STOP_GRACE: Duration = Duration::from_secs(2);

type Chunk = (ProgressKind, Vec<u8>);

pub async fn run_process<W, F>(
    runnable: &Runnable,
    exec_test: bool,
    options: &RunnerOptions,
    env: &BTreeMap<String, String>,
    emitter: &mut StatusEmitter<W>,
    shutdown: F,
) -> Result<TaskResult>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let Some(uri) = runnable.uri() else {
        return Ok(TaskResult::new(Outcome::Error).with_reason("missing uri"));
    };
    if exec_test && !is_executable_file(Path::new(uri)) {
        return Ok(TaskResult::new(Outcome::Error)
            .with_reason(format!("{uri} is not an executable file")));
    }

    let mut cmd = Command::new(uri);
    cmd.args(runnable.args())
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(workdir) = env.get("AVOCADO_TEST_WORKDIR") {
        tokio::fs::create_dir_all(workdir).await?;
        cmd.current_dir(workdir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(uri, error = %e, "cannot start test process");
            return Ok(TaskResult::new(Outcome::Error)
                .with_reason(format!("cannot start {uri}: {e}"))
                .with_class("SpawnError"));
        }
    };
    info!(uri, pid = ?child.id(), "test process started");

    let (tx, mut rx) = mpsc::unbounded_channel::<Chunk>();
    if let Some(out) = child.stdout.take() {
        pump(ProgressKind::Stdout, out, tx.clone());
    }
    if let Some(err) = child.stderr.take() {
        pump(ProgressKind::Stderr, err, tx.clone());
    }
    drop(tx);

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let status = loop {
        tokio::select! {
            res = child.wait() => break res?,
            Some((kind, bytes)) = rx.recv() => {
                emitter.emit(StatusMessage::progress(kind, &bytes)).await?;
            }
            _ = heartbeat.tick() => {
                if emitter.silent_for() >= HEARTBEAT_INTERVAL {
                    emitter.emit(StatusMessage::heartbeat()).await?;
                }
            }
            _ = &mut shutdown => {
                info!(uri, "termination requested; stopping test process");
                stop_child(&mut child).await;
                drain_output(&mut rx, emitter).await?;
                return Ok(TaskResult::new(Outcome::Interrupted).with_reason("interrupted"));
            }
        }
    };

    drain_output(&mut rx, emitter).await?;
    let exit = ExitInfo::from_status(status);
    debug!(uri, exit = %exit.describe(), "test process exited");
    Ok(classify(exit, exec_test, options))
}

fn classify(exit: ExitInfo, exec_test: bool, options: &RunnerOptions) -> TaskResult {
    if !exec_test {
        return TaskResult::new(Outcome::Pass).with_returncode(exit.code);
    }
    let result = match exit.code {
        Some(0) => TaskResult::new(Outcome::Pass),
        Some(code) if options.skip_codes.contains(&code) => {
            TaskResult::new(Outcome::Skip).with_reason(format!("skipped with exit code {code}"))
        }
        _ => TaskResult::new(Outcome::Fail).with_reason(exit.describe()),
    };
    result.with_returncode(exit.code)
}

fn pump<R>(kind: ProgressKind, mut reader: R, tx: mpsc::UnboundedSender<Chunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((kind, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "test output read failed");
                    break;
                }
            }
        }
    });
}

async fn drain_output<W: AsyncWrite + Unpin>(
    rx: &mut mpsc::UnboundedReceiver<Chunk>,
    emitter: &mut StatusEmitter<W>,
) -> Result<()> {
    while let Ok(Some((kind, bytes))) = tokio::time::timeout(OUTPUT_DRAIN, rx.recv()).await {
        emitter.emit(StatusMessage::progress(kind, &bytes)).await?;
    }
    Ok(())
}

async fn stop_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(CHILD_STOP_GRACE, child.wait()).await.is_ok()
        {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill test process");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::runner::RunIdentity;
    use crate::status::MessageKind;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn exec(
        runnable: &Runnable,
        exec_test: bool,
        options: &RunnerOptions,
        shutdown: impl Future<Output = ()>,
    ) -> (TaskResult, Vec<StatusMessage>) {
        let mut emitter = StatusEmitter::new(Vec::new(), RunIdentity::default());
        let result = run_process(
            runnable,
            exec_test,
            options,
            &BTreeMap::new(),
            &mut emitter,
            shutdown,
        )
        .await
        .unwrap();
        let out = emitter.into_inner();
        let messages = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| StatusMessage::parse_line(l).unwrap())
            .collect();
        (result, messages)
    }

    fn stdout_of(messages: &[StatusMessage]) -> String {
        let mut bytes = Vec::new();
        for m in messages {
            if let Ok(Some((ProgressKind::Stdout, b))) = m.progress_bytes() {
                bytes.extend(b);
            }
        }
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn exec_test_exit_codes_map_to_outcomes() {
        let tmp = tempfile::tempdir().unwrap();
        let pass = script(tmp.path(), "pass.sh", "echo hello");
        let fail = script(tmp.path(), "fail.sh", "exit 1");
        let skip = script(tmp.path(), "skip.sh", "exit 77");
        let options = RunnerOptions {
            skip_codes: vec![77],
            keep_tmp: false,
        };

        let (result, messages) =
            exec(&Runnable::new("exec-test", &pass), true, &options, std::future::pending()).await;
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(stdout_of(&messages), "hello\n");

        let (result, _) =
            exec(&Runnable::new("exec-test", &fail), true, &options, std::future::pending()).await;
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.returncode, Some(1));

        let (result, _) =
            exec(&Runnable::new("exec-test", &skip), true, &options, std::future::pending()).await;
        assert_eq!(result.outcome, Outcome::Skip);
    }

    #[tokio::test]
    async fn exec_passes_whatever_the_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let fail = script(tmp.path(), "fail.sh", "echo $1 >&2; exit 5");
        let runnable = Runnable::new("exec", &fail).with_args(["arg"]);
        let (result, messages) =
            exec(&runnable, false, &RunnerOptions::default(), std::future::pending()).await;
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(result.returncode, Some(5));
        assert!(messages.iter().any(|m| m.kind() == MessageKind::Stderr));
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let (result, _) = exec(
            &Runnable::new("exec-test", "/no/such/test"),
            true,
            &RunnerOptions::default(),
            std::future::pending(),
        )
        .await;
        assert_eq!(result.outcome, Outcome::Error);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_running_test() {
        let tmp = tempfile::tempdir().unwrap();
        let slow = script(tmp.path(), "slow.sh", "exec sleep 30");
        let (result, _) = exec(
            &Runnable::new("exec-test", &slow),
            true,
            &RunnerOptions::default(),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await;
        assert_eq!(result.outcome, Outcome::Interrupted);
    }
}
