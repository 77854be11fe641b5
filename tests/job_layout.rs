// tests/job_layout.rs

mod common;
use crate::common::{EngineConfigBuilder, ScriptedSpawner, fake, init_tracing, with_timeout};

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use avocado::errors::Result as AvocadoResult;
use avocado::exit_codes;
use avocado::job::{Job, NO_TESTS_MESSAGE, SysinfoCollector, SysinfoPhase, TestSuite};
use avocado::jobdata;
use avocado::paths::JobLayout;
use avocado::result::JobResults;

type TestResult = Result<(), Box<dyn Error>>;

struct Hostname;

impl SysinfoCollector for Hostname {
    fn name(&self) -> &str {
        "hostname"
    }

    fn collect(&self, phase: SysinfoPhase, dir: &Path) -> AvocadoResult<()> {
        std::fs::write(dir.join("hostname"), format!("test-host {phase}\n"))?;
        Ok(())
    }
}

#[tokio::test]
async fn job_writes_the_canonical_layout() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(tmp.path())
        .with_sysinfo(true)
        .build();
    let suite = TestSuite::new("main", vec![fake::pass("a"), fake::fail("b")], &config);

    let outcome = with_timeout(
        Job::new(config)
            .with_suites(vec![suite])
            .with_spawner(Arc::new(ScriptedSpawner::new()))
            .with_collector(Arc::new(Hostname))
            .with_cmdline(vec!["avocado".into(), "run".into(), "a".into()])
            .handle_signals(false)
            .run(),
    )
    .await?;

    let layout = JobLayout::new(&outcome.results_dir);
    let dir_name = outcome.results_dir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(dir_name.starts_with("job-"));
    assert!(dir_name.ends_with(&outcome.job_id[..7]));
    assert_eq!(
        std::fs::read_to_string(layout.id_file())?,
        format!("{}\n", outcome.job_id)
    );

    let log = std::fs::read_to_string(layout.job_log())?;
    assert!(log.starts_with("Command line: avocado run a\n"), "job.log: {log}");

    let results = JobResults::load(&layout.results_json())?;
    assert_eq!(results.job_id, outcome.job_id);
    assert_eq!((results.total, results.pass, results.fail), (2, 1, 1));
    assert_eq!(results.status, "FAIL");

    for test in &results.tests {
        let task_dir = layout.task_dir(&test.id);
        assert!(task_dir.result_json().is_file(), "missing result.json for {}", test.id);
        for phase in ["pre", "post"] {
            assert!(task_dir.sysinfo_dir(phase).is_dir());
        }
    }
    assert_eq!(
        std::fs::read_to_string(layout.sysinfo_dir("post").join("hostname"))?,
        "test-host post\n"
    );

    assert_eq!(
        jobdata::retrieve_cmdline(&outcome.results_dir)?,
        Some(vec!["avocado".to_string(), "run".to_string(), "a".to_string()])
    );
    let variants = jobdata::retrieve_variants(&outcome.results_dir)?.unwrap();
    assert_eq!(variants.len(), 1);
    assert_eq!(variants[0].1, "main");
    assert!(jobdata::retrieve_args(&outcome.results_dir)?.is_some());
    assert!(jobdata::retrieve_config(&outcome.results_dir)?.unwrap().contains("[run]"));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn latest_points_at_the_later_job() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let mut dirs = Vec::new();
    for _ in 0..2 {
        let config = EngineConfigBuilder::new(tmp.path()).build();
        let suite = TestSuite::new("main", vec![fake::pass("a")], &config);
        let outcome = with_timeout(
            Job::new(config)
                .with_suites(vec![suite])
                .with_spawner(Arc::new(ScriptedSpawner::new()))
                .handle_signals(false)
                .run(),
        )
        .await?;
        dirs.push(outcome.results_dir);
    }

    assert_ne!(dirs[0], dirs[1]);
    let target = std::fs::read_link(tmp.path().join("latest"))?;
    assert_eq!(Some(target.as_os_str()), dirs[1].file_name());
    Ok(())
}

#[tokio::test]
async fn nothing_to_run_is_a_job_failure() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let config = EngineConfigBuilder::new(tmp.path()).build();

    let outcome = with_timeout(
        Job::new(config)
            .with_spawner(Arc::new(ScriptedSpawner::new()))
            .handle_signals(false)
            .run(),
    )
    .await?;

    assert_eq!(outcome.exit_code, exit_codes::JOB_FAIL);
    assert_eq!(outcome.error.as_deref(), Some(NO_TESTS_MESSAGE));
    assert!(outcome.results_dir.is_dir());
    let results = JobResults::load(&JobLayout::new(&outcome.results_dir).results_json())?;
    assert_eq!(results.status, "ERROR");
    assert_eq!(results.total, 0);
    Ok(())
}

#[tokio::test]
async fn unresolved_reference_fails_the_job() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let missing = tmp.path().join("missing-test.sh");
    let config = EngineConfigBuilder::new(tmp.path())
        .with_references(&[missing.to_str().unwrap()])
        .build();

    let outcome = with_timeout(
        Job::new(config)
            .with_spawner(Arc::new(ScriptedSpawner::new()))
            .handle_signals(false)
            .run(),
    )
    .await?;

    assert_eq!(outcome.exit_code, exit_codes::JOB_FAIL);
    let error = outcome.error.unwrap_or_default();
    assert!(error.contains("missing-test.sh"), "error: {error}");
    Ok(())
}
