// tests/replay_diff.rs

mod common;
use crate::common::{EngineConfigBuilder, ScriptedSpawner, init_tracing, status_list, with_timeout};

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use avocado::config::ConfigDict;
use avocado::exit_codes;
use avocado::job::{Job, JobOutcome};
use avocado::jobdata::diff::{DiffFilter, diff_jobs};
use avocado::jobdata::replay::{ReplayRequest, plan_replay};
use avocado::types::Outcome;

type TestResult = Result<(), Box<dyn Error>>;

const RECIPES: &str = r#"[
    {"kind": "fake-pass", "uri": "a"},
    {"kind": "fake-fail", "uri": "b"},
    {"kind": "fake-pass", "uri": "c"}
]"#;

async fn first_job(logs: &Path, recipe: &Path) -> Result<JobOutcome, Box<dyn Error>> {
    let config = EngineConfigBuilder::new(logs)
        .with_references(&[recipe.to_str().unwrap()])
        .build();
    let outcome = with_timeout(
        Job::new(config)
            .with_spawner(Arc::new(ScriptedSpawner::new()))
            .with_cmdline(vec!["avocado".into(), "run".into(), "recipes.json".into()])
            .handle_signals(false)
            .run(),
    )
    .await?;
    Ok(outcome)
}

#[tokio::test]
async fn replay_reruns_only_the_requested_statuses() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let recipe = tmp.path().join("recipes.json");
    std::fs::write(&recipe, RECIPES)?;
    let logs = tmp.path().join("results");

    let first = first_job(&logs, &recipe).await?;
    assert_eq!(status_list(&first), vec!["PASS", "FAIL", "PASS"]);
    assert_eq!(first.exit_code, exit_codes::TESTS_FAIL);

    let base = EngineConfigBuilder::new(&logs).build();
    let request = ReplayRequest {
        test_status: vec![Outcome::Fail],
        ..ReplayRequest::new(first.job_id.clone())
    };
    let plan = plan_replay(&request, &base, &ConfigDict::new())?;
    assert_eq!(plan.source_job_id, first.job_id);
    assert_eq!(plan.config.run.references, vec![recipe.to_string_lossy().into_owned()]);
    assert!(plan.skips(0) && !plan.skips(1) && plan.skips(2));

    let spawner = Arc::new(ScriptedSpawner::new());
    let second = with_timeout(
        Job::replay(plan)
            .with_spawner(spawner.clone())
            .handle_signals(false)
            .run(),
    )
    .await?;

    assert_eq!(status_list(&second), vec!["SKIP", "FAIL", "SKIP"]);
    for skipped in [0, 2] {
        assert_eq!(
            second.results.tests[skipped].fail_reason.as_deref(),
            Some("replay skip")
        );
    }
    assert_eq!(spawner.spawned(), vec![second.results.tests[1].id.clone()]);
    assert_eq!(second.exit_code, exit_codes::TESTS_FAIL);
    Ok(())
}

#[tokio::test]
async fn diff_shows_changed_results() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let recipe = tmp.path().join("recipes.json");
    std::fs::write(&recipe, RECIPES)?;
    let logs = tmp.path().join("results");

    let first = first_job(&logs, &recipe).await?;
    let base = EngineConfigBuilder::new(&logs).build();
    let request = ReplayRequest {
        test_status: vec![Outcome::Fail],
        ..ReplayRequest::new(first.results_dir.to_string_lossy().into_owned())
    };
    let second = with_timeout(
        Job::replay(plan_replay(&request, &base, &ConfigDict::new())?)
            .with_spawner(Arc::new(ScriptedSpawner::new()))
            .handle_signals(false)
            .run(),
    )
    .await?;

    let a = &first.results.tests[0].id;
    let b = &first.results.tests[1].id;
    let diff = diff_jobs(
        (first.results_dir.as_path(), first.job_id.as_str()),
        (second.results_dir.as_path(), second.job_id.as_str()),
        &DiffFilter::parse("results")?,
    )?;
    assert!(diff.starts_with(&format!("--- {}\n+++ {}\n", first.job_id, second.job_id)));
    assert!(diff.contains(&format!("-{a}: PASS\n")), "diff:\n{diff}");
    assert!(diff.contains(&format!("+{a}: SKIP\n")), "diff:\n{diff}");
    assert!(diff.contains(&format!(" {b}: FAIL\n")), "diff:\n{diff}");

    let same = diff_jobs(
        (first.results_dir.as_path(), first.job_id.as_str()),
        (first.results_dir.as_path(), first.job_id.as_str()),
        &DiffFilter::default(),
    )?;
    assert!(same.is_empty());
    Ok(())
}

#[tokio::test]
async fn replay_of_unknown_job_is_an_error() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let base = EngineConfigBuilder::new(tmp.path()).build();
    let err = plan_replay(&ReplayRequest::new("0123abc"), &base, &ConfigDict::new());
    assert!(err.is_err());
    Ok(())
}
