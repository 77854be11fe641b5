#![allow(dead_code)]

use std::sync::Arc;

use avocado::config::EngineConfig;
use avocado::job::{Job, JobOutcome, TestSuite};
use avocado::runnable::Runnable;

pub use avocado_test_utils::{EngineConfigBuilder, ScriptedSpawner, fake, init_tracing, with_timeout};

/// Run `runnables` as a single suite on `spawner`, without signal handling.
pub async fn run_suite(
    config: EngineConfig,
    runnables: Vec<Runnable>,
    spawner: Arc<ScriptedSpawner>,
) -> JobOutcome {
    let suite = TestSuite::new("main", runnables, &config);
    Job::new(config)
        .with_suites(vec![suite])
        .with_spawner(spawner)
        .handle_signals(false)
        .run()
        .await
        .expect("job should run")
}

/// `(id, status)` of every test, in creation order.
pub fn statuses(outcome: &JobOutcome) -> Vec<(String, String)> {
    outcome
        .results
        .tests
        .iter()
        .map(|t| (t.id.clone(), t.status.clone()))
        .collect()
}

/// Status of every test, in creation order.
pub fn status_list(outcome: &JobOutcome) -> Vec<String> {
    outcome.results.tests.iter().map(|t| t.status.clone()).collect()
}
