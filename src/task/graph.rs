// src/task/graph.rs

use std::time::Duration;

use crate::job::TestSuite;
use crate::paths::JobLayout;
use crate::runner::DRY_RUN_KIND;
use crate::task::id::index_width;
use crate::task::{RuntimeTask, TaskId};
use crate::variants::{Variant, expand};

/// Turn one suite into its runtime tasks, in emission order.
///
/// Each (test, variant) pair gets its own task with the variant injected
/// into its runnable and the task directory as output directory.
/// `first_position` is the job-wide creation index of the first task.
pub fn create_runtime_tasks(
    suite_index: usize,
    suite: &TestSuite,
    layout: &JobLayout,
    job_id: &str,
    first_position: usize,
) -> Vec<RuntimeTask> {
    let pairs = expand(&suite.runnables, &suite.variants, suite.execution_order);
    let width = index_width(pairs.len());

    pairs
        .iter()
        .enumerate()
        .map(|(i, pair)| {
            let id = TaskId::new(
                suite_index,
                i + 1,
                width,
                pair.runnable.name(),
                pair.variant.variant_id.as_deref(),
            );
            let task_dir = layout.task_dir(id.as_str());

            let mut runnable = pair.runnable.clone();
            if !pair.variant.is_default() {
                runnable = runnable.with_variant(pair.variant.clone());
            }
            if suite.dry_run {
                runnable = runnable.with_kind(DRY_RUN_KIND);
            }
            let runnable = runnable.with_output_dir(task_dir.path());

            let mut task = RuntimeTask::new(id, runnable, first_position + i, task_dir, job_id);
            task.set_timeout(variant_timeout(pair.variant).or(suite.timeout));
            task
        })
        .collect()
}

/// A `timeout` binding in the variant overrides the suite timeout.
///
/// Values that are not a representable number of seconds are ignored.
fn variant_timeout(variant: &Variant) -> Option<Duration> {
    variant
        .env()
        .get("timeout")
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::Runnable;
    use crate::types::ExecutionOrder;
    use crate::variants::VariantSet;
    use serde_json::json;

    fn suite(variants: VariantSet) -> TestSuite {
        TestSuite {
            name: "suite".into(),
            runnables: vec![Runnable::new("exec-test", "/t/pass"), Runnable::new("exec-test", "/t/fail")],
            variants,
            execution_order: ExecutionOrder::VariantsPerTest,
            timeout: Some(Duration::from_secs(7)),
            dry_run: false,
            resolutions: Vec::new(),
        }
    }

    #[test]
    fn ids_positions_and_output_dirs() {
        let layout = JobLayout::new("/r");
        let tasks = create_runtime_tasks(1, &suite(VariantSet::default()), &layout, "job", 3);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id().as_str()).collect();
        assert_eq!(ids, ["1-1-/t/pass", "1-2-/t/fail"]);
        assert_eq!(tasks[1].position(), 4);
        assert_eq!(
            tasks[0].runnable().output_dir(),
            Some(layout.task_dir("1-1-/t/pass").path())
        );
        assert!(tasks[0].runnable().variant().is_none());
        assert_eq!(tasks[0].timeout(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn variants_are_injected_and_can_set_timeouts() {
        let variants = VariantSet::new(vec![
            Variant::new("short").with_binding("/", "timeout", json!(1)),
            Variant::new("long"),
        ]);
        let tasks = create_runtime_tasks(2, &suite(variants), &JobLayout::new("/r"), "job", 0);
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].id().as_str(), "2-1-/t/pass;short");
        assert_eq!(
            tasks[0].runnable().variant().and_then(|v| v.variant_id.as_deref()),
            Some("short")
        );
        assert_eq!(tasks[0].timeout(), Some(Duration::from_secs(1)));
        assert_eq!(tasks[1].timeout(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn unrepresentable_variant_timeouts_fall_back_to_suite() {
        let variants = VariantSet::new(vec![
            Variant::new("huge").with_binding("/", "timeout", json!("1e20")),
            Variant::new("negative").with_binding("/", "timeout", json!(-2)),
            Variant::new("nan").with_binding("/", "timeout", json!("NaN")),
        ]);
        let mut s = suite(variants);
        s.runnables.truncate(1);
        let tasks = create_runtime_tasks(1, &s, &JobLayout::new("/r"), "job", 0);
        assert_eq!(tasks.len(), 3);
        for t in &tasks {
            assert_eq!(t.timeout(), Some(Duration::from_secs(7)), "{}", t.id().as_str());
        }
    }

    #[test]
    fn dry_run_swaps_the_kind() {
        let mut s = suite(VariantSet::default());
        s.dry_run = true;
        let tasks = create_runtime_tasks(1, &s, &JobLayout::new("/r"), "job", 0);
        assert_eq!(tasks[0].runnable().kind(), DRY_RUN_KIND);
        assert_eq!(tasks[0].runnable().uri(), Some("/t/pass"));
    }
}
