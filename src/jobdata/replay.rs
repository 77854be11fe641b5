// src/jobdata/replay.rs

//! Rebuild a job from the data a previous job recorded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::{info, warn};

use crate::config::{ConfigDict, EngineConfig};
use crate::errors::{AvocadoError, Result};
use crate::jobdata::{retrieve_args, retrieve_pwd, retrieve_variants};
use crate::paths::{read_job_id, resolve_job_ref};
use crate::result::JobResults;
use crate::types::Outcome;
use crate::variants::VariantSet;

/// Parts of the source job a replay can leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum ReplayIgnore {
    Variants,
    Config,
}

/// What the user asked to replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayRequest {
    /// Job reference: results directory, `id` file, `latest` or job id.
    pub source: String,
    /// Only re-run tests whose previous status is listed; empty runs all.
    pub test_status: Vec<Outcome>,
    pub ignore: Vec<ReplayIgnore>,
}

impl ReplayRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Parse a comma separated `--replay-test-status` value.
    pub fn parse_statuses(raw: &str) -> Result<Vec<Outcome>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Outcome>().map_err(AvocadoError::Replay))
            .collect()
    }
}

/// Everything a new job takes over from the source job.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayPlan {
    pub source_dir: PathBuf,
    pub source_job_id: String,
    pub config: EngineConfig,
    /// Per-suite variants, in suite order. `None` keeps the variants the
    /// configuration produces.
    pub variants: Option<Vec<VariantSet>>,
    /// Task positions to finish as SKIP without running.
    pub skip_positions: BTreeSet<usize>,
    /// Working directory of the source job, when it still exists.
    pub pwd: Option<PathBuf>,
}

impl ReplayPlan {
    pub fn variants_for(&self, suite_index: usize) -> Option<&VariantSet> {
        self.variants.as_ref().and_then(|v| v.get(suite_index))
    }

    pub fn skips(&self, position: usize) -> bool {
        self.skip_positions.contains(&position)
    }
}

/// Build the replay plan for `request`.
///
/// `base` is the configuration the replaying command runs with, used when
/// the source configuration is ignored. `overrides` are the options given
/// explicitly on the replaying command line; they win over replayed values.
/// An override key the configuration does not know is an error.
pub fn plan_replay(
    request: &ReplayRequest,
    base: &EngineConfig,
    overrides: &ConfigDict,
) -> Result<ReplayPlan> {
    let logs_root = base.datadir.logs_dir.as_path();
    let source_dir = resolve_job_ref(&request.source, logs_root)?;
    let source_job_id = read_job_id(&source_dir)?;
    info!(job_id = %source_job_id, dir = %source_dir.display(), "replaying job");

    let args = retrieve_args(&source_dir)?.ok_or_else(|| {
        AvocadoError::Replay(format!(
            "source job {source_job_id} has no recorded configuration"
        ))
    })?;

    let mut config = if request.ignore.contains(&ReplayIgnore::Config) {
        let mut cfg = base.clone();
        cfg.run.references = references_from(&args)?;
        cfg
    } else {
        let mut cfg = EngineConfig::from_dict(&args)?;
        cfg.datadir = base.datadir.clone();
        cfg
    };
    config = config.apply_overrides(overrides)?;

    let variants = if request.ignore.contains(&ReplayIgnore::Variants) {
        None
    } else {
        retrieve_variants(&source_dir)?
            .map(|found| found.into_iter().map(|(_, _, v)| v).collect())
    };

    let skip_positions = if request.test_status.is_empty() {
        BTreeSet::new()
    } else {
        skip_positions(&source_dir, &request.test_status)?
    };

    let pwd = retrieve_pwd(&source_dir)?.filter(|p| {
        let exists = p.is_dir();
        if !exists {
            warn!(pwd = %p.display(), "source job working directory is gone");
        }
        exists
    });

    Ok(ReplayPlan {
        source_dir,
        source_job_id,
        config,
        variants,
        skip_positions,
        pwd,
    })
}

fn references_from(args: &ConfigDict) -> Result<Vec<String>> {
    match args.get("run.references") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| AvocadoError::Replay(format!("invalid recorded references: {e}"))),
        None => Ok(Vec::new()),
    }
}

/// Positions of source tests whose status is not in `wanted`.
fn skip_positions(source_dir: &Path, wanted: &[Outcome]) -> Result<BTreeSet<usize>> {
    let results = JobResults::load(&source_dir.join("results.json")).map_err(|e| {
        AvocadoError::Replay(format!(
            "cannot filter by test status without results: {e}"
        ))
    })?;
    Ok(results
        .tests
        .iter()
        .enumerate()
        .filter(|(_, test)| !test.outcome().is_some_and(|o| wanted.contains(&o)))
        .map(|(position, _)| position)
        .collect())
}
