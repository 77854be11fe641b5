// src/jobdata/mod.rs

//! Job data recorded next to the results so a job can be inspected,
//! replayed and diffed later.
//!
//! ```text
//! <job_dir>/jobdata/
//!   references                      JSON list of the user references
//!   variants-<i>-<suite>.json       variants of suite <i>
//!   config                          effective configuration, INI
//!   args.json                       dotted-key configuration dictionary
//!   pwd                             working directory at job start
//!   cmdline                         JSON list, original argv
//! ```
//!
//! Every `retrieve_*` returns `Ok(None)` when the item was never recorded.

pub mod diff;
pub mod replay;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::config::{ConfigDict, EngineConfig};
use crate::errors::{AvocadoError, Result};
use crate::paths::JobLayout;
use crate::paths::safe_filename;
use crate::result::persist::{atomic_write_bytes, atomic_write_json};
use crate::variants::VariantSet;

pub const REFERENCES_FILENAME: &str = "references";
pub const CONFIG_FILENAME: &str = "config";
pub const ARGS_FILENAME: &str = "args.json";
pub const PWD_FILENAME: &str = "pwd";
pub const CMDLINE_FILENAME: &str = "cmdline";
const VARIANTS_PREFIX: &str = "variants-";

/// Everything [`record`] writes for one job.
#[derive(Debug, Clone)]
pub struct JobData<'a> {
    pub references: &'a [String],
    /// `(suite name, variants)` per suite, in suite order.
    pub suites: Vec<(&'a str, &'a VariantSet)>,
    pub config: &'a EngineConfig,
    pub pwd: &'a Path,
    pub cmdline: &'a [String],
}

/// Write the job data of a job into `<job_dir>/jobdata/`.
pub fn record(layout: &JobLayout, data: &JobData<'_>) -> Result<()> {
    let dir = layout.jobdata_dir();
    fs::create_dir_all(&dir)?;

    atomic_write_json(&dir.join(REFERENCES_FILENAME), &data.references)?;
    for (index, (name, variants)) in data.suites.iter().enumerate() {
        atomic_write_json(&dir.join(variants_filename(index + 1, name)), variants)?;
    }
    atomic_write_bytes(&dir.join(CONFIG_FILENAME), data.config.to_ini()?.as_bytes())?;
    atomic_write_json(&dir.join(ARGS_FILENAME), &data.config.to_dict()?)?;
    atomic_write_bytes(
        &dir.join(PWD_FILENAME),
        data.pwd.to_string_lossy().as_bytes(),
    )?;
    atomic_write_json(&dir.join(CMDLINE_FILENAME), &data.cmdline)?;

    debug!(dir = %dir.display(), suites = data.suites.len(), "job data recorded");
    Ok(())
}

fn variants_filename(index: usize, suite: &str) -> String {
    format!("{VARIANTS_PREFIX}{index}-{}.json", safe_filename(suite))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_optional(path)? {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
            AvocadoError::Replay(format!("invalid job data {}: {e}", path.display()))
        }),
        None => Ok(None),
    }
}

fn jobdata_file(results_dir: &Path, name: &str) -> PathBuf {
    JobLayout::new(results_dir).jobdata_dir().join(name)
}

pub fn retrieve_references(results_dir: &Path) -> Result<Option<Vec<String>>> {
    read_json(&jobdata_file(results_dir, REFERENCES_FILENAME))
}

/// Recorded INI configuration text.
pub fn retrieve_config(results_dir: &Path) -> Result<Option<String>> {
    read_optional(&jobdata_file(results_dir, CONFIG_FILENAME))
}

pub fn retrieve_args(results_dir: &Path) -> Result<Option<ConfigDict>> {
    read_json(&jobdata_file(results_dir, ARGS_FILENAME))
}

pub fn retrieve_pwd(results_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(read_optional(&jobdata_file(results_dir, PWD_FILENAME))?.map(PathBuf::from))
}

/// Recorded suite variants as `(suite index, suite name, variants)`,
/// ordered by suite index. `None` when no variants file exists.
pub fn retrieve_variants(results_dir: &Path) -> Result<Option<Vec<(usize, String, VariantSet)>>> {
    let dir = JobLayout::new(results_dir).jobdata_dir();
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((index, suite)) = parse_variants_filename(name) else {
            continue;
        };
        let text = fs::read_to_string(entry.path())?;
        let variants: VariantSet = serde_json::from_str(&text).map_err(|e| {
            AvocadoError::Replay(format!("invalid variants file {name}: {e}"))
        })?;
        found.push((index, suite, variants));
    }

    if found.is_empty() {
        return Ok(None);
    }
    found.sort_by_key(|(index, _, _)| *index);
    Ok(Some(found))
}

fn parse_variants_filename(name: &str) -> Option<(usize, String)> {
    let stem = name.strip_prefix(VARIANTS_PREFIX)?.strip_suffix(".json")?;
    let (index, suite) = stem.split_once('-')?;
    Some((index.parse().ok()?, suite.to_string()))
}

/// Original command line of the job.
///
/// Jobs without `jobdata/cmdline` fall back to the `Command line:` line of
/// their `job.log`.
pub fn retrieve_cmdline(results_dir: &Path) -> Result<Option<Vec<String>>> {
    if let Some(cmdline) = read_json(&jobdata_file(results_dir, CMDLINE_FILENAME))? {
        return Ok(Some(cmdline));
    }

    let Some(log) = read_optional(&JobLayout::new(results_dir).job_log())? else {
        return Ok(None);
    };
    let re = Regex::new(r"(?m)Command line: (.*)$")
        .map_err(|e| AvocadoError::Other(anyhow::anyhow!(e)))?;
    Ok(re.captures(&log).map(|caps| {
        caps[1]
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }))
}
