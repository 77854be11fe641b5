// src/commands/inspect.rs

//! Read-only commands: `list`, `resolve`, `jobs`, `diff` and `config`.
//!
//! Each command renders into a `String` first so the output can be checked
//! without a terminal.

use std::fmt::Write as _;
use std::path::Path;

use crate::cli::{DiffArgs, ListArgs};
use crate::config::{CONFIG_REFERENCE, EngineConfig};
use crate::errors::{AvocadoError, Result};
use crate::exit_codes;
use crate::jobdata::diff::{DiffFilter, diff_jobs};
use crate::paths::job_id::short_id;
use crate::paths::{JobLayout, list_job_dirs, read_job_id, resolve_job_ref};
use crate::resolver::{ReferenceResolution, ResolverRegistry, expand_directories};
use crate::result::JobResults;
use crate::runnable::{Runnable, TagFilter};

/// `list` (tests only) and `resolve` (every resolution).
pub fn list(args: &ListArgs, show_resolutions: bool) -> Result<i32> {
    let registry = ResolverRegistry::with_builtins();
    let references = expand_directories(&args.references);
    let resolutions = registry.resolve(&references);

    let filter = TagFilter::parse(
        &args.filter_by_tags,
        args.filter_by_tags_include_empty,
        args.filter_by_tags_include_empty_key,
    );
    let text = if show_resolutions {
        render_resolutions(&resolutions)
    } else {
        let runnables: Vec<Runnable> = resolutions
            .iter()
            .flat_map(|r| r.resolutions.iter().cloned())
            .collect();
        let runnables = if filter.is_empty() {
            runnables
        } else {
            filter.filter(runnables)
        };
        render_runnables(&runnables)
    };
    print!("{text}");

    let unresolved: Vec<&ReferenceResolution> =
        resolutions.iter().filter(|r| !r.is_success()).collect();
    for resolution in &unresolved {
        eprintln!(
            "{}: {} {}",
            resolution.reference,
            resolution.result,
            resolution.info.as_deref().unwrap_or("")
        );
    }
    Ok(if unresolved.is_empty() {
        exit_codes::ALL_OK
    } else {
        exit_codes::FAIL
    })
}

fn render_runnables(runnables: &[Runnable]) -> String {
    let mut out = String::new();
    for runnable in runnables {
        let _ = write!(out, "{:<12} {}", runnable.kind(), runnable.name());
        let tags = render_tags(runnable);
        if !tags.is_empty() {
            let _ = write!(out, " [{tags}]");
        }
        out.push('\n');
    }
    out
}

fn render_tags(runnable: &Runnable) -> String {
    runnable
        .tags()
        .iter()
        .map(|(name, values)| match values {
            Some(values) if !values.is_empty() => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                format!("{name}:{}", joined.join(","))
            }
            _ => name.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn render_resolutions(resolutions: &[ReferenceResolution]) -> String {
    let mut out = String::new();
    for resolution in resolutions {
        let _ = write!(out, "{} {}", resolution.reference, resolution.result);
        if let Some(origin) = &resolution.origin {
            let _ = write!(out, " ({origin})");
        }
        if let Some(info) = &resolution.info {
            let _ = write!(out, ": {info}");
        }
        out.push('\n');
        for runnable in &resolution.resolutions {
            let _ = writeln!(out, "    {} {}", runnable.kind(), runnable.name());
        }
    }
    out
}

pub fn jobs_list(config: &EngineConfig) -> Result<i32> {
    print!("{}", render_jobs(&config.datadir.logs_dir)?);
    Ok(exit_codes::ALL_OK)
}

fn render_jobs(logs_root: &Path) -> Result<String> {
    let mut out = String::new();
    for dir in list_job_dirs(logs_root)? {
        let id = read_job_id(&dir)?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match JobResults::load(&JobLayout::new(&dir).results_json()) {
            Ok(results) => {
                let _ = writeln!(
                    out,
                    "{id} {name} {} {}/{}",
                    results.status, results.pass, results.total
                );
            }
            Err(_) => {
                let _ = writeln!(out, "{id} {name} UNKNOWN -/-");
            }
        }
    }
    Ok(out)
}

pub fn jobs_show(config: &EngineConfig, reference: &str) -> Result<i32> {
    let dir = match resolve_job_ref(reference, &config.datadir.logs_dir) {
        Ok(dir) => dir,
        Err(AvocadoError::JobNotFound(msg)) => {
            eprintln!("Job not found: {msg}");
            return Ok(exit_codes::GENERIC_CRASH);
        }
        Err(err) => return Err(err),
    };
    print!("{}", render_job(&dir)?);
    Ok(exit_codes::ALL_OK)
}

fn render_job(dir: &Path) -> Result<String> {
    let id = read_job_id(dir)?;
    let results = JobResults::load(&JobLayout::new(dir).results_json())?;
    let mut out = String::new();
    let _ = writeln!(out, "JOB ID     : {id}");
    let _ = writeln!(out, "SHORT ID   : {}", short_id(&id));
    let _ = writeln!(out, "JOB LOG    : {}", results.debuglog);
    let _ = writeln!(out, "START      : {}", results.start);
    let _ = writeln!(out, "END        : {}", results.end.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "STATUS     : {}", results.status);
    out.push('\n');
    for test in &results.tests {
        let elapsed = test
            .time_elapsed
            .map(|t| format!("{t:.2} s"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<11} {} {elapsed}", test.status, test.id);
    }
    out.push('\n');
    let _ = writeln!(out, "{}", results.counters().summary_line());
    Ok(out)
}

pub fn diff(config: &EngineConfig, args: &DiffArgs) -> Result<i32> {
    let filter = DiffFilter::parse(&args.diff_filter)?;
    let logs_root = &config.datadir.logs_dir;
    let mut dirs = Vec::with_capacity(2);
    for reference in [&args.job1, &args.job2] {
        match resolve_job_ref(reference, logs_root) {
            Ok(dir) => dirs.push(dir),
            Err(err) => {
                eprintln!("{err}");
                return Ok(exit_codes::FAIL);
            }
        }
    }
    let id1 = read_job_id(&dirs[0])?;
    let id2 = read_job_id(&dirs[1])?;
    let text = diff_jobs((&dirs[0], &id1), (&dirs[1], &id2), &filter)?;
    print!("{text}");
    Ok(exit_codes::ALL_OK)
}

pub fn config(config: &EngineConfig) -> Result<i32> {
    print!("{}", config.to_ini()?);
    Ok(exit_codes::ALL_OK)
}

pub fn config_reference() -> Result<i32> {
    print!("{}", render_config_reference()?);
    Ok(exit_codes::ALL_OK)
}

fn render_config_reference() -> Result<String> {
    let defaults = EngineConfig::default().to_dict()?;
    let mut out = String::new();
    for (key, description) in CONFIG_REFERENCE {
        let default = defaults
            .get(*key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".to_string());
        let _ = writeln!(out, "{key}");
        let _ = writeln!(out, "    {description} (default: {default})");
    }
    Ok(out)
}
