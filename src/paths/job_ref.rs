// src/paths/job_ref.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AvocadoError, Result};
use crate::paths::layout::LATEST_LINK;

/// Full job id stored in `<dir>/id`.
pub fn read_job_id(dir: &Path) -> Result<String> {
    let text = fs::read_to_string(dir.join("id"))?;
    Ok(text.trim().to_string())
}

/// Every `job-*` directory with an `id` file, sorted by name.
pub fn list_job_dirs(logs_root: &Path) -> Result<Vec<PathBuf>> {
    if !logs_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(logs_root)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_job = name.to_str().is_some_and(|n| n.starts_with("job-"));
        let path = entry.path();
        if is_job && path.join("id").is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Resolve a job reference into its results directory.
///
/// Accepted forms, in order: a results directory holding an `id` file, the
/// path of such an `id` file, `latest`, or a prefix of a job id.
pub fn resolve_job_ref(reference: &str, logs_root: &Path) -> Result<PathBuf> {
    let as_path = Path::new(reference);
    if as_path.is_dir() && as_path.join("id").is_file() {
        return Ok(as_path.to_path_buf());
    }
    if as_path.is_file() && as_path.file_name().is_some_and(|n| n == "id") {
        if let Some(parent) = as_path.parent() {
            return Ok(parent.to_path_buf());
        }
    }

    if reference == LATEST_LINK {
        let link = logs_root.join(LATEST_LINK);
        let target = fs::read_link(&link)
            .map_err(|_| AvocadoError::JobNotFound(format!("no latest job under {}", logs_root.display())))?;
        let dir = if target.is_absolute() {
            target
        } else {
            logs_root.join(target)
        };
        if dir.join("id").is_file() {
            return Ok(dir);
        }
        return Err(AvocadoError::JobNotFound(reference.to_string()));
    }

    let partial = reference.trim();
    if partial.is_empty() || !partial.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AvocadoError::JobNotFound(reference.to_string()));
    }
    let partial = partial.to_ascii_lowercase();

    let mut matches = Vec::new();
    for dir in list_job_dirs(logs_root)? {
        if read_job_id(&dir)?.starts_with(&partial) {
            matches.push(dir);
        }
    }

    match matches.len() {
        0 => Err(AvocadoError::JobNotFound(reference.to_string())),
        1 => Ok(matches.remove(0)),
        n => Err(AvocadoError::Job(format!(
            "job reference '{reference}' is ambiguous: it matches {n} jobs"
        ))),
    }
}
