// src/paths/layout.rs

//! Canonical job results layout.
//!
//! ```text
//! <logs_root>/
//!   latest -> job-YYYY-MM-DD_HH.MM.SS-<id7>/
//!   job-YYYY-MM-DD_HH.MM.SS-<id7>/
//!     id, job.log, results.json
//!     sysinfo/{pre,post}/
//!     jobdata/
//!     test-results/<task-identity>/{debug.log,stdout,stderr,whiteboard,data/}
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::errors::{AvocadoError, Result};
use crate::paths::job_id::SHORT_ID_LEN;
use crate::paths::safe_name::safe_filename;

pub const LATEST_LINK: &str = "latest";
pub const TEST_RESULTS_DIR: &str = "test-results";
pub const JOBDATA_DIR: &str = "jobdata";

/// Paths inside one job results directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn id_file(&self) -> PathBuf {
        self.root.join("id")
    }

    pub fn job_log(&self) -> PathBuf {
        self.root.join("job.log")
    }

    pub fn results_json(&self) -> PathBuf {
        self.root.join("results.json")
    }

    pub fn jobdata_dir(&self) -> PathBuf {
        self.root.join(JOBDATA_DIR)
    }

    pub fn test_results_dir(&self) -> PathBuf {
        self.root.join(TEST_RESULTS_DIR)
    }

    pub fn sysinfo_dir(&self, phase: &str) -> PathBuf {
        self.root.join("sysinfo").join(phase)
    }

    /// Directory of one task; `identity` is made filesystem-safe here.
    pub fn task_dir(&self, identity: &str) -> TaskDir {
        TaskDir::new(self.test_results_dir().join(safe_filename(identity)))
    }
}

/// Artifact directory of a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDir {
    path: PathBuf,
}

impl TaskDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debug_log(&self) -> PathBuf {
        self.path.join("debug.log")
    }

    pub fn stdout(&self) -> PathBuf {
        self.path.join("stdout")
    }

    pub fn stderr(&self) -> PathBuf {
        self.path.join("stderr")
    }

    pub fn whiteboard(&self) -> PathBuf {
        self.path.join("whiteboard")
    }

    /// Test-produced artifacts (`AVOCADO_TEST_OUTPUTDIR`).
    pub fn data_dir(&self) -> PathBuf {
        self.path.join("data")
    }

    /// Scratch space (`AVOCADO_TEST_WORKDIR`), removed unless `keep_tmp`.
    pub fn work_dir(&self) -> PathBuf {
        self.path.join("work")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.work_dir().join("src")
    }

    pub fn sysinfo_dir(&self, phase: &str) -> PathBuf {
        self.path.join("sysinfo").join(phase)
    }

    pub fn result_json(&self) -> PathBuf {
        self.path.join("result.json")
    }

    /// Task recipe handed to the spawned runner.
    pub fn recipe(&self) -> PathBuf {
        self.path.join("task.json")
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir())?;
        Ok(())
    }
}

/// Create a unique `job-<stamp>-<id7>` directory under `logs_root`.
///
/// On collision the id suffix grows one character at a time up to the
/// full id, then `.0`, `.1`, ... are appended until a name is free.
pub fn create_job_logs_dir(
    logs_root: &Path,
    job_id: &str,
    start: DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(logs_root)?;
    let logs_root = std::path::absolute(logs_root)?;
    let stamp = start.format("%Y-%m-%d_%H.%M.%S");

    let min = SHORT_ID_LEN.min(job_id.len());
    let candidates = (min..=job_id.len())
        .map(|len| format!("job-{stamp}-{}", &job_id[..len]))
        .chain((0..=u64::MAX).map(|i| format!("job-{stamp}-{job_id}.{i}")));

    for name in candidates {
        let path = logs_root.join(&name);
        match fs::create_dir(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "created job results directory");
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(AvocadoError::Job(format!(
        "unable to find a unique job results directory under {}",
        logs_root.display()
    )))
}

/// Atomically re-point `<logs_root>/latest` at `job_dir`.
///
/// The link is created under a temporary name and renamed over `latest`.
/// A `latest` that exists and is not a symlink is left alone and reported.
#[cfg(unix)]
pub fn update_latest_link(logs_root: &Path, job_dir: &Path) -> Result<()> {
    let latest = logs_root.join(LATEST_LINK);
    if let Ok(meta) = fs::symlink_metadata(&latest) {
        if !meta.file_type().is_symlink() {
            return Err(AvocadoError::Job(format!(
                "{} exists and is not a symlink",
                latest.display()
            )));
        }
    }

    let target = job_dir.file_name().map(PathBuf::from).ok_or_else(|| {
        AvocadoError::Job(format!("invalid job directory {}", job_dir.display()))
    })?;

    let tmp = logs_root.join(format!("{LATEST_LINK}.{}", std::process::id()));
    match fs::remove_file(&tmp) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            debug!(path = %tmp.display(), error = %e, "stale latest link not removed");
        }
        _ => {}
    }
    std::os::unix::fs::symlink(&target, &tmp)?;
    fs::rename(&tmp, &latest)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn update_latest_link(logs_root: &Path, job_dir: &Path) -> Result<()> {
    debug!(
        root = %logs_root.display(),
        job_dir = %job_dir.display(),
        "latest link not supported on this platform"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
    }

    const ID: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn job_dir_name_uses_stamp_and_short_id() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        assert_eq!(
            dir.file_name().unwrap().to_str().unwrap(),
            "job-2024-03-05_07.08.09-0123456"
        );
    }

    #[test]
    fn collisions_extend_the_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let a = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        let b = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        assert_ne!(a, b);
        assert!(b.to_str().unwrap().ends_with("-01234567"));
    }

    #[test]
    fn collisions_past_full_id_get_numbered() {
        let tmp = tempfile::tempdir().unwrap();
        let id = "0123456";
        create_job_logs_dir(tmp.path(), id, fixed_time()).unwrap();
        let second = create_job_logs_dir(tmp.path(), id, fixed_time()).unwrap();
        assert!(second.to_str().unwrap().ends_with("-0123456.0"));
    }

    #[test]
    fn numbered_suffix_keeps_counting_past_a_thousand() {
        let tmp = tempfile::tempdir().unwrap();
        let id = "0123456";
        let stamp = "job-2024-03-05_07.08.09-0123456";
        fs::create_dir(tmp.path().join(stamp)).unwrap();
        for i in 0..1000 {
            fs::create_dir(tmp.path().join(format!("{stamp}.{i}"))).unwrap();
        }
        let dir = create_job_logs_dir(tmp.path(), id, fixed_time()).unwrap();
        assert_eq!(
            dir.file_name().unwrap().to_str().unwrap(),
            format!("{stamp}.1000")
        );
    }

    #[cfg(unix)]
    #[test]
    fn stale_temporary_latest_link_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let job = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        let stale = tmp.path().join(format!("{LATEST_LINK}.{}", std::process::id()));
        std::os::unix::fs::symlink("gone", &stale).unwrap();

        update_latest_link(tmp.path(), &job).unwrap();
        assert!(fs::symlink_metadata(&stale).is_err());
        assert_eq!(
            fs::read_link(tmp.path().join(LATEST_LINK)).unwrap(),
            PathBuf::from(job.file_name().unwrap())
        );
    }

    #[cfg(unix)]
    #[test]
    fn latest_follows_the_newest_job() {
        let tmp = tempfile::tempdir().unwrap();
        let a = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        update_latest_link(tmp.path(), &a).unwrap();
        let b = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        update_latest_link(tmp.path(), &b).unwrap();

        let target = fs::read_link(tmp.path().join(LATEST_LINK)).unwrap();
        assert_eq!(target, PathBuf::from(b.file_name().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn latest_refuses_to_replace_a_real_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(LATEST_LINK), "x").unwrap();
        let a = create_job_logs_dir(tmp.path(), ID, fixed_time()).unwrap();
        assert!(update_latest_link(tmp.path(), &a).is_err());
    }

    #[test]
    fn task_dir_names_are_safe() {
        let layout = JobLayout::new("/r");
        let dir = layout.task_dir("1-/bin/true;short");
        assert_eq!(dir.path(), Path::new("/r/test-results/1-_bin_true_short"));
        assert_eq!(dir.stdout(), Path::new("/r/test-results/1-_bin_true_short/stdout"));
    }
}
