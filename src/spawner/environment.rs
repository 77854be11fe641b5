// src/spawner/environment.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::paths::TaskDir;
use crate::runnable::Runnable;

pub const AVOCADO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Variables exported into a running test. All paths are absolute.
///
/// Computed once at spawn time and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEnvironment {
    vars: BTreeMap<String, String>,
}

impl TaskEnvironment {
    pub fn new(runnable: &Runnable, task_dir: &TaskDir) -> Self {
        let logdir = absolute(task_dir.path());
        let dir = TaskDir::new(&logdir);
        let uri_path = runnable
            .uri()
            .map(Path::new)
            .filter(|p| p.exists())
            .map(absolute);

        let basedir = uri_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| logdir.clone());
        let datadir = uri_path
            .as_deref()
            .map(|p| PathBuf::from(format!("{}.data", p.display())))
            .unwrap_or_else(|| dir.data_dir());

        let mut vars = BTreeMap::new();
        let mut put = |k: &str, v: &Path| {
            vars.insert(k.to_string(), v.to_string_lossy().into_owned());
        };
        put("AVOCADO_TEST_BASEDIR", &basedir);
        put("AVOCADO_TEST_DATADIR", &datadir);
        put("AVOCADO_TEST_WORKDIR", &dir.work_dir());
        put("AVOCADO_TEST_SRCDIR", &dir.src_dir());
        put("AVOCADO_TEST_LOGDIR", &logdir);
        put("AVOCADO_TEST_LOGFILE", &dir.debug_log());
        put("AVOCADO_TEST_OUTPUTDIR", &dir.data_dir());
        put("AVOCADO_TEST_SYSINFODIR", &logdir.join("sysinfo"));
        vars.insert("AVOCADO_VERSION".to_string(), AVOCADO_VERSION.to_string());

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
