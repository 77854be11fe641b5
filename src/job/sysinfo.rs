// src/job/sysinfo.rs

//! Hooks for system information collectors.
//!
//! No collector ships with the engine; the job only prepares the
//! `sysinfo/{pre,post}` directories and calls whatever is registered.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysinfoPhase {
    Pre,
    Post,
}

impl SysinfoPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SysinfoPhase::Pre => "pre",
            SysinfoPhase::Post => "post",
        }
    }
}

impl fmt::Display for SysinfoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collects system information into a directory.
pub trait SysinfoCollector: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self, phase: SysinfoPhase, dir: &Path) -> Result<()>;
}

/// Registered collectors of one job.
#[derive(Clone, Default)]
pub struct Sysinfo {
    collectors: Vec<Arc<dyn SysinfoCollector>>,
}

impl fmt::Debug for Sysinfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.collectors.iter().map(|c| c.name()).collect();
        f.debug_struct("Sysinfo").field("collectors", &names).finish()
    }
}

impl Sysinfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Arc<dyn SysinfoCollector>) {
        self.collectors.push(collector);
    }

    /// Create `dir` and run every collector into it.
    ///
    /// Collector failures are logged; they never fail the job.
    pub fn collect(&self, phase: SysinfoPhase, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for collector in &self.collectors {
            match collector.collect(phase, dir) {
                Ok(()) => debug!(collector = collector.name(), %phase, "sysinfo collected"),
                Err(err) => warn!(
                    collector = collector.name(),
                    %phase,
                    error = %err,
                    "sysinfo collector failed"
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AvocadoError;

    struct Uname;

    impl SysinfoCollector for Uname {
        fn name(&self) -> &str {
            "uname"
        }
        fn collect(&self, phase: SysinfoPhase, dir: &Path) -> Result<()> {
            std::fs::write(dir.join("uname"), format!("{phase}\n"))?;
            Ok(())
        }
    }

    struct Broken;

    impl SysinfoCollector for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn collect(&self, _: SysinfoPhase, _: &Path) -> Result<()> {
            Err(AvocadoError::Job("nope".into()))
        }
    }

    #[test]
    fn failing_collectors_do_not_stop_the_others() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sysinfo = Sysinfo::new();
        sysinfo.register(Arc::new(Broken));
        sysinfo.register(Arc::new(Uname));

        let dir = tmp.path().join("sysinfo").join("pre");
        sysinfo.collect(SysinfoPhase::Pre, &dir).unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("uname")).unwrap(), "pre\n");
    }
}
