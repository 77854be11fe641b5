// src/runnable/task_recipe.rs

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AvocadoError, Result};
use crate::runnable::Runnable;

/// Input of `avocado task-run-recipe`: a runnable plus the identity its
/// status messages must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRecipe {
    pub id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    pub runnable: Runnable,
}

fn default_category() -> String {
    "test".to_string()
}

impl TaskRecipe {
    pub fn new(id: impl Into<String>, job_id: Option<String>, runnable: Runnable) -> Self {
        Self {
            id: id.into(),
            job_id,
            category: default_category(),
            runnable,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| AvocadoError::Recipe(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        let recipe = TaskRecipe::new("1-noop", Some("abc".into()), Runnable::new("noop", ""));
        recipe.write(&path).unwrap();
        assert_eq!(TaskRecipe::read(&path).unwrap(), recipe);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = r#"{"id": "1", "runnable": {"kind": "noop"}, "extra": true}"#;
        assert!(serde_json::from_str::<TaskRecipe>(text).is_err());
    }
}
