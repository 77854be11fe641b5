// src/task/id.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::paths::safe_filename;

/// Deterministic task identity.
///
/// Rendered as `<suite>-<index>-<name>` with the index zero padded to the
/// width of the suite size, plus `;<variant_id>` when the task runs a named
/// variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(
        suite_index: usize,
        index: usize,
        width: usize,
        name: &str,
        variant_id: Option<&str>,
    ) -> Self {
        let mut id = format!("{suite_index}-{index:0width$}-{name}");
        if let Some(variant) = variant_id {
            id.push(';');
            id.push_str(variant);
        }
        TaskId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name under `test-results/`.
    pub fn filesystem_name(&self) -> String {
        safe_filename(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// Number of decimal digits needed to print `total`.
pub fn index_width(total: usize) -> usize {
    total.max(1).to_string().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_index_and_appends_variant() {
        let id = TaskId::new(1, 3, 2, "/bin/true", Some("short"));
        assert_eq!(id.as_str(), "1-03-/bin/true;short");
        assert_eq!(id.filesystem_name(), "1-03-_bin_true_short");
    }

    #[test]
    fn width_follows_total() {
        assert_eq!(index_width(0), 1);
        assert_eq!(index_width(9), 1);
        assert_eq!(index_width(10), 2);
        assert_eq!(index_width(120), 3);
    }
}
