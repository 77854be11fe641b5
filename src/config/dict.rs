// src/config/dict.rs

//! Flat, dotted-key view of [`EngineConfig`].
//!
//! This is the stable form used by `jobdata/args.json`, `jobdata/config`,
//! replay overrides and `avocado config`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{AvocadoError, Result};

pub type ConfigDict = BTreeMap<String, Value>;

/// Keys whose values are maps and must not be flattened further.
const MAP_VALUED_KEYS: &[&str] = &["run.test_parameters"];

/// One line of `avocado config reference`.
pub const CONFIG_REFERENCE: &[(&str, &str)] = &[
    ("datadir.logs_dir", "Directory holding every job results directory"),
    ("run.dry_run", "Create tasks but report CANCEL instead of running them"),
    ("run.execution_order", "variants-per-test or tests-per-variant"),
    ("run.failfast", "Cancel pending tasks after the first non PASS/SKIP outcome"),
    ("run.ignore_missing_references", "Run even when some references do not resolve"),
    ("run.job_timeout", "Seconds before the whole job is interrupted"),
    ("run.keep_tmp", "Keep each task work directory after it finishes"),
    ("run.references", "References to resolve into tests"),
    ("run.sysinfo", "Create sysinfo pre/post directories and run collectors"),
    ("run.tags", "Tag filter groups, OR-ed together"),
    ("run.tags_include_empty", "Keep tests without any tags when filtering"),
    ("run.tags_include_empty_key", "Accept key:val filters for tests lacking the key"),
    ("run.test_parameters", "key=value parameters exposed to every test"),
    ("run.variants_file", "JSON file with the variants to expand"),
    ("runner.command", "Command that runs a task recipe (recipe path appended)"),
    ("runner.early_status_timeout", "Seconds a task may run before reporting started"),
    ("runner.exectest_skip_codes", "exec-test exit codes that mean SKIP"),
    ("runner.interrupt_grace", "Seconds between graceful termination and force kill"),
    ("runner.timeout.process_alive", "Seconds a task may live after reporting finished"),
    ("runner.timeout.process_died", "Seconds to wait for messages after a task exited"),
    ("scheduler.max_running_tasks", "Maximum concurrently started tasks"),
    ("scheduler.tick_ms", "Scheduler idle tick in milliseconds"),
    ("scheduler.workers", "Number of cooperative scheduler workers"),
    ("spawner.kind", "Spawner used to run tasks"),
    ("task.timeout", "Per-task timeout in seconds"),
];

impl EngineConfig {
    /// Flatten into dotted keys (`runner.timeout.process_alive`).
    pub fn to_dict(&self) -> Result<ConfigDict> {
        let value = serde_json::to_value(self)?;
        let mut out = ConfigDict::new();
        flatten_into("", &value, &mut out);
        Ok(out)
    }

    /// Build a config from dotted keys, starting from the defaults.
    ///
    /// Every key must exist in the default dictionary.
    pub fn from_dict(dict: &ConfigDict) -> Result<EngineConfig> {
        EngineConfig::default().apply_overrides(dict)
    }

    /// Copy of `self` with the given dotted keys replaced.
    pub fn apply_overrides(&self, overrides: &ConfigDict) -> Result<EngineConfig> {
        let mut dict = self.to_dict()?;
        for (key, value) in overrides {
            if !dict.contains_key(key) {
                return Err(AvocadoError::UnknownConfigKey(key.clone()));
            }
            dict.insert(key.clone(), value.clone());
        }

        let raw: RawEngineConfig = serde_json::from_value(unflatten(&dict))
            .map_err(|e| AvocadoError::Config(format!("invalid configuration value: {e}")))?;
        EngineConfig::try_from(raw)
    }

    /// Sorted INI rendering, one `[section]` per key prefix.
    pub fn to_ini(&self) -> Result<String> {
        let dict = self.to_dict()?;
        let mut sections: BTreeMap<&str, Vec<(&str, &Value)>> = BTreeMap::new();
        for (key, value) in &dict {
            let (section, name) = key.rsplit_once('.').unwrap_or(("", key.as_str()));
            sections.entry(section).or_default().push((name, value));
        }

        let mut out = String::new();
        for (i, (section, entries)) in sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{section}]");
            for (name, value) in entries {
                let _ = writeln!(out, "{name} = {}", render_value(value));
            }
        }
        Ok(out)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn flatten_into(prefix: &str, value: &Value, out: &mut ConfigDict) {
    match value {
        Value::Object(map) if !MAP_VALUED_KEYS.contains(&prefix) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(&key, v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

fn unflatten(dict: &ConfigDict) -> Value {
    let mut root = Map::new();
    for (key, value) in dict {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value.clone());
    }
    Value::Object(root)
}

fn insert_path(map: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let child = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child_map) = child {
                insert_path(child_map, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dict_uses_dotted_keys() {
        let dict = EngineConfig::default().to_dict().unwrap();
        assert_eq!(dict["scheduler.workers"], json!(4));
        assert_eq!(dict["runner.timeout.process_alive"], json!(5.0));
        assert_eq!(dict["run.test_parameters"], json!({}));
        assert_eq!(dict["run.execution_order"], json!("variants-per-test"));
    }

    #[test]
    fn reference_covers_every_key() {
        let dict = EngineConfig::default().to_dict().unwrap();
        let documented: Vec<&str> = CONFIG_REFERENCE.iter().map(|(k, _)| *k).collect();
        let keys: Vec<&str> = dict.keys().map(String::as_str).collect();
        assert_eq!(keys, documented);
    }

    #[test]
    fn dict_round_trip_is_identity() {
        let mut cfg = EngineConfig::default();
        cfg.run.failfast = true;
        cfg.run.test_parameters.insert("speed".into(), "fast".into());
        cfg.task.timeout = Some(2.5);

        let back = EngineConfig::from_dict(&cfg.to_dict().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn unknown_override_key_is_reported() {
        let mut overrides = ConfigDict::new();
        overrides.insert("run.fail_fast".into(), json!(true));
        let err = EngineConfig::default().apply_overrides(&overrides).unwrap_err();
        assert!(matches!(err, AvocadoError::UnknownConfigKey(k) if k == "run.fail_fast"));
    }

    #[test]
    fn ini_is_sectioned_and_sorted() {
        let ini = EngineConfig::default().to_ini().unwrap();
        let run_pos = ini.find("[run]").unwrap();
        let sched_pos = ini.find("[scheduler]").unwrap();
        assert!(run_pos < sched_pos);
        assert!(ini.contains("[runner.timeout]\nprocess_alive = 5.0\n"));
        assert!(ini.contains("failfast = false"));
    }
}
