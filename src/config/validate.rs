// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{AvocadoError, Result};

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = crate::errors::AvocadoError;

    fn try_from(raw: RawEngineConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(EngineConfig::new_unchecked(raw))
    }
}

/// Re-check an already built config, e.g. after a test mutated it.
pub fn validate_config(cfg: &EngineConfig) -> Result<()> {
    validate_raw_config(&cfg.clone().into_raw())
}

fn validate_raw_config(cfg: &RawEngineConfig) -> Result<()> {
    validate_scheduler(cfg)?;
    validate_timeouts(cfg)?;
    validate_runner(cfg)?;
    Ok(())
}

fn validate_scheduler(cfg: &RawEngineConfig) -> Result<()> {
    if cfg.scheduler.workers == 0 {
        return Err(AvocadoError::Config(
            "scheduler.workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.scheduler.max_running_tasks == Some(0) {
        return Err(AvocadoError::Config(
            "scheduler.max_running_tasks must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.scheduler.tick_ms == 0 {
        return Err(AvocadoError::Config(
            "scheduler.tick_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_timeouts(cfg: &RawEngineConfig) -> Result<()> {
    let optional = [
        ("task.timeout", cfg.task.timeout),
        ("run.job_timeout", cfg.run.job_timeout),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            check_seconds(key, v)?;
        }
    }

    check_seconds("runner.early_status_timeout", cfg.runner.early_status_timeout)?;
    check_seconds("runner.timeout.process_alive", cfg.runner.timeout.process_alive)?;
    check_seconds("runner.timeout.process_died", cfg.runner.timeout.process_died)?;
    check_seconds("runner.interrupt_grace", cfg.runner.interrupt_grace)?;
    Ok(())
}

/// `value` must convert to a [`Duration`]: finite, non-negative and in range.
fn check_seconds(key: &str, value: f64) -> Result<()> {
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .map_err(|e| {
            AvocadoError::Config(format!(
                "{key} must be a non-negative number of seconds (got {value}: {e})"
            ))
        })
}

fn validate_runner(cfg: &RawEngineConfig) -> Result<()> {
    if let Some(cmd) = &cfg.runner.command {
        if cmd.is_empty() || cmd[0].trim().is_empty() {
            return Err(AvocadoError::Config(
                "runner.command must name a program when set".to_string(),
            ));
        }
    }
    Ok(())
}
