// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug)]
pub enum AvocadoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid recipe: {0}")]
    Recipe(String),

    #[error("Reference resolution failed: {0}")]
    Resolution(String),

    #[error("Spawner error: {0}")]
    Spawner(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Replay error: {0}")]
    Replay(String),

    #[error("Unknown configuration key: {0}")]
    UnknownConfigKey(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AvocadoError {
    /// Process exit code reported when this error aborts a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            AvocadoError::Config(_)
            | AvocadoError::Job(_)
            | AvocadoError::Replay(_)
            | AvocadoError::UnknownConfigKey(_)
            | AvocadoError::JobNotFound(_) => exit_codes::JOB_FAIL,
            _ => exit_codes::FAIL,
        }
    }
}

pub type Result<T> = std::result::Result<T, AvocadoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestration_errors_map_to_job_fail() {
        assert_eq!(AvocadoError::Job("x".into()).exit_code(), exit_codes::JOB_FAIL);
        assert_eq!(
            AvocadoError::UnknownConfigKey("run.nope".into()).exit_code(),
            exit_codes::JOB_FAIL
        );
        assert_eq!(AvocadoError::Recipe("bad".into()).exit_code(), exit_codes::FAIL);
    }
}
