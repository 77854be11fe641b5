// src/types.rs

//! Small shared enums used across the engine, the wire protocol and the
//! on-disk results.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Final terminal label of a task.
///
/// Serialized lowercase on the status wire (`"result": "pass"`) and printed
/// uppercase in results and the human UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Skip,
    Cancel,
    Warn,
    Interrupted,
}

impl Outcome {
    pub const ALL: [Outcome; 7] = [
        Outcome::Pass,
        Outcome::Fail,
        Outcome::Error,
        Outcome::Skip,
        Outcome::Cancel,
        Outcome::Warn,
        Outcome::Interrupted,
    ];

    pub fn as_upper(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Error => "ERROR",
            Outcome::Skip => "SKIP",
            Outcome::Cancel => "CANCEL",
            Outcome::Warn => "WARN",
            Outcome::Interrupted => "INTERRUPTED",
        }
    }

    pub fn as_lower(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Error => "error",
            Outcome::Skip => "skip",
            Outcome::Cancel => "cancel",
            Outcome::Warn => "warn",
            Outcome::Interrupted => "interrupted",
        }
    }

    /// Outcomes that do not trip failfast.
    pub fn is_good(&self) -> bool {
        matches!(self, Outcome::Pass | Outcome::Skip)
    }

    /// Outcomes that make the job report `TESTS_FAIL`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail | Outcome::Error)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass" => Ok(Outcome::Pass),
            "fail" => Ok(Outcome::Fail),
            "error" => Ok(Outcome::Error),
            "skip" => Ok(Outcome::Skip),
            "cancel" => Ok(Outcome::Cancel),
            "warn" => Ok(Outcome::Warn),
            "interrupted" | "interrupt" => Ok(Outcome::Interrupted),
            other => Err(format!("invalid test status: {other}")),
        }
    }
}

/// Life-cycle position of a task inside the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Requested,
    Triaging,
    Ready,
    Started,
    Finished,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Requested => "REQUESTED",
            TaskStatus::Triaging => "TRIAGING",
            TaskStatus::Ready => "READY",
            TaskStatus::Started => "STARTED",
            TaskStatus::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

/// Order in which (test, variant) pairs are turned into tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionOrder {
    /// For each test, every variant before moving to the next test.
    #[default]
    VariantsPerTest,
    /// For each variant, every test before moving to the next variant.
    TestsPerVariant,
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOrder::VariantsPerTest => f.write_str("variants-per-test"),
            ExecutionOrder::TestsPerVariant => f.write_str("tests-per-variant"),
        }
    }
}

/// Which spawner realises tasks as execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnerKind {
    /// One local subprocess per task.
    #[default]
    Process,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_parses_case_insensitively() {
        assert_eq!("FAIL".parse::<Outcome>().unwrap(), Outcome::Fail);
        assert_eq!("interrupt".parse::<Outcome>().unwrap(), Outcome::Interrupted);
        assert!("bogus".parse::<Outcome>().is_err());
    }

    #[test]
    fn outcome_wire_form_is_lowercase() {
        let json = serde_json::to_string(&Outcome::Cancel).unwrap();
        assert_eq!(json, "\"cancel\"");
    }

    #[test]
    fn only_pass_and_skip_are_good() {
        let good: Vec<_> = Outcome::ALL.iter().filter(|o| o.is_good()).collect();
        assert_eq!(good, vec![&Outcome::Pass, &Outcome::Skip]);
    }
}
