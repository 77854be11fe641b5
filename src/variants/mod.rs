// src/variants/mod.rs

//! Variants and their expansion into (test, variant) pairs.
//!
//! Variants come from outside the engine (a JSON file, replay data or
//! `test_parameters`); the engine only attaches them to runnables.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AvocadoError, Result};
use crate::runnable::Runnable;
use crate::types::ExecutionOrder;

/// One parameter assignment: `key = value` found under `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Binding {
    pub path: String,
    pub key: String,
    pub value: Value,
}

/// One assignment of parameter bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variant {
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub variant: Vec<Binding>,
}

impl Variant {
    pub fn new(variant_id: impl Into<String>) -> Self {
        Self {
            variant_id: Some(variant_id.into()),
            paths: vec!["/".to_string()],
            variant: Vec::new(),
        }
    }

    pub fn with_binding(mut self, path: &str, key: &str, value: Value) -> Self {
        self.variant.push(Binding {
            path: path.to_string(),
            key: key.to_string(),
            value,
        });
        self
    }

    /// The implicit variant used when none are supplied.
    pub fn is_default(&self) -> bool {
        self.variant_id.is_none() && self.variant.is_empty()
    }

    /// Bindings as environment variables; later bindings win.
    pub fn env(&self) -> BTreeMap<String, String> {
        self.variant
            .iter()
            .map(|b| {
                let value = match &b.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (b.key.clone(), value)
            })
            .collect()
    }
}

/// Restartable, ordered collection of variants.
///
/// Never empty: without explicit variants it holds the single default one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantSet {
    variants: Vec<Variant>,
}

impl Default for VariantSet {
    fn default() -> Self {
        Self {
            variants: vec![Variant::default()],
        }
    }
}

impl VariantSet {
    pub fn new(variants: Vec<Variant>) -> Self {
        if variants.is_empty() {
            return Self::default();
        }
        Self { variants }
    }

    /// A single variant exposing `key=value` pairs under `/`.
    pub fn from_parameters(params: &BTreeMap<String, String>) -> Self {
        if params.is_empty() {
            return Self::default();
        }
        let variant = params.iter().fold(
            Variant {
                variant_id: None,
                paths: vec!["/".to_string()],
                variant: Vec::new(),
            },
            |v, (k, val)| v.with_binding("/", k, Value::String(val.clone())),
        );
        Self {
            variants: vec![variant],
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let variants: Vec<Variant> = serde_json::from_str(text)?;
        Ok(Self::new(variants))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            AvocadoError::Config(format!("cannot read variants file {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variant> {
        self.variants.iter()
    }

    /// True when this is only the implicit default variant.
    pub fn is_default(&self) -> bool {
        self.variants.len() == 1 && self.variants[0].is_default()
    }
}

/// One (test, variant) pair produced by [`expand`].
#[derive(Debug, Clone, Copy)]
pub struct Expanded<'a> {
    pub test_index: usize,
    pub variant_index: usize,
    pub runnable: &'a Runnable,
    pub variant: &'a Variant,
}

/// Cross product of tests and variants in the requested order.
pub fn expand<'a>(
    runnables: &'a [Runnable],
    variants: &'a VariantSet,
    order: ExecutionOrder,
) -> Vec<Expanded<'a>> {
    let mut out = Vec::with_capacity(runnables.len() * variants.len());
    match order {
        ExecutionOrder::VariantsPerTest => {
            for (test_index, runnable) in runnables.iter().enumerate() {
                for (variant_index, variant) in variants.iter().enumerate() {
                    out.push(Expanded {
                        test_index,
                        variant_index,
                        runnable,
                        variant,
                    });
                }
            }
        }
        ExecutionOrder::TestsPerVariant => {
            for (variant_index, variant) in variants.iter().enumerate() {
                for (test_index, runnable) in runnables.iter().enumerate() {
                    out.push(Expanded {
                        test_index,
                        variant_index,
                        runnable,
                        variant,
                    });
                }
            }
        }
    }
    out
}
