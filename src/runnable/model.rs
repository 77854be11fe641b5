// src/runnable/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{AvocadoError, Result};
use crate::variants::Variant;

const BASE64_ARG_PREFIX: &str = "base64:";
const JSON_KWARG_PREFIX: &str = "json:";

/// One unit of work: what to run (`kind` + `uri`) and how.
///
/// Runnables are never mutated once built; the `with_*` methods consume and
/// return a new value. Equality and hashing follow the canonical JSON form,
/// so the resolver that produced a runnable does not take part in them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Runnable {
    kind: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    kwargs: BTreeMap<String, Value>,
    #[serde(default)]
    tags: BTreeMap<String, Option<BTreeSet<String>>>,
    #[serde(default)]
    variant: Option<Variant>,
    #[serde(default)]
    output_dir: Option<PathBuf>,
    #[serde(skip)]
    origin: Option<String>,
}

impl Runnable {
    pub fn new(kind: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            kind: kind.into(),
            uri: if uri.is_empty() { None } else { Some(uri) },
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            tags: BTreeMap::new(),
            variant: None,
            output_dir: None,
            origin: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Add a tag; `values` of `None` means the tag carries no values.
    pub fn with_tag(mut self, name: impl Into<String>, values: Option<&[&str]>) -> Self {
        let values = values.map(|vs| vs.iter().map(|v| v.to_string()).collect());
        self.tags.insert(name.into(), values);
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Set the output directory unless one is already present.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match &self.output_dir {
            Some(existing) if existing != &dir => {
                warn!(
                    existing = %existing.display(),
                    ignored = %dir.display(),
                    "runnable already has an output directory"
                );
            }
            Some(_) => {}
            None => self.output_dir = Some(dir),
        }
        self
    }

    /// Same runnable, realised by a different kind of runner.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_origin(mut self, resolver: impl Into<String>) -> Self {
        self.origin = Some(resolver.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    pub fn tags(&self) -> &BTreeMap<String, Option<BTreeSet<String>>> {
        &self.tags
    }

    pub fn variant(&self) -> Option<&Variant> {
        self.variant.as_ref()
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Name of the resolver that produced this runnable, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Short human name: the uri, or the kind when there is none.
    pub fn name(&self) -> &str {
        self.uri.as_deref().unwrap_or(&self.kind)
    }

    /// Canonical JSON: sorted keys, no implementation-only fields.
    pub fn to_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&value)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| AvocadoError::Recipe(e.to_string()))
    }

    pub fn write_recipe(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_recipe(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| AvocadoError::Recipe(format!("{}: {e}", path.display())))
    }

    /// Stable content address over kind, uri, args, kwargs and variant.
    pub fn identifier(&self) -> String {
        let key = serde_json::json!({
            "kind": self.kind,
            "uri": self.uri,
            "args": self.args,
            "kwargs": self.kwargs,
            "variant": self.variant,
        });
        blake3::hash(key.to_string().as_bytes()).to_hex().to_string()
    }

    /// Arguments for `avocado task-run` reproducing this runnable.
    pub fn command_args(&self) -> Vec<String> {
        let mut out = vec!["-k".to_string(), self.kind.clone()];
        if let Some(uri) = &self.uri {
            out.push("-u".to_string());
            out.push(uri.clone());
        }
        for arg in &self.args {
            out.push("-a".to_string());
            out.push(encode_arg(arg));
        }
        for (key, value) in &self.kwargs {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => format!("{JSON_KWARG_PREFIX}{other}"),
            };
            out.push(format!("{key}={rendered}"));
        }
        out
    }
}

impl PartialEq for Runnable {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.uri == other.uri
            && self.args == other.args
            && self.kwargs == other.kwargs
            && self.tags == other.tags
            && self.variant == other.variant
            && self.output_dir == other.output_dir
    }
}

impl Eq for Runnable {}

impl Hash for Runnable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Ok(json) = self.to_json() {
            json.hash(state);
        }
    }
}

/// Encode an argument so it survives a command line that treats a leading
/// `-` as an option.
pub fn encode_arg(arg: &str) -> String {
    if arg.starts_with('-') || arg.starts_with(BASE64_ARG_PREFIX) {
        format!("{BASE64_ARG_PREFIX}{}", BASE64.encode(arg.as_bytes()))
    } else {
        arg.to_string()
    }
}

pub fn decode_arg(arg: &str) -> Result<String> {
    match arg.strip_prefix(BASE64_ARG_PREFIX) {
        Some(encoded) => {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| AvocadoError::Recipe(format!("bad base64 argument: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| AvocadoError::Recipe(format!("argument is not UTF-8: {e}")))
        }
        None => Ok(arg.to_string()),
    }
}

/// Parse one `key=value` keyword argument. A `json:` prefix makes the value
/// parsed as JSON.
pub fn parse_kwarg(item: &str) -> Result<(String, Value)> {
    let (key, raw) = item
        .split_once('=')
        .ok_or_else(|| AvocadoError::Recipe(format!("keyword argument without '=': {item}")))?;
    if key.is_empty() {
        return Err(AvocadoError::Recipe(format!("empty keyword name in '{item}'")));
    }
    let value = match raw.strip_prefix(JSON_KWARG_PREFIX) {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| AvocadoError::Recipe(format!("bad JSON value for '{key}': {e}")))?,
        None => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}
