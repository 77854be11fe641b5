// src/resolver/mod.rs

//! Reference resolution.
//!
//! A reference is any string the user passes to `run`/`list`. Resolvers are
//! tried in priority order (highest first, ties by registration order); the
//! first one that accepts a reference produces its [`ReferenceResolution`].
//! A failing resolver yields an ERROR resolution and never aborts the batch.

pub mod builtin;

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{AvocadoError, Result};
use crate::runnable::Runnable;

pub use builtin::{ExecTestResolver, KindUriResolver, RecipeResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolutionResult {
    Success,
    NotFound,
    Error,
}

impl fmt::Display for ResolutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionResult::Success => f.write_str("SUCCESS"),
            ResolutionResult::NotFound => f.write_str("NOTFOUND"),
            ResolutionResult::Error => f.write_str("ERROR"),
        }
    }
}

/// Outcome of resolving one reference.
///
/// SUCCESS always carries at least one runnable; NOTFOUND and ERROR carry
/// none and always explain themselves in `info`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceResolution {
    pub origin: Option<String>,
    pub reference: String,
    pub result: ResolutionResult,
    pub resolutions: Vec<Runnable>,
    pub info: Option<String>,
}

impl ReferenceResolution {
    pub fn success(origin: &str, reference: &str, runnables: Vec<Runnable>) -> Self {
        if runnables.is_empty() {
            return Self::not_found(reference, format!("resolver '{origin}' found no tests"));
        }
        let resolutions = runnables
            .into_iter()
            .map(|r| r.with_origin(origin))
            .collect();
        Self {
            origin: Some(origin.to_string()),
            reference: reference.to_string(),
            result: ResolutionResult::Success,
            resolutions,
            info: None,
        }
    }

    pub fn not_found(reference: &str, info: impl Into<String>) -> Self {
        Self {
            origin: None,
            reference: reference.to_string(),
            result: ResolutionResult::NotFound,
            resolutions: Vec::new(),
            info: Some(info.into()),
        }
    }

    pub fn error(origin: &str, reference: &str, info: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.to_string()),
            reference: reference.to_string(),
            result: ResolutionResult::Error,
            resolutions: Vec::new(),
            info: Some(info.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ResolutionResult::Success
    }
}

/// A resolver implementation.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    /// Whether this resolver recognises `reference`.
    fn accepts(&self, reference: &str) -> bool;

    /// Resolve an accepted reference. An `Err` becomes an ERROR resolution.
    fn resolve(&self, reference: &str) -> Result<ReferenceResolution>;
}

#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `recipe`, `kind-uri` and `exec-test`
    /// resolvers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RecipeResolver));
        registry.register(Box::new(KindUriResolver));
        registry.register(Box::new(ExecTestResolver));
        registry
    }

    /// Add a resolver, keeping the list ordered by descending priority.
    /// Equal priorities keep registration order.
    pub fn register(&mut self, resolver: Box<dyn Resolver>) {
        self.resolvers.push(resolver);
        self.resolvers
            .sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn resolve_one(&self, reference: &str) -> ReferenceResolution {
        let Some(resolver) = self.resolvers.iter().find(|r| r.accepts(reference)) else {
            debug!(reference, "no resolver accepted reference");
            return ReferenceResolution::not_found(reference, "no resolver recognised the reference");
        };

        match resolver.resolve(reference) {
            Ok(resolution) => resolution,
            Err(err) => {
                warn!(reference, resolver = resolver.name(), error = %err, "resolver failed");
                ReferenceResolution::error(resolver.name(), reference, err.to_string())
            }
        }
    }

    /// One resolution per reference, in input order.
    pub fn resolve<S: AsRef<str>>(&self, references: &[S]) -> Vec<ReferenceResolution> {
        references
            .iter()
            .map(|r| self.resolve_one(r.as_ref()))
            .collect()
    }
}

/// Replace directory references with the files below them.
///
/// Files are visited in sorted order and hidden entries are skipped. A
/// directory without files is kept as a reference of its own.
pub fn expand_directories<S: AsRef<str>>(references: &[S]) -> Vec<String> {
    let mut out = Vec::new();
    for reference in references {
        let reference = reference.as_ref();
        let path = Path::new(reference);
        if !path.is_dir() {
            out.push(reference.to_string());
            continue;
        }

        let before = out.len();
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker.flatten() {
            if entry.file_type().is_file() {
                out.push(entry.path().to_string_lossy().into_owned());
            }
        }
        if out.len() == before {
            out.push(reference.to_string());
        }
    }
    out
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Resolve, and unless `ignore_missing` is set, fail on any reference that
/// did not resolve.
pub fn resolve_references<S: AsRef<str>>(
    registry: &ResolverRegistry,
    references: &[S],
    ignore_missing: bool,
) -> Result<(Vec<Runnable>, Vec<ReferenceResolution>)> {
    let expanded = expand_directories(references);
    let resolutions = registry.resolve(&expanded);

    let missing: Vec<String> = resolutions
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| match &r.info {
            Some(info) => format!("{} ({info})", r.reference),
            None => r.reference.clone(),
        })
        .collect();
    if !missing.is_empty() && !ignore_missing {
        return Err(AvocadoError::Resolution(format!(
            "could not resolve references: {}",
            missing.join(", ")
        )));
    }

    let runnables = resolutions
        .iter()
        .flat_map(|r| r.resolutions.iter().cloned())
        .collect();
    Ok((runnables, resolutions))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        priority: i32,
        fail: bool,
    }

    impl Resolver for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn accepts(&self, reference: &str) -> bool {
            reference.starts_with("x")
        }
        fn resolve(&self, reference: &str) -> Result<ReferenceResolution> {
            if self.fail {
                return Err(AvocadoError::Recipe("boom".into()));
            }
            Ok(ReferenceResolution::success(
                self.name,
                reference,
                vec![Runnable::new("noop", reference)],
            ))
        }
    }

    #[test]
    fn highest_priority_wins_and_ties_keep_order() {
        let mut reg = ResolverRegistry::new();
        reg.register(Box::new(Fixed { name: "low", priority: 1, fail: false }));
        reg.register(Box::new(Fixed { name: "first", priority: 5, fail: false }));
        reg.register(Box::new(Fixed { name: "second", priority: 5, fail: false }));
        assert_eq!(reg.names(), vec!["first", "second", "low"]);

        let res = reg.resolve_one("x1");
        assert_eq!(res.origin.as_deref(), Some("first"));
        assert_eq!(res.resolutions[0].origin(), Some("first"));
    }

    #[test]
    fn errors_do_not_abort_the_batch() {
        let mut reg = ResolverRegistry::new();
        reg.register(Box::new(Fixed { name: "bad", priority: 1, fail: true }));
        let out = reg.resolve(&["x1", "nope"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].result, ResolutionResult::Error);
        assert!(out[0].info.as_deref().unwrap().contains("boom"));
        assert_eq!(out[1].result, ResolutionResult::NotFound);
        assert!(out[1].resolutions.is_empty());
    }

    #[test]
    fn missing_references_fail_unless_ignored() {
        let reg = ResolverRegistry::with_builtins();
        let refs = ["noop:", "/definitely/not/here"];
        assert!(matches!(
            resolve_references(&reg, &refs, false),
            Err(AvocadoError::Resolution(_))
        ));
        let (runnables, resolutions) = resolve_references(&reg, &refs, true).unwrap();
        assert_eq!(runnables.len(), 1);
        assert_eq!(resolutions.len(), 2);
    }

    #[test]
    fn directories_expand_sorted_without_hidden_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b"), "").unwrap();
        std::fs::write(tmp.path().join("a"), "").unwrap();
        std::fs::write(tmp.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(tmp.path().join("empty")).unwrap();

        let root = tmp.path().to_string_lossy().into_owned();
        let out = expand_directories(&[root.clone()]);
        assert_eq!(out, vec![format!("{root}/a"), format!("{root}/b")]);

        let empty = format!("{root}/empty");
        assert_eq!(expand_directories(&[empty.clone()]), vec![empty]);
    }
}
