// src/resolver/builtin.rs

//! Built-in resolvers.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::errors::{AvocadoError, Result};
use crate::resolver::{ReferenceResolution, Resolver};
use crate::runnable::Runnable;
use crate::runner::SUPPORTED_KINDS;

/// `*.json` files holding one runnable recipe or a list of them.
pub struct RecipeResolver;

impl Resolver for RecipeResolver {
    fn name(&self) -> &str {
        "recipe"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn accepts(&self, reference: &str) -> bool {
        reference.ends_with(".json") && Path::new(reference).is_file()
    }

    fn resolve(&self, reference: &str) -> Result<ReferenceResolution> {
        let text = fs::read_to_string(reference)?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| AvocadoError::Recipe(e.to_string()))?;

        let items = match value {
            Value::Array(items) => items,
            single => vec![single],
        };
        let runnables = items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<Runnable>(item)
                    .map_err(|e| AvocadoError::Recipe(format!("{reference}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ReferenceResolution::success(self.name(), reference, runnables))
    }
}

/// `<kind>:<uri>` for kinds the built-in runners know, e.g. `noop:` or
/// `exec:/bin/true`.
pub struct KindUriResolver;

impl KindUriResolver {
    fn split(reference: &str) -> Option<(&str, &str)> {
        let (kind, uri) = reference.split_once(':')?;
        SUPPORTED_KINDS.contains(&kind).then_some((kind, uri))
    }
}

impl Resolver for KindUriResolver {
    fn name(&self) -> &str {
        "kind-uri"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn accepts(&self, reference: &str) -> bool {
        Self::split(reference).is_some()
    }

    fn resolve(&self, reference: &str) -> Result<ReferenceResolution> {
        let (kind, uri) = Self::split(reference)
            .ok_or_else(|| AvocadoError::Resolution(format!("not a kind:uri reference: {reference}")))?;
        let uri = match kind {
            "exec" | "exec-test" if !uri.is_empty() => absolute_if_exists(uri),
            _ => uri.to_string(),
        };
        Ok(ReferenceResolution::success(
            self.name(),
            reference,
            vec![Runnable::new(kind, uri)],
        ))
    }
}

/// Executable files run as `exec-test`: exit status decides the outcome.
pub struct ExecTestResolver;

impl Resolver for ExecTestResolver {
    fn name(&self) -> &str {
        "exec-test"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn accepts(&self, reference: &str) -> bool {
        is_executable_file(Path::new(reference))
    }

    fn resolve(&self, reference: &str) -> Result<ReferenceResolution> {
        let uri = std::path::absolute(reference)?;
        Ok(ReferenceResolution::success(
            self.name(),
            reference,
            vec![Runnable::new("exec-test", uri.to_string_lossy())],
        ))
    }
}

fn absolute_if_exists(uri: &str) -> String {
    let path = Path::new(uri);
    if path.exists() {
        if let Ok(abs) = std::path::absolute(path) {
            return abs.to_string_lossy().into_owned();
        }
    }
    uri.to_string()
}

#[cfg(unix)]
pub fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolutionResult, ResolverRegistry};

    #[test]
    fn kind_uri_only_for_known_kinds() {
        assert!(KindUriResolver.accepts("noop:"));
        assert!(KindUriResolver.accepts("exec-test:/bin/true"));
        assert!(!KindUriResolver.accepts("python-unittest:x"));
        let res = KindUriResolver.resolve("noop:").unwrap();
        assert_eq!(res.resolutions[0].kind(), "noop");
        assert_eq!(res.resolutions[0].uri(), None);
    }

    #[test]
    fn recipe_files_single_and_list() {
        let tmp = tempfile::tempdir().unwrap();
        let one = tmp.path().join("one.json");
        fs::write(&one, r#"{"kind": "noop", "uri": "a"}"#).unwrap();
        let many = tmp.path().join("many.json");
        fs::write(&many, r#"[{"kind": "noop"}, {"kind": "exec", "uri": "/bin/true"}]"#).unwrap();
        let bad = tmp.path().join("bad.json");
        fs::write(&bad, r#"{"kind": "noop", "nope": 1}"#).unwrap();

        let reg = ResolverRegistry::with_builtins();
        let out = reg.resolve(&[
            one.to_string_lossy().into_owned(),
            many.to_string_lossy().into_owned(),
            bad.to_string_lossy().into_owned(),
        ]);
        assert_eq!(out[0].resolutions.len(), 1);
        assert_eq!(out[0].origin.as_deref(), Some("recipe"));
        assert_eq!(out[1].resolutions.len(), 2);
        assert_eq!(out[2].result, ResolutionResult::Error);
    }

    #[cfg(unix)]
    #[test]
    fn executables_become_exec_tests() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("pass.sh");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let plain = tmp.path().join("data.txt");
        fs::write(&plain, "x").unwrap();

        let reg = ResolverRegistry::with_builtins();
        let ok = reg.resolve_one(script.to_str().unwrap());
        assert_eq!(ok.result, ResolutionResult::Success);
        assert_eq!(ok.resolutions[0].kind(), "exec-test");
        assert_eq!(ok.resolutions[0].uri(), script.to_str());

        let missing = reg.resolve_one(plain.to_str().unwrap());
        assert_eq!(missing.result, ResolutionResult::NotFound);
    }
}
