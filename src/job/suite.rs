// src/job/suite.rs

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::resolver::{ReferenceResolution, ResolverRegistry, resolve_references};
use crate::runnable::{Runnable, TagFilter};
use crate::types::ExecutionOrder;
use crate::variants::VariantSet;

/// Ordered runnables, the variants to cross them with and the policy the
/// tasks of the suite run under.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    pub runnables: Vec<Runnable>,
    pub variants: VariantSet,
    pub execution_order: ExecutionOrder,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    /// How each reference was resolved, for `list`/`resolve` style output.
    pub resolutions: Vec<ReferenceResolution>,
}

impl TestSuite {
    /// Suite holding `runnables` as-is, with the policy of `config`.
    pub fn new(name: impl Into<String>, runnables: Vec<Runnable>, config: &EngineConfig) -> Self {
        Self {
            name: name.into(),
            runnables,
            variants: VariantSet::default(),
            execution_order: config.run.execution_order,
            timeout: config.task_timeout(),
            dry_run: config.run.dry_run,
            resolutions: Vec::new(),
        }
    }

    /// Resolve `run.references`, apply the tag filter and load variants.
    ///
    /// Relative references are looked up under `base_dir` first when one is
    /// given (replayed jobs resolve from the source job's directory).
    pub fn from_config(
        name: impl Into<String>,
        config: &EngineConfig,
        registry: &ResolverRegistry,
        base_dir: Option<&Path>,
    ) -> Result<Self> {
        let name = name.into();
        let references: Vec<String> = config
            .run
            .references
            .iter()
            .map(|r| rebase_reference(r, base_dir))
            .collect();

        let (mut runnables, resolutions) =
            resolve_references(registry, &references, config.run.ignore_missing_references)?;

        if !config.run.tags.is_empty() {
            let filter = TagFilter::parse(
                &config.run.tags,
                config.run.tags_include_empty,
                config.run.tags_include_empty_key,
            );
            let before = runnables.len();
            runnables = filter.filter(runnables);
            debug!(suite = %name, before, after = runnables.len(), "tag filter applied");
        }

        let variants = match &config.run.variants_file {
            Some(path) => VariantSet::load(path)?,
            None => VariantSet::from_parameters(&config.run.test_parameters),
        };

        info!(
            suite = %name,
            references = references.len(),
            tests = runnables.len(),
            variants = variants.len(),
            "suite resolved"
        );

        Ok(Self {
            variants,
            resolutions,
            ..Self::new(name, runnables, config)
        })
    }

    pub fn with_variants(mut self, variants: VariantSet) -> Self {
        self.variants = variants;
        self
    }

    /// Number of tasks the suite expands to.
    pub fn size(&self) -> usize {
        self.runnables.len() * self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

fn rebase_reference(reference: &str, base_dir: Option<&Path>) -> String {
    let Some(base) = base_dir else {
        return reference.to_string();
    };
    let path = Path::new(reference);
    if path.is_absolute() || path.exists() {
        return reference.to_string();
    }
    let candidate = base.join(path);
    if candidate.exists() {
        candidate.to_string_lossy().into_owned()
    } else {
        reference.to_string()
    }
}
