// Phase Registry
// Named phase definitions, built into phases and pipelines on demand

pub mod definition;
pub mod options;

pub use definition::{ImplementationFactory, PhaseDefinition, ID_OVERRIDE};
pub use options::{OptionDecl, OptionError, OptionKind, OptionSchema, PhaseOptions};

use crate::composition::{pipeline_with_loader, CompositionError};
use crate::config::PipelineConfig;
use crate::execution::StageLoader;
use crate::phase::Phase;

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building phases from the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no phase registered as '{0}'")]
    UnknownPhase(String),

    #[error("invalid options for phase '{phase}': {source}")]
    Option {
        phase: String,
        #[source]
        source: OptionError,
    },

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

/// Phase definitions by name
#[derive(Debug, Default)]
pub struct PhaseRegistry {
    definitions: BTreeMap<String, PhaseDefinition>,
    loader: StageLoader,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage loader handed to every pipeline this registry builds
    pub fn with_loader(mut self, loader: StageLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Register `definition` under `name`; the built phases carry that name.
    /// Replaces any earlier definition with the same name.
    pub fn register(&mut self, name: impl Into<String>, mut definition: PhaseDefinition) {
        let name = name.into();
        definition.info.name = name.clone();
        debug!(phase = %name, arity = %definition.info.arity, "phase registered");
        self.definitions.insert(name, definition);
    }

    pub fn get(&self, name: &str) -> Option<&PhaseDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    /// Build one phase by name
    pub fn build(
        &self,
        name: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Phase, RegistryError> {
        let definition = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPhase(name.to_string()))?;
        definition
            .build(overrides)
            .map_err(|source| RegistryError::Option {
                phase: name.to_string(),
                source,
            })
    }

    /// Build every entry of `config` and compose them into a pipeline phase
    pub fn build_pipeline(&self, config: &PipelineConfig) -> Result<Phase, RegistryError> {
        let mut phases = Vec::with_capacity(config.phases.len());
        for entry in &config.phases {
            let overrides = entry.overrides().map_err(|source| RegistryError::Option {
                phase: entry.phase.clone(),
                source,
            })?;
            phases.push(self.build(&entry.phase, &overrides)?);
        }
        debug!(pipeline = %config.name, phases = phases.len(), "building pipeline");
        Ok(pipeline_with_loader(phases, self.loader.clone())?)
    }
}
