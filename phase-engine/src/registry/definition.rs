// Phase Definitions
// Declarative phase description plus implementation factory and option schema

use crate::phase::{Implementation, Phase, PhaseInfo};
use crate::registry::options::{OptionError, OptionSchema, PhaseOptions};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Override key reserved for the phase id
pub const ID_OVERRIDE: &str = "id";

/// Builds a fresh implementation from resolved options
pub type ImplementationFactory = Arc<dyn Fn(&PhaseOptions) -> Implementation + Send + Sync>;

/// Everything needed to build phases of one kind
#[derive(Clone)]
pub struct PhaseDefinition {
    pub info: PhaseInfo,
    pub schema: OptionSchema,
    factory: ImplementationFactory,
}

impl PhaseDefinition {
    pub fn new<F>(info: PhaseInfo, factory: F) -> Self
    where
        F: Fn(&PhaseOptions) -> Implementation + Send + Sync + 'static,
    {
        Self {
            info,
            schema: OptionSchema::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn with_schema(mut self, schema: OptionSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Build a phase, merging `overrides` onto the declared defaults.
    ///
    /// The `id` override sets the phase id instead of an option. Every build
    /// gets its own type variables and implementation instance.
    pub fn build(&self, overrides: &BTreeMap<String, String>) -> Result<Phase, OptionError> {
        let mut overrides = overrides.clone();
        let mut info = self.info.instantiate();
        if let Some(id) = overrides.remove(ID_OVERRIDE) {
            info = info.with_id(id);
        }

        let options = self.schema.merge(&overrides)?;
        let implementation = (self.factory)(&options);
        Ok(Phase::with_options(info, implementation, options))
    }
}

impl fmt::Debug for PhaseDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseDefinition")
            .field("info", &self.info)
            .field("schema", &self.schema)
            .finish()
    }
}
