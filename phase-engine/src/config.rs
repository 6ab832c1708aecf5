// Engine Configuration
// YAML document describing driver limits, tracing and named pipelines

use crate::execution::{DriverConfig, StageLoader};
use crate::registry::{OptionError, ID_OVERRIDE};
use crate::trace;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when loading engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read engine config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse engine config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Engine config not found at: {0}")]
    NotFound(String),
}

/// Trace switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Record spans and flows for every get/put
    pub enabled: bool,
}

/// One phase of a configured pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Registered phase name
    pub phase: String,

    /// Fixed phase id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Option overrides; maps and lists are passed on as JSON literals
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl PhaseConfig {
    /// Option overrides in the textual form the option schema parses
    pub fn overrides(&self) -> Result<BTreeMap<String, String>, OptionError> {
        let mut overrides = BTreeMap::new();
        for (name, value) in &self.options {
            overrides.insert(name.clone(), override_text(name, value)?);
        }
        if let Some(id) = &self.id {
            overrides.insert(ID_OVERRIDE.to_string(), id.clone());
        }
        Ok(overrides)
    }
}

fn override_text(name: &str, value: &serde_yaml::Value) -> Result<String, OptionError> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok("null".to_string()),
        other => serde_json::to_string(other).map_err(|e| OptionError::MalformedLiteral {
            name: name.to_string(),
            message: e.to_string(),
        }),
    }
}

/// A named, ordered list of registered phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub driver: DriverConfig,
    pub trace: TraceConfig,
    pub pipelines: Vec<PipelineConfig>,
}

impl FromStr for EngineConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: EngineConfig = serde_yaml::from_str(s)?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Parse engine configuration from a file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse engine configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        content.parse()
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|pipeline| pipeline.name == name)
    }

    /// Switch tracing to the configured state and build a matching loader
    pub fn apply(&self) -> StageLoader {
        trace::set_enabled(self.trace.enabled);
        StageLoader::new().with_config(self.driver.clone())
    }
}
