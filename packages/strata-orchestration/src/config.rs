//! Engine configuration
//!
//! Defaults work out of the box. Teams override them with a versioned YAML
//! file:
//!
//! ```yaml
//! version: 1
//! cascade:
//!   rollback_on_failure: false
//! reconciler:
//!   max_entities_per_layer: 80
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    /// Missing version field in YAML
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: 1")]
    UnsupportedVersion { found: u32 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub fn range(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Cascade orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CascadeConfig {
    /// Cascade used when a request does not say
    pub default_cascade: bool,
    /// Replay the compensation log when a multi-step call fails
    pub rollback_on_failure: bool,
    /// Maximum rows per storage batch call during population
    pub batch_size: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            default_cascade: true,
            rollback_on_failure: true,
            batch_size: 200,
        }
    }
}

/// Relationship synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelationshipConfig {
    /// Copy a missing layer-local attribute from its global counterpart
    pub create_missing_attributes: bool,
    /// Match objects by normalized name when provenance does not match
    pub name_fallback: bool,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            create_missing_attributes: true,
            name_fallback: true,
        }
    }
}

/// Desired-state reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// Entities serialized per layer into the generation context
    pub max_entities_per_layer: usize,
    /// Attributes serialized per entity into the generation context
    pub max_attributes_per_entity: usize,
    /// Used when a run does not name a target database
    pub default_target_database: String,
    /// Replaces the built-in system prompt
    pub system_prompt: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_entities_per_layer: 40,
            max_attributes_per_entity: 30,
            default_target_database: "postgresql".to_string(),
            system_prompt: None,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub cascade: CascadeConfig,
    pub relationships: RelationshipConfig,
    pub reconciler: ReconcilerConfig,
}

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,
    #[serde(default)]
    cascade: CascadeConfig,
    #[serde(default)]
    relationships: RelationshipConfig,
    #[serde(default)]
    reconciler: ReconcilerConfig,
}

impl SyncConfig {
    /// Load and validate a YAML configuration file
    pub fn from_yaml(path: &str) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        match file.version {
            None => return Err(ConfigError::MissingVersion),
            Some(1) => {}
            Some(found) => return Err(ConfigError::UnsupportedVersion { found }),
        }

        let config = Self {
            cascade: file.cascade,
            relationships: file.relationships,
            reconciler: file.reconciler,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            cascade: self.cascade.clone(),
            relationships: self.relationships.clone(),
            reconciler: self.reconciler.clone(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(1..=10_000).contains(&self.cascade.batch_size) {
            return Err(ConfigError::range(
                "cascade.batch_size",
                self.cascade.batch_size,
                1,
                10_000,
            ));
        }
        if !(1..=500).contains(&self.reconciler.max_entities_per_layer) {
            return Err(ConfigError::range(
                "reconciler.max_entities_per_layer",
                self.reconciler.max_entities_per_layer,
                1,
                500,
            ));
        }
        if !(1..=500).contains(&self.reconciler.max_attributes_per_entity) {
            return Err(ConfigError::range(
                "reconciler.max_attributes_per_entity",
                self.reconciler.max_attributes_per_entity,
                1,
                500,
            ));
        }
        Ok(())
    }
}
