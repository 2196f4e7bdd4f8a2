//! Generated response schema
//!
//! The generator returns raw JSON. [`ValidatedResponse::parse`] is the only
//! way to turn it into typed data: unknown fields, missing blocks and
//! semantic violations are all rejected, and every violation found is listed
//! in the error.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strata_storage::{Cardinality, Layer};
use thiserror::Error;

use super::consistency::Severity;
use crate::naming::normalize_name;

/// Response failed the schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} schema violation(s): {}", .details.len(), .details.join("; "))]
pub struct SchemaError {
    pub details: Vec<String>,
}

impl SchemaError {
    fn single(detail: impl Into<String>) -> Self {
        Self {
            details: vec![detail.into()],
        }
    }
}

/// Requested change for one element
///
/// `Upsert` (the default) creates or updates; only `Remove` is destructive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementAction {
    #[default]
    Upsert,
    Create,
    Update,
    Remove,
}

impl ElementAction {
    pub fn is_remove(&self) -> bool {
        matches!(self, ElementAction::Remove)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DesiredAttribute {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub conceptual_type: Option<String>,
    #[serde(default)]
    pub logical_type: Option<String>,
    #[serde(default)]
    pub physical_type: Option<String>,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub action: ElementAction,
}

impl DesiredAttribute {
    pub fn matches(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        normalize_name(&self.name) == wanted
            || self.aliases.iter().any(|a| normalize_name(a) == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DesiredEntity {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Vec<DesiredAttribute>,
    #[serde(default)]
    pub action: ElementAction,
}

impl DesiredEntity {
    /// Name or any alias matches `name` after normalization
    pub fn matches(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        normalize_name(&self.name) == wanted
            || self.aliases.iter().any(|a| normalize_name(a) == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DesiredRelationship {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub cardinality: Option<String>,
    #[serde(default)]
    pub source_attribute: Option<String>,
    #[serde(default)]
    pub target_attribute: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action: ElementAction,
}

/// Entities and relationships proposed for one layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LayerBlock {
    #[serde(default)]
    pub entities: Vec<DesiredEntity>,
    #[serde(default)]
    pub relationships: Vec<DesiredRelationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SqlBlock {
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub ddl: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResponseIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub entity: Option<String>,
}

/// Generated desired state that passed every check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValidatedResponse {
    pub summary: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub conceptual_model: LayerBlock,
    pub logical_model: LayerBlock,
    pub physical_model: LayerBlock,
    #[serde(default)]
    pub sql: SqlBlock,
    #[serde(default)]
    pub issues: Vec<ResponseIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidatedResponse {
    pub fn parse(raw: &str) -> Result<ValidatedResponse, SchemaError> {
        let response: ValidatedResponse =
            serde_json::from_str(raw.trim()).map_err(|e| SchemaError::single(e.to_string()))?;

        let details = response.violations();
        if details.is_empty() {
            Ok(response)
        } else {
            Err(SchemaError { details })
        }
    }

    pub fn block(&self, layer: Layer) -> &LayerBlock {
        match layer {
            Layer::Conceptual => &self.conceptual_model,
            Layer::Logical => &self.logical_model,
            Layer::Physical => &self.physical_model,
        }
    }

    fn violations(&self) -> Vec<String> {
        let mut details = Vec::new();

        if self.summary.trim().is_empty() {
            details.push("summary must not be empty".to_string());
        }

        for layer in Layer::ALL {
            let block = self.block(layer);
            let mut entity_names = HashSet::new();

            for (i, entity) in block.entities.iter().enumerate() {
                let key = normalize_name(&entity.name);
                if key.is_empty() {
                    details.push(format!("{}.entities[{}]: name must not be empty", layer, i));
                    continue;
                }
                if !entity_names.insert(key) {
                    details.push(format!(
                        "{}.entities[{}]: duplicate entity '{}'",
                        layer, i, entity.name
                    ));
                }

                let mut attribute_names = HashSet::new();
                for (j, attribute) in entity.attributes.iter().enumerate() {
                    let key = normalize_name(&attribute.name);
                    if key.is_empty() {
                        details.push(format!(
                            "{}.entities[{}].attributes[{}]: name must not be empty",
                            layer, i, j
                        ));
                    } else if !attribute_names.insert(key) {
                        details.push(format!(
                            "{}.{}: duplicate attribute '{}'",
                            layer, entity.name, attribute.name
                        ));
                    }
                }
            }

            for (i, relationship) in block.relationships.iter().enumerate() {
                if normalize_name(&relationship.source).is_empty()
                    || normalize_name(&relationship.target).is_empty()
                {
                    details.push(format!(
                        "{}.relationships[{}]: source and target are required",
                        layer, i
                    ));
                }
                if let Some(raw) = &relationship.cardinality {
                    if Cardinality::normalize(raw).is_none() {
                        details.push(format!(
                            "{}.relationships[{}]: unknown cardinality '{}'",
                            layer, i, raw
                        ));
                    }
                }
            }
        }

        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "summary": "Customer model",
            "conceptualModel": {
                "entities": [{
                    "name": "Customer",
                    "attributes": [{"name": "id", "dataType": "Number", "isPrimaryKey": true}]
                }]
            },
            "logicalModel": {"entities": []},
            "physicalModel": {"entities": [], "relationships": []}
        })
    }

    #[test]
    fn test_parse_minimal() {
        let response = ValidatedResponse::parse(&minimal().to_string()).unwrap();
        let customer = &response.block(Layer::Conceptual).entities[0];
        assert!(customer.matches("customer"));
        assert_eq!(customer.action, ElementAction::Upsert);
        assert!(customer.attributes[0].is_primary_key);
        assert!(response.issues.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut raw = minimal();
        raw["conceptualModel"]["entities"][0]["colour"] = json!("blue");
        let err = ValidatedResponse::parse(&raw.to_string()).unwrap_err();
        assert_eq!(err.details.len(), 1);
        assert!(err.details[0].contains("colour"));
    }

    #[test]
    fn test_missing_block_rejected() {
        let mut raw = minimal();
        raw.as_object_mut().unwrap().remove("logicalModel");
        assert!(ValidatedResponse::parse(&raw.to_string()).is_err());
    }

    #[test]
    fn test_semantic_violations_are_collected() {
        let mut raw = minimal();
        raw["logicalModel"]["entities"] = json!([{"name": "Order"}, {"name": "order"}]);
        raw["physicalModel"]["relationships"] =
            json!([{"source": "Order", "target": "Customer", "cardinality": "lots"}]);

        let err = ValidatedResponse::parse(&raw.to_string()).unwrap_err();
        assert_eq!(err.details.len(), 2);
        assert!(err.to_string().starts_with("2 schema violation(s)"));
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(ValidatedResponse::parse("Sure! Here is your model").is_err());
    }

    #[test]
    fn test_remove_action() {
        let mut raw = minimal();
        raw["conceptualModel"]["entities"][0]["action"] = json!("remove");
        let response = ValidatedResponse::parse(&raw.to_string()).unwrap();
        assert!(response.conceptual_model.entities[0].action.is_remove());
    }
}
