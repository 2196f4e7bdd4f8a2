//! Serialized view of a family handed to the generator
//!
//! Entity and attribute lists are capped; a capped list is flagged so the
//! generator (and the omission rule in layer sync) know it is incomplete.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strata_storage::{Layer, ModelId, ModelStore, ObjectId};

use crate::config::ReconcilerConfig;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::family::ModelFamily;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAttribute {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_type: Option<String>,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntity {
    #[serde(skip)]
    pub object_id: ObjectId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attributes: Vec<SnapshotAttribute>,
    pub attributes_truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRelationship {
    pub source: String,
    pub target: String,
    pub cardinality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSnapshot {
    pub layer: Layer,
    pub model_id: ModelId,
    pub model_name: String,
    pub entities: Vec<SnapshotEntity>,
    pub entities_truncated: bool,
    pub relationships: Vec<SnapshotRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub root_model_id: ModelId,
    pub layers: Vec<LayerSnapshot>,
}

impl ContextSnapshot {
    /// Snapshot every layer of `family`, honoring the configured caps
    pub async fn build(
        ctx: &mut SyncContext,
        store: &dyn ModelStore,
        family: &ModelFamily,
        config: &ReconcilerConfig,
    ) -> Result<Self> {
        let mut layers = Vec::new();

        for model in family.layer_models() {
            let mut objects = ctx.objects_in(store, model.id).await?;
            objects.sort_by_key(|o| o.id);

            let entities_truncated = objects.len() > config.max_entities_per_layer;
            objects.truncate(config.max_entities_per_layer);

            let mut entities = Vec::with_capacity(objects.len());
            let mut attribute_names = HashMap::new();
            for object in &objects {
                let mut attributes = ctx.attributes_of(store, object.id).await?;
                attributes.sort_by_key(|a| (a.order_index, a.id));
                for attribute in &attributes {
                    attribute_names.insert(attribute.id, attribute.name.clone());
                }

                let attributes_truncated = attributes.len() > config.max_attributes_per_entity;
                attributes.truncate(config.max_attributes_per_entity);

                entities.push(SnapshotEntity {
                    object_id: object.id,
                    name: object.name.clone(),
                    description: object.description.clone(),
                    attributes: attributes
                        .iter()
                        .map(|a| SnapshotAttribute {
                            name: a.name.clone(),
                            data_type: a.data_type.clone(),
                            layer_type: match model.layer {
                                Layer::Conceptual => a.conceptual_type.clone(),
                                Layer::Logical => a.logical_type.clone(),
                                Layer::Physical => a.physical_type.clone(),
                            },
                            nullable: a.nullable,
                            is_primary_key: a.is_primary_key,
                            is_foreign_key: a.is_foreign_key,
                        })
                        .collect(),
                    attributes_truncated,
                });
            }

            let names: HashMap<ObjectId, &str> =
                objects.iter().map(|o| (o.id, o.name.as_str())).collect();
            let relationships = store
                .get_relationships_by_model(model.id)
                .await?
                .into_iter()
                .filter_map(|r| {
                    let source = names.get(&r.source_object_id)?;
                    let target = names.get(&r.target_object_id)?;
                    let (source_attribute, target_attribute) = match r.level.attribute_ids() {
                        Some((s, t)) => (attribute_names.get(&s).cloned(), attribute_names.get(&t).cloned()),
                        None => (None, None),
                    };
                    Some(SnapshotRelationship {
                        source: source.to_string(),
                        target: target.to_string(),
                        cardinality: r.relationship_type.to_string(),
                        source_attribute,
                        target_attribute,
                    })
                })
                .collect();

            layers.push(LayerSnapshot {
                layer: model.layer,
                model_id: model.id,
                model_name: model.name.clone(),
                entities,
                entities_truncated,
                relationships,
            });
        }

        Ok(Self {
            root_model_id: family.root_id(),
            layers,
        })
    }

    pub fn layer(&self, layer: Layer) -> Option<&LayerSnapshot> {
        self.layers.iter().find(|l| l.layer == layer)
    }

    /// True when the generator saw every attribute of `object_id`
    pub fn attributes_complete(&self, object_id: ObjectId) -> bool {
        self.layers
            .iter()
            .flat_map(|l| &l.entities)
            .any(|e| e.object_id == object_id && !e.attributes_truncated)
    }

    pub fn is_truncated(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.entities_truncated || l.entities.iter().any(|e| e.attributes_truncated))
    }

    /// Object ids the generator saw
    pub fn object_ids(&self) -> HashSet<ObjectId> {
        self.layers
            .iter()
            .flat_map(|l| &l.entities)
            .map(|e| e.object_id)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SyncError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{FamilyResolver, FamilySeed};
    use std::sync::Arc;
    use strata_storage::{InMemoryModelStore, NewAttribute, NewDataObject};

    #[tokio::test]
    async fn test_snapshot_caps_and_flags() {
        let store = Arc::new(InMemoryModelStore::new());
        let resolver = FamilyResolver::new(store.clone());
        let mut ctx = SyncContext::new();
        let family = resolver
            .ensure_family(&mut ctx, FamilySeed::Name("Shop".to_string()))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for name in ["Customer", "Order", "Invoice"] {
            let object = store
                .create_data_object(NewDataObject::new(family.root_id(), name))
                .await
                .unwrap();
            ids.push(object.id);
        }
        for name in ["id", "email", "phone"] {
            let mut attribute = NewAttribute::new(ids[0], name);
            attribute.data_type = Some("Text".to_string());
            store.create_attribute(attribute).await.unwrap();
        }

        let config = ReconcilerConfig {
            max_entities_per_layer: 2,
            max_attributes_per_entity: 2,
            ..Default::default()
        };
        let mut ctx = SyncContext::new();
        let snapshot = ContextSnapshot::build(&mut ctx, store.as_ref(), &family, &config)
            .await
            .unwrap();

        let conceptual = snapshot.layer(Layer::Conceptual).unwrap();
        assert!(conceptual.entities_truncated);
        assert_eq!(conceptual.entities.len(), 2);
        assert!(conceptual.entities[0].attributes_truncated);
        assert_eq!(conceptual.entities[0].attributes.len(), 2);

        assert!(snapshot.is_truncated());
        assert!(!snapshot.attributes_complete(ids[0]));
        assert!(snapshot.attributes_complete(ids[1]));
        // Cut by the entity cap
        assert!(!snapshot.attributes_complete(ids[2]));

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"entitiesTruncated\": true"));
        assert!(!json.contains("objectId"));
    }
}
