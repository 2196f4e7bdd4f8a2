//! Layer replication
//!
//! Copies one object and its attributes into another layer model. The copy
//! carries a [`Provenance`] back to the origin object and never shares an id
//! with it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_storage::{
    Attribute, AttributeId, DataModel, DataObject, Layer, ModelObject, ModelStore, NewAttribute,
    NewDataObject, NewModelObject, ObjectId, Position, Provenance,
};
use tracing::{debug, info};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};

/// Per-layer placement overrides
///
/// Every field is optional; `None` keeps the base value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub position: Option<Position>,
    pub target_system_id: Option<i64>,
    pub is_visible: Option<bool>,
}

impl LayerConfig {
    /// Right-biased merge: fields set on `other` win
    pub fn merge(&self, other: &LayerConfig) -> LayerConfig {
        LayerConfig {
            position: other.position.or(self.position),
            target_system_id: other.target_system_id.or(self.target_system_id),
            is_visible: other.is_visible.or(self.is_visible),
        }
    }

    fn apply(&self, payload: &mut NewDataObject) {
        if let Some(position) = self.position {
            payload.position = Some(position);
        }
        if let Some(target_system_id) = self.target_system_id {
            payload.target_system_id = Some(target_system_id);
        }
        if let Some(is_visible) = self.is_visible {
            payload.is_visible = is_visible;
        }
    }
}

/// Base object fields shared by every layer copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub domain_id: Option<i64>,
    #[serde(default)]
    pub data_area_id: Option<i64>,
    #[serde(default)]
    pub target_system_id: Option<i64>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ObjectInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            object_type: None,
            domain_id: None,
            data_area_id: None,
            target_system_id: None,
            position: None,
            is_visible: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Base fields of an existing object (used when copying it elsewhere)
    pub fn from_object(object: &DataObject) -> Self {
        Self {
            name: object.name.clone(),
            description: object.description.clone(),
            object_type: object.object_type.clone(),
            domain_id: object.domain_id,
            data_area_id: object.data_area_id,
            target_system_id: object.target_system_id,
            position: object.position,
            is_visible: Some(object.is_visible),
            metadata: object.metadata.clone(),
        }
    }

    /// Insert payload for `model`, with `config` merged over the base fields
    pub fn to_payload(
        &self,
        model: &DataModel,
        provenance: Option<Provenance>,
        config: &LayerConfig,
    ) -> NewDataObject {
        let mut payload = NewDataObject {
            model_id: model.id,
            name: self.name.clone(),
            description: self.description.clone(),
            object_type: self.object_type.clone(),
            domain_id: self.domain_id.or(model.domain_id),
            data_area_id: self.data_area_id.or(model.data_area_id),
            target_system_id: self.target_system_id.or(model.target_system_id),
            position: self.position,
            is_visible: self.is_visible.unwrap_or(true),
            provenance,
            metadata: self.metadata.clone(),
        };
        config.apply(&mut payload);
        payload
    }
}

/// Attribute as supplied by a caller
///
/// `nullable` defaults to `!is_primary_key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeInput {
    pub name: String,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub conceptual_type: Option<String>,
    pub logical_type: Option<String>,
    pub physical_type: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: Option<bool>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub order_index: Option<i32>,
    pub origin_attribute_id: Option<AttributeId>,
}

impl AttributeInput {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type.into()),
            ..Default::default()
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn foreign_key(mut self) -> Self {
        self.is_foreign_key = true;
        self
    }

    /// Input copying every field of a stored attribute, linked back to it
    pub fn from_attribute(attribute: &Attribute) -> Self {
        Self {
            name: attribute.name.clone(),
            description: attribute.description.clone(),
            data_type: attribute.data_type.clone(),
            conceptual_type: attribute.conceptual_type.clone(),
            logical_type: attribute.logical_type.clone(),
            physical_type: attribute.physical_type.clone(),
            length: attribute.length,
            precision: attribute.precision,
            scale: attribute.scale,
            nullable: Some(attribute.nullable),
            is_primary_key: attribute.is_primary_key,
            is_foreign_key: attribute.is_foreign_key,
            order_index: Some(attribute.order_index),
            origin_attribute_id: Some(attribute.origin_attribute_id.unwrap_or(attribute.id)),
        }
    }

    /// Insert payload with inferred type projections
    pub fn to_payload(&self, object_id: ObjectId, position: usize) -> NewAttribute {
        let types = TypeProjections::infer(
            self.conceptual_type.as_deref(),
            self.logical_type.as_deref(),
            self.physical_type.as_deref(),
            self.data_type.as_deref(),
        );

        NewAttribute {
            object_id,
            name: self.name.clone(),
            description: self.description.clone(),
            data_type: self.data_type.clone(),
            conceptual_type: types.conceptual,
            logical_type: types.logical,
            physical_type: types.physical,
            length: self.length,
            precision: self.precision,
            scale: self.scale,
            nullable: self.nullable.unwrap_or(!self.is_primary_key),
            is_primary_key: self.is_primary_key,
            is_foreign_key: self.is_foreign_key,
            order_index: self.order_index.unwrap_or(position as i32),
            origin_attribute_id: self.origin_attribute_id,
        }
    }
}

/// The three per-layer type strings of an attribute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeProjections {
    pub conceptual: Option<String>,
    pub logical: Option<String>,
    pub physical: Option<String>,
}

impl TypeProjections {
    /// Fill absent projections with the first non-null of
    /// conceptual, logical, physical, raw data type (in that order)
    pub fn infer(
        conceptual: Option<&str>,
        logical: Option<&str>,
        physical: Option<&str>,
        data_type: Option<&str>,
    ) -> Self {
        let fallback = present(conceptual)
            .or(present(logical))
            .or(present(physical))
            .or(present(data_type))
            .map(str::to_string);

        Self {
            conceptual: present(conceptual).map(str::to_string).or(fallback.clone()),
            logical: present(logical).map(str::to_string).or(fallback.clone()),
            physical: present(physical).map(str::to_string).or(fallback),
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// One replication call
#[derive(Debug, Clone)]
pub struct ReplicationRequest<'a> {
    /// Layer written into
    pub layer: Layer,
    /// Model owning the origin object
    pub origin_model: &'a DataModel,
    pub origin_object: &'a DataObject,
    pub target_model: &'a DataModel,
    pub object: ObjectInput,
    pub attributes: Vec<AttributeInput>,
    pub layer_config: LayerConfig,
}

/// Rows written by one replication or home-layer creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedObject {
    pub object: DataObject,
    pub model_object: ModelObject,
    pub attributes: Vec<Attribute>,
}

pub struct LayerReplicator {
    store: Arc<dyn ModelStore>,
}

impl LayerReplicator {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    /// Copy an object into `request.target_model`
    ///
    /// Provenance follows the origin's own provenance when it has one, so a
    /// copy of a copy still points at the first object.
    pub async fn replicate(
        &self,
        ctx: &mut SyncContext,
        request: ReplicationRequest<'_>,
    ) -> Result<ReplicatedObject> {
        if request.target_model.layer != request.layer {
            return Err(SyncError::invalid_request(format!(
                "model {} is a {} model, not {}",
                request.target_model.id, request.target_model.layer, request.layer
            )));
        }

        let provenance = match request.origin_object.provenance {
            Some(origin) => Provenance {
                layer: request.layer,
                ..origin
            },
            None => Provenance {
                origin_object_id: request.origin_object.id,
                origin_model_id: request.origin_model.id,
                layer: request.layer,
            },
        };

        let created = self
            .place(
                ctx,
                request.target_model,
                &request.object,
                Some(provenance),
                &request.attributes,
                &request.layer_config,
            )
            .await?;

        info!(
            "Replicated object {} into {} model {} as {} ({} attributes)",
            provenance.origin_object_id,
            request.layer,
            request.target_model.id,
            created.object.id,
            created.attributes.len()
        );
        Ok(created)
    }

    /// Write object, placement row and attributes into one model
    pub async fn place(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        object: &ObjectInput,
        provenance: Option<Provenance>,
        attributes: &[AttributeInput],
        layer_config: &LayerConfig,
    ) -> Result<ReplicatedObject> {
        let store = self.store.as_ref();

        let payload = object.to_payload(model, provenance, layer_config);
        let created = ctx.create_object(store, payload).await?;

        let model_object = ctx
            .create_model_object(store, placement_for(model, &created))
            .await?;

        let payloads: Vec<NewAttribute> = attributes
            .iter()
            .enumerate()
            .map(|(i, input)| input.to_payload(created.id, i))
            .collect();
        let attributes = ctx.create_attributes_batch(store, payloads).await?;

        debug!(
            "Placed object {} in model {} with {} attributes",
            created.id,
            model.id,
            attributes.len()
        );

        Ok(ReplicatedObject {
            object: created,
            model_object,
            attributes,
        })
    }
}

/// Placement row mirroring an object's layer config
pub(crate) fn placement_for(model: &DataModel, object: &DataObject) -> NewModelObject {
    let mut placement = NewModelObject::new(model.id, object.id);
    placement.position = object.position;
    placement.target_system_id = object.target_system_id;
    placement.is_visible = object.is_visible;
    placement
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_storage::{InMemoryModelStore, NewDataModel};

    #[test]
    fn test_type_inference_chain() {
        let types = TypeProjections::infer(None, Some("VARCHAR(255)"), None, Some("Text"));
        assert_eq!(
            types,
            TypeProjections {
                conceptual: Some("VARCHAR(255)".to_string()),
                logical: Some("VARCHAR(255)".to_string()),
                physical: Some("VARCHAR(255)".to_string()),
            }
        );

        let types = TypeProjections::infer(Some("Number"), None, Some("BIGINT"), Some("int"));
        assert_eq!(types.logical.as_deref(), Some("Number"));
        assert_eq!(types.physical.as_deref(), Some("BIGINT"));

        let types = TypeProjections::infer(None, None, None, Some("Text"));
        assert_eq!(types.physical.as_deref(), Some("Text"));

        assert_eq!(TypeProjections::infer(None, Some(" "), None, None), TypeProjections::default());
    }

    #[test]
    fn test_layer_config_right_biased_merge() {
        let base = LayerConfig {
            position: Some(Position::new(1.0, 2.0)),
            target_system_id: Some(7),
            is_visible: None,
        };
        let overrides = LayerConfig {
            position: Some(Position::new(5.0, 5.0)),
            target_system_id: None,
            is_visible: Some(false),
        };

        let merged = base.merge(&overrides);
        assert_eq!(merged.position, Some(Position::new(5.0, 5.0)));
        assert_eq!(merged.target_system_id, Some(7));
        assert_eq!(merged.is_visible, Some(false));
    }

    #[test]
    fn test_attribute_input_nullable_default() {
        let pk = AttributeInput::new("id", "Number").primary_key().to_payload(1, 0);
        assert!(!pk.nullable);

        let plain = AttributeInput::new("email", "Text").to_payload(1, 3);
        assert!(plain.nullable);
        assert_eq!(plain.order_index, 3);

        let mut explicit = AttributeInput::new("code", "Text").primary_key();
        explicit.nullable = Some(true);
        assert!(explicit.to_payload(1, 0).nullable);
    }

    #[tokio::test]
    async fn test_replicate_sets_provenance_and_config() {
        let store = Arc::new(InMemoryModelStore::new());
        let conceptual = store
            .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
            .await
            .unwrap();
        let logical = store
            .create_data_model(NewDataModel::new("Sales Logical", Layer::Logical).with_parent(conceptual.id))
            .await
            .unwrap();
        let customer = store
            .create_data_object(NewDataObject::new(conceptual.id, "Customer"))
            .await
            .unwrap();

        let replicator = LayerReplicator::new(store.clone());
        let mut ctx = SyncContext::new();
        let replica = replicator
            .replicate(
                &mut ctx,
                ReplicationRequest {
                    layer: Layer::Logical,
                    origin_model: &conceptual,
                    origin_object: &customer,
                    target_model: &logical,
                    object: ObjectInput::new("Customer"),
                    attributes: vec![AttributeInput::new("id", "Number").primary_key()],
                    layer_config: LayerConfig {
                        position: Some(Position::new(40.0, 80.0)),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();

        let provenance = replica.object.provenance.unwrap();
        assert_eq!(provenance.origin_object_id, customer.id);
        assert_eq!(provenance.origin_model_id, conceptual.id);
        assert_eq!(provenance.layer, Layer::Logical);
        assert_eq!(replica.model_object.position, Some(Position::new(40.0, 80.0)));
        assert_eq!(replica.attributes.len(), 1);
        assert_eq!(ctx.compensation.len(), 3);
    }

    #[tokio::test]
    async fn test_replicate_rejects_layer_mismatch() {
        let store = Arc::new(InMemoryModelStore::new());
        let conceptual = store
            .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
            .await
            .unwrap();
        let customer = store
            .create_data_object(NewDataObject::new(conceptual.id, "Customer"))
            .await
            .unwrap();

        let replicator = LayerReplicator::new(store.clone());
        let mut ctx = SyncContext::new();
        let result = replicator
            .replicate(
                &mut ctx,
                ReplicationRequest {
                    layer: Layer::Physical,
                    origin_model: &conceptual,
                    origin_object: &customer,
                    target_model: &conceptual,
                    object: ObjectInput::new("Customer"),
                    attributes: vec![],
                    layer_config: LayerConfig::default(),
                },
            )
            .await;
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }
}
