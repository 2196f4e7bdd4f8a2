//! Cascade orchestration
//!
//! Entry point for object creation and deletion. Creation writes the object in
//! its home layer, replicates it into every descendant layer when cascading,
//! then synchronizes the relationships supplied with it. Every insert is
//! recorded for compensation; a failure after the first write surfaces as
//! [`SyncError::PartialCascade`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_storage::{
    Attribute, AttributeId, Cardinality, DataModel, DataObject, Layer, ModelId, ModelStore,
    ObjectId, RelationshipLevel,
};
use tracing::{debug, info, warn};

use crate::compensation::settle_result;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::family::FamilyResolver;
use crate::locks::FamilyLocks;
use crate::naming::names_match;
use crate::relationships::{RelationshipEdit, RelationshipSynchronizer, SyncOutcome, SyncScope};
use crate::replicator::{
    AttributeInput, LayerConfig, LayerReplicator, ObjectInput, ReplicatedObject,
    ReplicationRequest,
};

/// Reference to an existing object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectRef {
    Id(ObjectId),
    /// Object of the home model, matched by normalized name
    Name(String),
}

/// Relationship supplied with a new object
///
/// The new object is the source. A `N:1` cardinality is stored as `1:N`
/// with source and target swapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInput {
    pub target: ObjectRef,
    #[serde(default)]
    pub cardinality: Option<String>,
    /// Attribute name on the new object
    #[serde(default)]
    pub source_attribute: Option<String>,
    /// Attribute name on the target object
    #[serde(default)]
    pub target_attribute: Option<String>,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RelationshipInput {
    pub fn to(target: ObjectRef) -> Self {
        Self {
            target,
            cardinality: None,
            source_attribute: None,
            target_attribute: None,
            source_handle: None,
            target_handle: None,
            name: None,
            description: None,
        }
    }

    pub fn with_cardinality(mut self, cardinality: impl Into<String>) -> Self {
        self.cardinality = Some(cardinality.into());
        self
    }

    pub fn on_attributes(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_attribute = Some(source.into());
        self.target_attribute = Some(target.into());
        self
    }

    fn normalized_cardinality(&self) -> Result<(Cardinality, bool)> {
        match &self.cardinality {
            None => Ok((Cardinality::default(), false)),
            Some(raw) => Cardinality::normalize(raw)
                .ok_or_else(|| SyncError::invalid_request(format!("unknown cardinality '{}'", raw))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateObjectRequest {
    /// Home model
    pub model_id: ModelId,
    pub object: ObjectInput,
    #[serde(default)]
    pub attributes: Vec<AttributeInput>,
    #[serde(default)]
    pub relationships: Vec<RelationshipInput>,
    /// `None` uses `cascade.default_cascade`
    #[serde(default)]
    pub cascade: Option<bool>,
    #[serde(default)]
    pub layer_configs: BTreeMap<Layer, LayerConfig>,
}

impl CreateObjectRequest {
    pub fn new(model_id: ModelId, object: ObjectInput) -> Self {
        Self {
            model_id,
            object,
            attributes: Vec::new(),
            relationships: Vec::new(),
            cascade: None,
            layer_configs: BTreeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<AttributeInput>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipInput) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_cascade(mut self, cascade: bool) -> Self {
        self.cascade = Some(cascade);
        self
    }

    pub fn with_layer_config(mut self, layer: Layer, config: LayerConfig) -> Self {
        self.layer_configs.insert(layer, config);
        self
    }
}

/// Rows written per layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerObjects {
    pub conceptual: Option<ReplicatedObject>,
    pub logical: Option<ReplicatedObject>,
    pub physical: Option<ReplicatedObject>,
}

impl LayerObjects {
    pub fn get(&self, layer: Layer) -> Option<&ReplicatedObject> {
        match layer {
            Layer::Conceptual => self.conceptual.as_ref(),
            Layer::Logical => self.logical.as_ref(),
            Layer::Physical => self.physical.as_ref(),
        }
    }

    fn set(&mut self, layer: Layer, created: ReplicatedObject) {
        let slot = match layer {
            Layer::Conceptual => &mut self.conceptual,
            Layer::Logical => &mut self.logical,
            Layer::Physical => &mut self.physical,
        };
        *slot = Some(created);
    }

    fn model_ids(&self) -> Vec<ModelId> {
        Layer::ALL
            .iter()
            .filter_map(|l| self.get(*l))
            .map(|r| r.object.model_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeResult {
    pub primary_object: DataObject,
    pub cascade_performed: bool,
    pub layers: LayerObjects,
    pub relationships: Vec<SyncOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Also delete every copy of this object when it is the origin of its chain
    pub include_replicas: bool,
}

/// Rows removed by a deletion cascade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub objects: Vec<ObjectId>,
    pub model_objects: usize,
    pub relationships: usize,
    pub canonical_relationships: usize,
    pub attributes: usize,
}

/// Relationship input after validation, before any write
struct PreparedRelationship<'a> {
    input: &'a RelationshipInput,
    cardinality: Cardinality,
    flip: bool,
}

pub struct CascadeOrchestrator {
    store: Arc<dyn ModelStore>,
    resolver: FamilyResolver,
    replicator: LayerReplicator,
    synchronizer: RelationshipSynchronizer,
    locks: Arc<FamilyLocks>,
    config: SyncConfig,
}

impl CascadeOrchestrator {
    pub fn new(store: Arc<dyn ModelStore>, locks: Arc<FamilyLocks>, config: SyncConfig) -> Self {
        Self {
            resolver: FamilyResolver::new(store.clone()),
            replicator: LayerReplicator::new(store.clone()),
            synchronizer: RelationshipSynchronizer::new(
                store.clone(),
                locks.clone(),
                config.relationships.clone(),
                config.cascade.rollback_on_failure,
            ),
            store,
            locks,
            config,
        }
    }

    pub async fn create_object_with_cascade(
        &self,
        request: CreateObjectRequest,
    ) -> Result<CascadeResult> {
        let store = self.store.as_ref();
        let mut ctx = SyncContext::new();

        if request.object.name.trim().is_empty() {
            return Err(SyncError::invalid_request("object name must not be empty"));
        }
        let prepared = request
            .relationships
            .iter()
            .map(|input| -> Result<PreparedRelationship> {
                let (cardinality, flip) = input.normalized_cardinality()?;
                Ok(PreparedRelationship {
                    input,
                    cardinality,
                    flip,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let home = ctx.model(store, request.model_id).await?;
        let root_id = self.resolver.root_of(&mut ctx, home.id).await?;
        let _guard = self.locks.acquire(root_id).await;

        let mut step = format!("create object in model {}", home.id);
        let result = self
            .create_in(&mut ctx, &home, &request, &prepared, &mut step)
            .await;
        settle_result(
            &mut ctx.compensation,
            store,
            self.config.cascade.rollback_on_failure,
            &step,
            result,
        )
        .await
    }

    async fn create_in(
        &self,
        ctx: &mut SyncContext,
        home: &DataModel,
        request: &CreateObjectRequest,
        prepared: &[PreparedRelationship<'_>],
        step: &mut String,
    ) -> Result<CascadeResult> {
        let home_config = request
            .layer_configs
            .get(&home.layer)
            .copied()
            .unwrap_or_default();

        let primary = self
            .replicator
            .place(
                ctx,
                home,
                &request.object,
                None,
                &request.attributes,
                &home_config,
            )
            .await?;
        info!(
            "Created object {} '{}' in {} model {}",
            primary.object.id, primary.object.name, home.layer, home.id
        );

        let mut layers = LayerObjects::default();
        layers.set(home.layer, primary.clone());

        let cascade = request.cascade.unwrap_or(self.config.cascade.default_cascade);
        let mut cascade_performed = false;

        if cascade && !home.layer.descendants().is_empty() {
            let descendants = self.resolver.descendant_models(ctx, home.id).await?;
            let mut previous = primary.clone();

            for layer in home.layer.descendants() {
                let Some(target_model) = descendants.iter().find(|m| m.layer == *layer) else {
                    warn!("No {} model below model {}; not replicating", layer, home.id);
                    continue;
                };
                *step = format!("replicate into {} model {}", layer, target_model.id);

                // Build from the nearest replica so the type chain reads its types
                let attributes: Vec<AttributeInput> = previous
                    .attributes
                    .iter()
                    .map(AttributeInput::from_attribute)
                    .collect();
                let layer_config = home_config.merge(
                    &request
                        .layer_configs
                        .get(layer)
                        .copied()
                        .unwrap_or_default(),
                );

                let replica = self
                    .replicator
                    .replicate(
                        ctx,
                        ReplicationRequest {
                            layer: *layer,
                            origin_model: home,
                            origin_object: &primary.object,
                            target_model,
                            object: request.object.clone(),
                            attributes,
                            layer_config,
                        },
                    )
                    .await?;
                layers.set(*layer, replica.clone());
                previous = replica;
                cascade_performed = true;
            }
        }

        let scope = SyncScope::only(layers.model_ids());
        let mut relationships = Vec::with_capacity(prepared.len());

        for (index, relationship) in prepared.iter().enumerate() {
            *step = format!("sync relationship {} of object {}", index, primary.object.id);
            let edit = self
                .edit_for(ctx, home, &primary, relationship)
                .await?;
            let outcome = self.synchronizer.sync_in(ctx, &edit, &scope).await?;
            debug!(
                "Relationship {} stored in {} layers, skipped in {}",
                index,
                outcome.relationships.len(),
                outcome.skipped.len()
            );
            relationships.push(outcome);
        }

        Ok(CascadeResult {
            primary_object: primary.object,
            cascade_performed,
            layers,
            relationships,
        })
    }

    /// Resolve target object and named attributes into an edit
    async fn edit_for(
        &self,
        ctx: &mut SyncContext,
        home: &DataModel,
        primary: &ReplicatedObject,
        prepared: &PreparedRelationship<'_>,
    ) -> Result<RelationshipEdit> {
        let store = self.store.as_ref();
        let input = prepared.input;

        let target = match &input.target {
            ObjectRef::Id(id) => ctx.object(store, *id).await?,
            ObjectRef::Name(name) => ctx
                .objects_in(store, home.id)
                .await?
                .into_iter()
                .find(|o| o.id != primary.object.id && names_match(&o.name, name))
                .ok_or_else(|| SyncError::ObjectNameNotFound {
                    model_id: home.id,
                    name: name.clone(),
                })?,
        };

        let source_attribute = find_named(&primary.attributes, input.source_attribute.as_deref());
        let target_attributes = ctx.attributes_of(store, target.id).await?;
        let target_attribute = find_named(&target_attributes, input.target_attribute.as_deref());

        let (mut source_id, mut target_id) = (primary.object.id, target.id);
        let (mut source_attr, mut target_attr) = (source_attribute, target_attribute);
        if prepared.flip {
            std::mem::swap(&mut source_id, &mut target_id);
            std::mem::swap(&mut source_attr, &mut target_attr);
        }

        let level = RelationshipLevel::resolve(source_attr, target_attr).kind();
        Ok(RelationshipEdit {
            source_object_id: source_id,
            target_object_id: target_id,
            relationship_type: prepared.cardinality,
            level,
            source_attribute_id: source_attr,
            target_attribute_id: target_attr,
            source_handle: input.source_handle.clone(),
            target_handle: input.target_handle.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            canonical_id: None,
        })
    }

    /// Delete an object and everything attached to it
    ///
    /// Order: placement rows and per-layer relationships, canonical
    /// relationships, attributes, the object itself.
    pub async fn delete_object_cascade(
        &self,
        object_id: ObjectId,
        options: DeleteOptions,
    ) -> Result<DeletionReport> {
        let mut ctx = SyncContext::new();
        let object = ctx.object(self.store.as_ref(), object_id).await?;
        let root_id = self.resolver.root_of(&mut ctx, object.model_id).await?;
        let _guard = self.locks.acquire(root_id).await;

        self.delete_in(&mut ctx, &object, options).await
    }

    /// Unlocked deletion; the caller holds the family lock
    pub async fn delete_in(
        &self,
        ctx: &mut SyncContext,
        object: &DataObject,
        options: DeleteOptions,
    ) -> Result<DeletionReport> {
        let store = self.store.as_ref();
        let mut report = DeletionReport::default();

        // Copies and anchors hang off the origin of the copy chain
        let identity = object.identity();
        let is_origin = identity == object.id;

        if options.include_replicas && is_origin {
            for replica in store.get_replicas_of(identity).await? {
                self.delete_single(ctx, &replica, &mut report).await?;
            }
        }
        self.delete_single(ctx, object, &mut report).await?;

        if is_origin {
            for canonical in store.list_canonical_relationships().await? {
                if canonical.touches_object(identity) {
                    store.delete_canonical_relationship(canonical.id).await?;
                    report.canonical_relationships += 1;
                }
            }
        }

        info!(
            "Deleted {} objects ({} attributes, {} relationships, {} anchors)",
            report.objects.len(),
            report.attributes,
            report.relationships,
            report.canonical_relationships
        );
        Ok(report)
    }

    async fn delete_single(
        &self,
        ctx: &mut SyncContext,
        object: &DataObject,
        report: &mut DeletionReport,
    ) -> Result<()> {
        let store = self.store.as_ref();

        for placement in store.get_model_objects_by_object(object.id).await? {
            store.delete_data_model_object(placement.id).await?;
            report.model_objects += 1;
        }
        for relationship in store.get_relationships_by_object(object.id).await? {
            store.delete_relationship(relationship.id).await?;
            report.relationships += 1;
        }
        for attribute in store.get_attributes_by_object(object.id).await? {
            store.delete_attribute(attribute.id).await?;
            ctx.forget_attribute(attribute.id);
            report.attributes += 1;
        }
        store.delete_data_object(object.id).await?;
        ctx.forget_object(object.id);
        report.objects.push(object.id);

        debug!("Deleted object {} from model {}", object.id, object.model_id);
        Ok(())
    }
}

fn find_named(attributes: &[Attribute], name: Option<&str>) -> Option<AttributeId> {
    let name = name?;
    attributes
        .iter()
        .find(|a| names_match(&a.name, name))
        .map(|a| a.id)
}
