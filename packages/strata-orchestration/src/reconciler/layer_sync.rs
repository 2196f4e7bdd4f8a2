//! Applying a validated desired state to a family
//!
//! Entities and attributes are synchronized one layer at a time, conceptual
//! first, so logical and physical creations can point their provenance at a
//! conceptual object created earlier in the same run. Relationships are
//! merged across the three blocks and applied last through the relationship
//! synchronizer.
//!
//! Every change becomes a [`DiffEntry`]. A destructive change is applied only
//! when the run allows drops; otherwise it is recorded as skipped and nothing
//! is deleted.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_storage::{
    Attribute, AttributePatch, Cardinality, DataModel, DataObject, DataObjectPatch, Layer,
    ModelStore, Provenance, Relationship, RelationshipId,
};
use tracing::{debug, info};

use super::consistency::{Issue, Severity};
use super::schema::{DesiredAttribute, DesiredEntity, LayerBlock, ValidatedResponse};
use super::snapshot::ContextSnapshot;
use crate::cascade::{CascadeOrchestrator, DeleteOptions};
use crate::context::SyncContext;
use crate::error::Result;
use crate::family::ModelFamily;
use crate::naming::{names_match, normalize_name};
use crate::relationships::{RelationshipEdit, RelationshipSynchronizer, SyncScope};
use crate::replicator::{AttributeInput, LayerConfig, LayerReplicator, ObjectInput, TypeProjections};

const DROP_NOT_ALLOWED: &str = "destructive changes are not allowed for this run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    CreateEntity,
    UpdateEntity,
    RemoveEntity,
    CreateAttribute,
    UpdateAttribute,
    RemoveAttribute,
    CreateRelationship,
    UpdateRelationship,
    RemoveRelationship,
}

impl DiffAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffAction::CreateEntity => "create_entity",
            DiffAction::UpdateEntity => "update_entity",
            DiffAction::RemoveEntity => "remove_entity",
            DiffAction::CreateAttribute => "create_attribute",
            DiffAction::UpdateAttribute => "update_attribute",
            DiffAction::RemoveAttribute => "remove_attribute",
            DiffAction::CreateRelationship => "create_relationship",
            DiffAction::UpdateRelationship => "update_relationship",
            DiffAction::RemoveRelationship => "remove_relationship",
        }
    }

    /// Deletes data when applied
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            DiffAction::RemoveEntity | DiffAction::RemoveAttribute | DiffAction::RemoveRelationship
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Applied,
    /// Destructive change withheld because drops were not allowed
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub action: DiffAction,
    pub layer: Layer,
    /// `Entity`, `Entity.attribute` or `Source -> Target`
    pub target: String,
    pub status: DiffStatus,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DiffEntry {
    pub fn new(action: DiffAction, layer: Layer, target: impl Into<String>, status: DiffStatus) -> Self {
        Self {
            action,
            layer,
            target: target.into(),
            status,
            detail: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn applied(action: DiffAction, layer: Layer, target: impl Into<String>) -> Self {
        Self::new(action, layer, target, DiffStatus::Applied)
    }

    pub fn skipped(action: DiffAction, layer: Layer, target: impl Into<String>) -> Self {
        Self::new(action, layer, target, DiffStatus::Skipped).with_detail(DROP_NOT_ALLOWED)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_applied(&self) -> bool {
        self.status == DiffStatus::Applied
    }

    /// String field of `metadata`
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Diff and advisories collected while applying
#[derive(Debug, Default)]
pub struct SyncReport {
    pub diff: Vec<DiffEntry>,
    pub issues: Vec<Issue>,
}

/// One edge after merging the three layer blocks
///
/// `N:1` inputs are already flipped. The first block naming an attribute,
/// a cardinality, a name or a description wins that field.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRelationship {
    pub source: String,
    pub target: String,
    pub cardinality: Option<Cardinality>,
    pub source_attribute: Option<String>,
    pub target_attribute: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub remove: bool,
    /// Blocks mentioning the edge
    pub layers: Vec<Layer>,
}

impl MergedRelationship {
    pub fn label(&self) -> String {
        format!("{} -> {}", self.source, self.target)
    }
}

pub fn merge_relationships(response: &ValidatedResponse) -> Vec<MergedRelationship> {
    let mut merged: Vec<MergedRelationship> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for layer in Layer::ALL {
        for relationship in &response.block(layer).relationships {
            let normalized = relationship
                .cardinality
                .as_deref()
                .and_then(Cardinality::normalize);
            let flip = normalized.map(|(_, flip)| flip).unwrap_or(false);
            let cardinality = normalized.map(|(c, _)| c);

            let (source, target, source_attribute, target_attribute) = if flip {
                (
                    &relationship.target,
                    &relationship.source,
                    &relationship.target_attribute,
                    &relationship.source_attribute,
                )
            } else {
                (
                    &relationship.source,
                    &relationship.target,
                    &relationship.source_attribute,
                    &relationship.target_attribute,
                )
            };

            let key = (normalize_name(source), normalize_name(target));
            match index.get(&key) {
                Some(&i) => {
                    let entry = &mut merged[i];
                    if entry.source_attribute.is_none() || entry.target_attribute.is_none() {
                        if let (Some(s), Some(t)) = (source_attribute, target_attribute) {
                            entry.source_attribute = Some(s.clone());
                            entry.target_attribute = Some(t.clone());
                        }
                    }
                    entry.cardinality = entry.cardinality.or(cardinality);
                    entry.name = entry.name.take().or_else(|| relationship.name.clone());
                    entry.description = entry
                        .description
                        .take()
                        .or_else(|| relationship.description.clone());
                    entry.remove |= relationship.action.is_remove();
                    if !entry.layers.contains(&layer) {
                        entry.layers.push(layer);
                    }
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push(MergedRelationship {
                        source: source.clone(),
                        target: target.clone(),
                        cardinality,
                        source_attribute: source_attribute.clone(),
                        target_attribute: target_attribute.clone(),
                        name: relationship.name.clone(),
                        description: relationship.description.clone(),
                        remove: relationship.action.is_remove(),
                        layers: vec![layer],
                    });
                }
            }
        }
    }

    merged
}

/// Resolved ends of a merged edge
struct EdgeEnds {
    source: DataObject,
    target: DataObject,
    attributes: Option<(Attribute, Attribute)>,
}

pub struct LayerSync<'a> {
    pub store: &'a dyn ModelStore,
    pub replicator: &'a LayerReplicator,
    pub cascade: &'a CascadeOrchestrator,
    pub synchronizer: &'a RelationshipSynchronizer,
    pub snapshot: &'a ContextSnapshot,
    pub allow_drop: bool,
}

impl<'a> LayerSync<'a> {
    /// Entities and attributes of one layer block
    pub async fn apply_layer(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        layer: Layer,
        block: &LayerBlock,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(model) = family.layer(layer).cloned() else {
            report.issues.push(Issue {
                layer: Some(layer),
                ..Issue::new(
                    Severity::Warning,
                    format!("Family {} has no {} model", family.root_id(), layer),
                )
            });
            return Ok(());
        };

        // Re-read so this layer sees everything earlier layers wrote
        ctx.invalidate_model(model.id);

        for entity in &block.entities {
            let existing = ctx
                .objects_in(self.store, model.id)
                .await?
                .into_iter()
                .find(|o| entity.matches(&o.name));

            match (existing, entity.action.is_remove()) {
                (Some(object), true) => self.remove_entity(ctx, &model, &object, report).await?,
                (None, true) => report.issues.push(Issue {
                    layer: Some(layer),
                    entity: Some(entity.name.clone()),
                    ..Issue::new(
                        Severity::Info,
                        format!("{} entity '{}' marked for removal does not exist", layer, entity.name),
                    )
                }),
                (Some(object), false) => {
                    self.update_entity(ctx, &model, &object, entity, report)
                        .await?
                }
                (None, false) => self.create_entity(ctx, family, &model, entity, report).await?,
            }
        }

        debug!(
            "Synchronized {} {} entities into model {}",
            block.entities.len(),
            layer,
            model.id
        );
        Ok(())
    }

    async fn create_entity(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        model: &DataModel,
        entity: &DesiredEntity,
        report: &mut SyncReport,
    ) -> Result<()> {
        let origin = if model.layer == Layer::Conceptual {
            None
        } else {
            ctx.objects_in(self.store, family.conceptual.id)
                .await?
                .into_iter()
                .find(|o| entity.matches(&o.name))
        };
        let origin_attributes = match &origin {
            Some(origin) => ctx.attributes_of(self.store, origin.id).await?,
            None => Vec::new(),
        };
        let provenance = origin.as_ref().map(|o| provenance_for(o, model.layer));

        let inputs: Vec<AttributeInput> = entity
            .attributes
            .iter()
            .filter(|a| !a.action.is_remove())
            .map(|desired| {
                let mut input = attribute_input(desired);
                input.origin_attribute_id = origin_attributes
                    .iter()
                    .find(|o| desired.matches(&o.name))
                    .map(|o| o.origin_attribute_id.unwrap_or(o.id));
                input
            })
            .collect();

        let mut object = ObjectInput::new(&entity.name);
        object.description = entity.description.clone();

        let created = self
            .replicator
            .place(ctx, model, &object, provenance, &inputs, &LayerConfig::default())
            .await?;

        let attribute_names: Vec<&str> = created.attributes.iter().map(|a| a.name.as_str()).collect();
        report.diff.push(
            DiffEntry::applied(DiffAction::CreateEntity, model.layer, &entity.name).with_metadata(json!({
                "objectId": created.object.id,
                "entity": entity.name,
                "attributes": attribute_names,
                "originObjectId": provenance.map(|p| p.origin_object_id),
            })),
        );
        Ok(())
    }

    async fn update_entity(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        object: &DataObject,
        entity: &DesiredEntity,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut patch = DataObjectPatch::default();
        let mut changes = Vec::new();

        // Matched through an alias: adopt the desired name
        if !names_match(&object.name, &entity.name) {
            patch.name = Some(entity.name.clone());
            changes.push("name");
        }
        if let Some(description) = changed(entity.description.as_deref(), object.description.as_deref()) {
            patch.description = Some(description);
            changes.push("description");
        }

        let object = if patch.is_empty() {
            object.clone()
        } else {
            let updated = self.store.update_data_object(object.id, patch).await?;
            ctx.replace_object(&updated);
            report.diff.push(
                DiffEntry::applied(DiffAction::UpdateEntity, model.layer, &updated.name).with_metadata(
                    json!({
                        "objectId": updated.id,
                        "entity": updated.name,
                        "previousName": object.name,
                        "changes": changes,
                    }),
                ),
            );
            updated
        };

        self.sync_attributes(ctx, model, &object, entity, report)
            .await
    }

    async fn sync_attributes(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        object: &DataObject,
        entity: &DesiredEntity,
        report: &mut SyncReport,
    ) -> Result<()> {
        let existing = ctx.attributes_of(self.store, object.id).await?;
        let mut matched = HashSet::new();
        let mut next_order = existing
            .iter()
            .map(|a| a.order_index)
            .max()
            .map_or(0, |max| max + 1);

        for desired in &entity.attributes {
            let current = existing.iter().find(|a| desired.matches(&a.name));
            if let Some(current) = current {
                matched.insert(current.id);
            }

            match (current, desired.action.is_remove()) {
                (Some(current), true) => {
                    self.remove_attribute(ctx, model, object, current, "marked for removal", report)
                        .await?
                }
                (None, true) => {}
                (Some(current), false) => {
                    self.update_attribute(ctx, model, object, current, desired, report)
                        .await?
                }
                (None, false) => {
                    let mut input = attribute_input(desired);
                    input.order_index = Some(next_order);
                    next_order += 1;

                    let created = ctx
                        .create_attribute(self.store, input.to_payload(object.id, 0))
                        .await?;
                    report.diff.push(
                        DiffEntry::applied(
                            DiffAction::CreateAttribute,
                            model.layer,
                            format!("{}.{}", object.name, created.name),
                        )
                        .with_metadata(json!({
                            "entity": object.name,
                            "attribute": created.name,
                            "attributeId": created.id,
                            "dataType": created.data_type,
                        })),
                    );
                }
            }
        }

        // Omission counts as removal only when the generator saw the full list
        if !entity.attributes.is_empty() && self.snapshot.attributes_complete(object.id) {
            for attribute in existing.iter().filter(|a| !matched.contains(&a.id)) {
                self.remove_attribute(
                    ctx,
                    model,
                    object,
                    attribute,
                    "missing from the desired attribute list",
                    report,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn update_attribute(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        object: &DataObject,
        current: &Attribute,
        desired: &DesiredAttribute,
        report: &mut SyncReport,
    ) -> Result<()> {
        let types = TypeProjections::infer(
            desired.conceptual_type.as_deref(),
            desired.logical_type.as_deref(),
            desired.physical_type.as_deref(),
            desired.data_type.as_deref(),
        );

        let mut patch = AttributePatch::default();
        let mut changes = Vec::new();

        if !names_match(&current.name, &desired.name) {
            patch.name = Some(desired.name.clone());
            changes.push("name");
        }
        if let Some(v) = changed(desired.description.as_deref(), current.description.as_deref()) {
            patch.description = Some(v);
            changes.push("description");
        }
        if let Some(v) = changed(desired.data_type.as_deref(), current.data_type.as_deref()) {
            patch.data_type = Some(v);
            changes.push("data_type");
        }
        if let Some(v) = changed(types.conceptual.as_deref(), current.conceptual_type.as_deref()) {
            patch.conceptual_type = Some(v);
            changes.push("conceptual_type");
        }
        if let Some(v) = changed(types.logical.as_deref(), current.logical_type.as_deref()) {
            patch.logical_type = Some(v);
            changes.push("logical_type");
        }
        if let Some(v) = changed(types.physical.as_deref(), current.physical_type.as_deref()) {
            patch.physical_type = Some(v);
            changes.push("physical_type");
        }
        if let Some(length) = desired.length.filter(|l| current.length != Some(*l)) {
            patch.length = Some(length);
            changes.push("length");
        }

        // A primary key is never nullable
        let nullable = desired
            .nullable
            .or(if desired.is_primary_key { Some(false) } else { None });
        if let Some(nullable) = nullable.filter(|n| *n != current.nullable) {
            patch.nullable = Some(nullable);
            changes.push("nullable");
        }
        if desired.is_primary_key != current.is_primary_key {
            patch.is_primary_key = Some(desired.is_primary_key);
            changes.push("is_primary_key");
        }
        if desired.is_foreign_key != current.is_foreign_key {
            patch.is_foreign_key = Some(desired.is_foreign_key);
            changes.push("is_foreign_key");
        }

        if patch.is_empty() {
            return Ok(());
        }

        let updated = self.store.update_attribute(current.id, patch).await?;
        ctx.replace_attribute(&updated);
        report.diff.push(
            DiffEntry::applied(
                DiffAction::UpdateAttribute,
                model.layer,
                format!("{}.{}", object.name, updated.name),
            )
            .with_metadata(json!({
                "entity": object.name,
                "attribute": updated.name,
                "attributeId": updated.id,
                "changes": changes,
            })),
        );
        Ok(())
    }

    async fn remove_entity(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        object: &DataObject,
        report: &mut SyncReport,
    ) -> Result<()> {
        if !self.allow_drop {
            report.diff.push(
                DiffEntry::skipped(DiffAction::RemoveEntity, model.layer, &object.name)
                    .with_metadata(json!({"objectId": object.id, "entity": object.name})),
            );
            return Ok(());
        }

        let deletion = self
            .cascade
            .delete_in(ctx, object, DeleteOptions::default())
            .await?;
        report.diff.push(
            DiffEntry::applied(DiffAction::RemoveEntity, model.layer, &object.name).with_metadata(json!({
                "objectId": object.id,
                "entity": object.name,
                "attributes": deletion.attributes,
                "relationships": deletion.relationships,
            })),
        );
        Ok(())
    }

    async fn remove_attribute(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        object: &DataObject,
        attribute: &Attribute,
        reason: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let target = format!("{}.{}", object.name, attribute.name);
        let metadata = json!({
            "entity": object.name,
            "attribute": attribute.name,
            "attributeId": attribute.id,
            "reason": reason,
        });

        if !self.allow_drop {
            report.diff.push(
                DiffEntry::skipped(DiffAction::RemoveAttribute, model.layer, target).with_metadata(metadata),
            );
            return Ok(());
        }

        let mut relationships = 0;
        for relationship in self.store.get_relationships_by_object(object.id).await? {
            if relationship.level.touches_attribute(attribute.id) {
                self.store.delete_relationship(relationship.id).await?;
                relationships += 1;
            }
        }
        self.store.delete_attribute(attribute.id).await?;
        ctx.forget_attribute(attribute.id);

        let detail = if relationships > 0 {
            format!("{} ({} relationships removed)", reason, relationships)
        } else {
            reason.to_string()
        };
        report.diff.push(
            DiffEntry::applied(DiffAction::RemoveAttribute, model.layer, target)
                .with_detail(detail)
                .with_metadata(metadata),
        );
        Ok(())
    }

    /// Relationships of all three blocks, merged per edge
    pub async fn apply_relationships(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        response: &ValidatedResponse,
        report: &mut SyncReport,
    ) -> Result<()> {
        let merged = merge_relationships(response);

        for relationship in &merged {
            let label = relationship.label();
            let Some(ends) = self.resolve_ends(ctx, family, relationship).await? else {
                report.issues.push(Issue {
                    entity: Some(relationship.source.clone()),
                    ..Issue::new(
                        Severity::Warning,
                        format!("Relationship {} references an unknown entity", label),
                    )
                });
                continue;
            };

            if relationship.source_attribute.is_some() && ends.attributes.is_none() {
                report.issues.push(Issue {
                    entity: Some(relationship.source.clone()),
                    ..Issue::new(
                        Severity::Warning,
                        format!(
                            "Relationship {} names attributes that exist in no layer; only the conceptual layer can hold it",
                            label
                        ),
                    )
                });
            }

            let mut edit = match &ends.attributes {
                Some((source_attribute, target_attribute)) => RelationshipEdit::attribute_level(
                    ends.source.id,
                    source_attribute.id,
                    ends.target.id,
                    target_attribute.id,
                ),
                None => RelationshipEdit::object_level(ends.source.id, ends.target.id),
            }
            .with_type(relationship.cardinality.unwrap_or_default());
            edit.name = relationship.name.clone();
            edit.description = relationship.description.clone();

            if relationship.remove {
                self.remove_relationship(ctx, family, relationship, &edit, report)
                    .await?;
            } else {
                self.upsert_relationship(ctx, family, relationship, &edit, report)
                    .await?;
            }
        }

        info!("Applied {} merged relationships", merged.len());
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        relationship: &MergedRelationship,
        edit: &RelationshipEdit,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut before: HashMap<RelationshipId, Relationship> = HashMap::new();
        for model in family.layer_models() {
            for row in self.store.get_relationships_by_model(model.id).await? {
                before.insert(row.id, row);
            }
        }

        let outcome = self
            .synchronizer
            .sync_in(ctx, edit, &SyncScope::all().in_family(family.root_id()))
            .await?;

        let label = relationship.label();
        for row in outcome.relationships.values() {
            let action = match before.get(&row.id) {
                None => DiffAction::CreateRelationship,
                Some(previous) if previous != row => DiffAction::UpdateRelationship,
                Some(_) => continue,
            };
            report.diff.push(
                DiffEntry::applied(action, row.layer, &label)
                    .with_metadata(relationship_metadata(relationship, row)),
            );
        }

        for skipped in &outcome.skipped {
            report.issues.push(Issue {
                layer: Some(skipped.layer),
                entity: Some(relationship.source.clone()),
                ..Issue::new(
                    Severity::Info,
                    format!(
                        "Relationship {} not stored in the {} layer: {}",
                        label, skipped.layer, skipped.reason
                    ),
                )
            });
        }
        Ok(())
    }

    async fn remove_relationship(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        relationship: &MergedRelationship,
        edit: &RelationshipEdit,
        report: &mut SyncReport,
    ) -> Result<()> {
        let label = relationship.label();

        if !self.allow_drop {
            for layer in &relationship.layers {
                report.diff.push(
                    DiffEntry::skipped(DiffAction::RemoveRelationship, *layer, &label).with_metadata(json!({
                        "source": relationship.source,
                        "target": relationship.target,
                    })),
                );
            }
            return Ok(());
        }

        let removal = self.synchronizer.remove_in(ctx, edit).await?;
        if removal.removed_count() == 0 {
            report.issues.push(Issue {
                entity: Some(relationship.source.clone()),
                ..Issue::new(
                    Severity::Info,
                    format!("Relationship {} marked for removal does not exist", label),
                )
            });
            return Ok(());
        }

        for (model_id, ids) in &removal.removed {
            let Some(model) = family.layer_models().into_iter().find(|m| m.id == *model_id) else {
                continue;
            };
            report.diff.push(
                DiffEntry::applied(DiffAction::RemoveRelationship, model.layer, &label).with_metadata(json!({
                    "source": relationship.source,
                    "target": relationship.target,
                    "sourceAttribute": relationship.source_attribute,
                    "targetAttribute": relationship.target_attribute,
                    "relationshipIds": ids,
                    "canonicalRemoved": removal.canonical_removed,
                })),
            );
        }
        Ok(())
    }

    /// Ends of `relationship`, taken from the first layer (conceptual
    /// first) holding both entities and, when named, both attributes
    ///
    /// Falls back to the first layer holding both entities.
    async fn resolve_ends(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        relationship: &MergedRelationship,
    ) -> Result<Option<EdgeEnds>> {
        let mut fallback: Option<(DataObject, DataObject)> = None;

        for model in family.layer_models() {
            let objects = ctx.objects_in(self.store, model.id).await?;
            let source = objects
                .iter()
                .find(|o| names_match(&o.name, &relationship.source))
                .cloned();
            let target = objects
                .iter()
                .find(|o| names_match(&o.name, &relationship.target))
                .cloned();
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };

            let (Some(source_name), Some(target_name)) =
                (&relationship.source_attribute, &relationship.target_attribute)
            else {
                return Ok(Some(EdgeEnds {
                    source,
                    target,
                    attributes: None,
                }));
            };

            let source_attribute = ctx
                .attributes_of(self.store, source.id)
                .await?
                .into_iter()
                .find(|a| names_match(&a.name, source_name));
            let target_attribute = ctx
                .attributes_of(self.store, target.id)
                .await?
                .into_iter()
                .find(|a| names_match(&a.name, target_name));

            if let (Some(sa), Some(ta)) = (source_attribute, target_attribute) {
                return Ok(Some(EdgeEnds {
                    source,
                    target,
                    attributes: Some((sa, ta)),
                }));
            }
            if fallback.is_none() {
                fallback = Some((source, target));
            }
        }

        Ok(fallback.map(|(source, target)| EdgeEnds {
            source,
            target,
            attributes: None,
        }))
    }
}

fn relationship_metadata(relationship: &MergedRelationship, row: &Relationship) -> serde_json::Value {
    json!({
        "relationshipId": row.id,
        "canonicalId": row.canonical_id,
        "cardinality": row.relationship_type.as_str(),
        "level": row.level.kind().as_str(),
        "source": relationship.source,
        "target": relationship.target,
        "sourceAttribute": relationship.source_attribute,
        "targetAttribute": relationship.target_attribute,
    })
}

fn provenance_for(origin: &DataObject, layer: Layer) -> Provenance {
    match origin.provenance {
        Some(p) => Provenance { layer, ..p },
        None => Provenance {
            origin_object_id: origin.id,
            origin_model_id: origin.model_id,
            layer,
        },
    }
}

fn attribute_input(desired: &DesiredAttribute) -> AttributeInput {
    AttributeInput {
        name: desired.name.clone(),
        description: desired.description.clone(),
        data_type: desired.data_type.clone(),
        conceptual_type: desired.conceptual_type.clone(),
        logical_type: desired.logical_type.clone(),
        physical_type: desired.physical_type.clone(),
        length: desired.length,
        nullable: desired.nullable,
        is_primary_key: desired.is_primary_key,
        is_foreign_key: desired.is_foreign_key,
        ..Default::default()
    }
}

/// `desired` when present and different from `current`
fn changed(desired: Option<&str>, current: Option<&str>) -> Option<String> {
    let desired = desired.filter(|d| !d.trim().is_empty())?;
    if current == Some(desired) {
        None
    } else {
        Some(desired.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn response(relationships: serde_json::Value) -> ValidatedResponse {
        ValidatedResponse::parse(
            &json!({
                "summary": "Shop",
                "conceptualModel": {"relationships": relationships["conceptual"]},
                "logicalModel": {"relationships": relationships["logical"]},
                "physicalModel": {"relationships": relationships["physical"]}
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_flips_and_combines_blocks() {
        let response = response(json!({
            "conceptual": [{"source": "Customer", "target": "Order", "cardinality": "1:N"}],
            "logical": [{
                "source": "order", "target": "customer", "cardinality": "N:1",
                "sourceAttribute": "customer_id", "targetAttribute": "id"
            }],
            "physical": [{"source": "Product", "target": "Order", "cardinality": "M:N"}]
        }));

        let merged = merge_relationships(&response);
        assert_eq!(merged.len(), 2);

        let customer_order = &merged[0];
        assert_eq!(customer_order.label(), "Customer -> Order");
        assert_eq!(customer_order.cardinality, Some(Cardinality::OneToMany));
        assert_eq!(customer_order.source_attribute.as_deref(), Some("id"));
        assert_eq!(customer_order.target_attribute.as_deref(), Some("customer_id"));
        assert_eq!(customer_order.layers, vec![Layer::Conceptual, Layer::Logical]);
        assert!(!customer_order.remove);

        assert_eq!(merged[1].cardinality, Some(Cardinality::ManyToMany));
        assert_eq!(merged[1].layers, vec![Layer::Physical]);
    }

    #[test]
    fn test_merge_remove_marker() {
        let response = response(json!({
            "conceptual": [{"source": "A", "target": "B"}],
            "logical": [{"source": "A", "target": "B", "action": "remove"}],
            "physical": []
        }));
        let merged = merge_relationships(&response);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].remove);
        assert_eq!(merged[0].cardinality, None);
    }

    #[test]
    fn test_diff_action_destructive() {
        assert!(DiffAction::RemoveEntity.is_destructive());
        assert!(DiffAction::RemoveRelationship.is_destructive());
        assert!(!DiffAction::UpdateAttribute.is_destructive());

        let entry = DiffEntry::skipped(DiffAction::RemoveAttribute, Layer::Logical, "Customer.email");
        assert!(!entry.is_applied());
        assert_eq!(entry.detail.as_deref(), Some(DROP_NOT_ALLOWED));
        assert_eq!(
            serde_json::to_value(&entry).unwrap()["action"],
            json!("remove_attribute")
        );
    }

    #[test]
    fn test_changed() {
        assert_eq!(changed(Some("Text"), Some("Text")), None);
        assert_eq!(changed(Some("Text"), None), Some("Text".to_string()));
        assert_eq!(changed(None, Some("Text")), None);
        assert_eq!(changed(Some("  "), Some("Text")), None);
    }
}
