//! Cross-layer relationship synchronization
//!
//! One edit, expressed against objects (and optionally attributes) of any
//! layer, is written into every model of the family:
//!
//! 1. resolve the family
//! 2. per layer, find the local copies of source and target objects
//!    (provenance first, normalized name second); skip the layer if either
//!    is missing
//! 3. for an attribute-level edit, find or create the local attributes
//! 4. decide the stored level ([`decide_layer_level`]); skip on a constraint
//!    violation
//! 5. update the matching row if a field changed, or create one
//!
//! A skipped layer is a valid outcome, never an error.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_storage::{
    Attribute, AttributeId, CanonicalId, CanonicalKey, CanonicalRelationship, Cardinality,
    DataModel, DataObject, Layer, LevelKind, ModelId, ModelStore, NewAttribute,
    NewCanonicalRelationship, NewRelationship, ObjectId, Relationship, RelationshipId,
    RelationshipLevel, RelationshipPatch,
};
use tracing::{debug, info, warn};

use crate::compensation::settle_result;
use crate::config::RelationshipConfig;
use crate::context::SyncContext;
use crate::error::Result;
use crate::family::{FamilyResolver, ModelFamily};
use crate::locks::FamilyLocks;
use crate::naming::names_match;

// ═══════════════════════════════════════════════════════════════════════════
// Requests and outcomes
// ═══════════════════════════════════════════════════════════════════════════

/// A relationship edit, in terms of objects and attributes of any layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdit {
    pub source_object_id: ObjectId,
    pub target_object_id: ObjectId,
    #[serde(default)]
    pub relationship_type: Cardinality,
    pub level: LevelKind,
    #[serde(default)]
    pub source_attribute_id: Option<AttributeId>,
    #[serde(default)]
    pub target_attribute_id: Option<AttributeId>,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Existing anchor; looked up or created when absent
    #[serde(default)]
    pub canonical_id: Option<CanonicalId>,
}

impl RelationshipEdit {
    pub fn object_level(source_object_id: ObjectId, target_object_id: ObjectId) -> Self {
        Self {
            source_object_id,
            target_object_id,
            relationship_type: Cardinality::default(),
            level: LevelKind::Object,
            source_attribute_id: None,
            target_attribute_id: None,
            source_handle: None,
            target_handle: None,
            name: None,
            description: None,
            canonical_id: None,
        }
    }

    pub fn attribute_level(
        source_object_id: ObjectId,
        source_attribute_id: AttributeId,
        target_object_id: ObjectId,
        target_attribute_id: AttributeId,
    ) -> Self {
        Self {
            level: LevelKind::Attribute,
            source_attribute_id: Some(source_attribute_id),
            target_attribute_id: Some(target_attribute_id),
            ..Self::object_level(source_object_id, target_object_id)
        }
    }

    pub fn with_type(mut self, relationship_type: Cardinality) -> Self {
        self.relationship_type = relationship_type;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Models an edit may touch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncScope {
    models: Option<HashSet<ModelId>>,
    family_of: Option<ModelId>,
}

impl SyncScope {
    /// Every model of the family
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(models: impl IntoIterator<Item = ModelId>) -> Self {
        Self {
            models: Some(models.into_iter().collect()),
            family_of: None,
        }
    }

    /// Write into the family of `model_id` instead of the source object's
    pub fn in_family(mut self, model_id: ModelId) -> Self {
        self.family_of = Some(model_id);
        self
    }

    pub fn includes(&self, model_id: ModelId) -> bool {
        self.models
            .as_ref()
            .map(|m| m.contains(&model_id))
            .unwrap_or(true)
    }
}

/// Why a layer received no relationship row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Source or target object has no copy in this layer yet
    ObjectMissing { object_id: ObjectId },
    /// Logical and physical layers hold attribute-level rows only
    ObjectLevelNotAllowed,
    /// An attribute-level row needs both local attributes
    AttributesUnresolved,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ObjectMissing { object_id } => {
                write!(f, "object {} not replicated in this layer", object_id)
            }
            SkipReason::ObjectLevelNotAllowed => {
                write!(f, "layer stores attribute-level relationships only")
            }
            SkipReason::AttributesUnresolved => {
                write!(f, "source or target attribute could not be resolved")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLayer {
    pub model_id: ModelId,
    pub layer: Layer,
    pub reason: SkipReason,
}

/// Result of one synchronization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub canonical: Option<CanonicalRelationship>,
    /// Relationship row per model, for layers that succeeded
    pub relationships: BTreeMap<ModelId, Relationship>,
    pub skipped: Vec<SkippedLayer>,
}

impl SyncOutcome {
    pub fn for_layer(&self, layer: Layer) -> Option<&Relationship> {
        self.relationships.values().find(|r| r.layer == layer)
    }
}

/// Result of one removal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovalOutcome {
    pub removed: BTreeMap<ModelId, Vec<RelationshipId>>,
    pub canonical_removed: Vec<CanonicalId>,
}

impl RemovalOutcome {
    pub fn removed_count(&self) -> usize {
        self.removed.values().map(Vec::len).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Level decision
// ═══════════════════════════════════════════════════════════════════════════

/// Stored-level decision for one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerDecision {
    Store(RelationshipLevel),
    Skip(SkipReasonKind),
}

/// Constraint outcome without the object id of [`SkipReason::ObjectMissing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReasonKind {
    ObjectLevelNotAllowed,
    AttributesUnresolved,
}

impl From<SkipReasonKind> for SkipReason {
    fn from(kind: SkipReasonKind) -> Self {
        match kind {
            SkipReasonKind::ObjectLevelNotAllowed => SkipReason::ObjectLevelNotAllowed,
            SkipReasonKind::AttributesUnresolved => SkipReason::AttributesUnresolved,
        }
    }
}

/// Level to store in `layer` given the requested level and the local
/// attribute ids that could be resolved
///
/// Conceptual layers always store object-level rows. Logical and physical
/// layers store attribute-level rows only and are skipped otherwise, never
/// downgraded.
pub fn decide_layer_level(
    layer: Layer,
    requested: LevelKind,
    source_attribute: Option<AttributeId>,
    target_attribute: Option<AttributeId>,
) -> LayerDecision {
    if !layer.requires_attribute_relationships() {
        return LayerDecision::Store(RelationshipLevel::Object);
    }
    if requested == LevelKind::Object {
        return LayerDecision::Skip(SkipReasonKind::ObjectLevelNotAllowed);
    }
    match RelationshipLevel::resolve(source_attribute, target_attribute) {
        RelationshipLevel::Object => LayerDecision::Skip(SkipReasonKind::AttributesUnresolved),
        level => LayerDecision::Store(level),
    }
}

/// Changed mutable fields of `existing` compared with the desired row
fn diff_relationship(existing: &Relationship, desired: &NewRelationship) -> RelationshipPatch {
    fn changed<T: Clone + PartialEq>(current: &T, wanted: &T) -> Option<T> {
        (current != wanted).then(|| wanted.clone())
    }

    RelationshipPatch {
        level: changed(&existing.level, &desired.level),
        relationship_type: changed(&existing.relationship_type, &desired.relationship_type),
        source_handle: desired
            .source_handle
            .as_ref()
            .filter(|h| existing.source_handle.as_ref() != Some(*h))
            .cloned(),
        target_handle: desired
            .target_handle
            .as_ref()
            .filter(|h| existing.target_handle.as_ref() != Some(*h))
            .cloned(),
        name: desired
            .name
            .as_ref()
            .filter(|n| existing.name.as_ref() != Some(*n))
            .cloned(),
        description: desired
            .description
            .as_ref()
            .filter(|d| existing.description.as_ref() != Some(*d))
            .cloned(),
        canonical_id: desired
            .canonical_id
            .filter(|c| existing.canonical_id != Some(*c)),
    }
}

/// Attribute identity: the first attribute of a copy chain
fn attribute_identity(attribute: &Attribute) -> AttributeId {
    attribute.origin_attribute_id.unwrap_or(attribute.id)
}

// ═══════════════════════════════════════════════════════════════════════════
// Synchronizer
// ═══════════════════════════════════════════════════════════════════════════

/// Global objects and attributes an edit refers to
struct ResolvedEdit {
    source: DataObject,
    target: DataObject,
    source_attribute: Option<Attribute>,
    target_attribute: Option<Attribute>,
}

impl ResolvedEdit {
    fn canonical_key(&self, requested: LevelKind) -> CanonicalKey {
        let level = match requested {
            LevelKind::Object => RelationshipLevel::Object,
            LevelKind::Attribute => RelationshipLevel::resolve(
                self.source_attribute.as_ref().map(attribute_identity),
                self.target_attribute.as_ref().map(attribute_identity),
            ),
        };
        CanonicalKey {
            source_object_id: self.source.identity(),
            target_object_id: self.target.identity(),
            level,
        }
    }
}

pub struct RelationshipSynchronizer {
    store: Arc<dyn ModelStore>,
    resolver: FamilyResolver,
    locks: Arc<FamilyLocks>,
    config: RelationshipConfig,
    rollback_on_failure: bool,
}

impl RelationshipSynchronizer {
    pub fn new(
        store: Arc<dyn ModelStore>,
        locks: Arc<FamilyLocks>,
        config: RelationshipConfig,
        rollback_on_failure: bool,
    ) -> Self {
        Self {
            resolver: FamilyResolver::new(store.clone()),
            store,
            locks,
            config,
            rollback_on_failure,
        }
    }

    /// Write `edit` into every layer of its family
    pub async fn sync(&self, edit: &RelationshipEdit) -> Result<SyncOutcome> {
        let store = self.store.as_ref();
        let mut ctx = SyncContext::new();

        let source = ctx.object(store, edit.source_object_id).await?;
        let root_id = self.resolver.root_of(&mut ctx, source.model_id).await?;
        let _guard = self.locks.acquire(root_id).await;

        let result = self.sync_in(&mut ctx, edit, &SyncScope::all()).await;
        settle_result(
            &mut ctx.compensation,
            store,
            self.rollback_on_failure,
            "sync relationship",
            result,
        )
        .await
    }

    /// Delete every row matching `edit` in every layer of its family
    pub async fn remove(&self, edit: &RelationshipEdit) -> Result<RemovalOutcome> {
        let mut ctx = SyncContext::new();

        let source = ctx.object(self.store.as_ref(), edit.source_object_id).await?;
        let root_id = self.resolver.root_of(&mut ctx, source.model_id).await?;
        let _guard = self.locks.acquire(root_id).await;

        self.remove_in(&mut ctx, edit).await
    }

    /// Unlocked synchronization; the caller holds the family lock
    pub async fn sync_in(
        &self,
        ctx: &mut SyncContext,
        edit: &RelationshipEdit,
        scope: &SyncScope,
    ) -> Result<SyncOutcome> {
        let store = self.store.as_ref();
        let resolved = self.resolve_edit(ctx, edit).await?;
        let family = self
            .resolver
            .resolve_family(ctx, scope.family_of.unwrap_or(resolved.source.model_id))
            .await?;

        let canonical = match edit.canonical_id {
            Some(id) => store
                .list_canonical_relationships()
                .await?
                .into_iter()
                .find(|c| c.id == id),
            None => Some(
                self.ensure_canonical(ctx, resolved.canonical_key(edit.level), edit)
                    .await?,
            ),
        };

        let canonical_id = canonical.as_ref().map(|c| c.id).or(edit.canonical_id);
        let mut outcome = SyncOutcome {
            canonical,
            ..Default::default()
        };

        for model in family.layer_models() {
            if !scope.includes(model.id) {
                continue;
            }
            match self
                .sync_layer(ctx, &family, model, &resolved, edit, canonical_id)
                .await?
            {
                Ok(relationship) => {
                    outcome.relationships.insert(model.id, relationship);
                }
                Err(reason) => {
                    info!(
                        "Skipping {} model {} for relationship {} -> {}: {}",
                        model.layer, model.id, edit.source_object_id, edit.target_object_id, reason
                    );
                    outcome.skipped.push(SkippedLayer {
                        model_id: model.id,
                        layer: model.layer,
                        reason,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Unlocked removal; the caller holds the family lock
    pub async fn remove_in(
        &self,
        ctx: &mut SyncContext,
        edit: &RelationshipEdit,
    ) -> Result<RemovalOutcome> {
        let store = self.store.as_ref();
        let resolved = self.resolve_edit(ctx, edit).await?;
        let family = self
            .resolver
            .resolve_family(ctx, resolved.source.model_id)
            .await?;

        let mut outcome = RemovalOutcome::default();

        for model in family.layer_models() {
            let Some(source) = self.local_object(ctx, model, &resolved.source).await? else {
                continue;
            };
            let Some(target) = self.local_object(ctx, model, &resolved.target).await? else {
                continue;
            };

            // Same decision as creation, without creating attributes
            let (source_attr, target_attr) = if model.layer.requires_attribute_relationships()
                && edit.level == LevelKind::Attribute
            {
                (
                    self.local_attribute(ctx, &source, resolved.source_attribute.as_ref(), false)
                        .await?,
                    self.local_attribute(ctx, &target, resolved.target_attribute.as_ref(), false)
                        .await?,
                )
            } else {
                (None, None)
            };
            let level = match decide_layer_level(model.layer, edit.level, source_attr, target_attr) {
                LayerDecision::Store(level) => level,
                LayerDecision::Skip(_) => continue,
            };

            let matches: Vec<Relationship> = store
                .get_relationships_by_model(model.id)
                .await?
                .into_iter()
                .filter(|r| {
                    r.source_object_id == source.id
                        && r.target_object_id == target.id
                        && r.level == level
                })
                .collect();

            for relationship in matches {
                store.delete_relationship(relationship.id).await?;
                outcome
                    .removed
                    .entry(model.id)
                    .or_default()
                    .push(relationship.id);
            }
        }

        let key = resolved.canonical_key(edit.level);
        for canonical in store.list_canonical_relationships().await? {
            let by_key = canonical.key() == key;
            let by_id = edit.canonical_id == Some(canonical.id);
            if by_key || by_id {
                store.delete_canonical_relationship(canonical.id).await?;
                outcome.canonical_removed.push(canonical.id);
            }
        }

        info!(
            "Removed relationship {} -> {}: {} rows, {} anchors",
            edit.source_object_id,
            edit.target_object_id,
            outcome.removed_count(),
            outcome.canonical_removed.len()
        );
        Ok(outcome)
    }

    /// Find the anchor for `key`, creating it when absent
    pub async fn ensure_canonical(
        &self,
        ctx: &mut SyncContext,
        key: CanonicalKey,
        edit: &RelationshipEdit,
    ) -> Result<CanonicalRelationship> {
        let store = self.store.as_ref();
        if let Some(existing) = store
            .list_canonical_relationships()
            .await?
            .into_iter()
            .find(|c| c.key() == key)
        {
            debug!("Reusing canonical relationship {}", existing.id);
            return Ok(existing);
        }

        ctx.create_canonical(
            store,
            NewCanonicalRelationship {
                source_object_id: key.source_object_id,
                target_object_id: key.target_object_id,
                level: key.level,
                relationship_type: edit.relationship_type,
                name: edit.name.clone(),
                description: edit.description.clone(),
            },
        )
        .await
    }

    async fn resolve_edit(&self, ctx: &mut SyncContext, edit: &RelationshipEdit) -> Result<ResolvedEdit> {
        let store = self.store.as_ref();
        let source = ctx.object(store, edit.source_object_id).await?;
        let target = ctx.object(store, edit.target_object_id).await?;

        let (source_attribute, target_attribute) = match edit.level {
            LevelKind::Object => (None, None),
            LevelKind::Attribute => {
                let source_attribute = match edit.source_attribute_id {
                    Some(id) => Some(ctx.attribute(store, id).await?),
                    None => None,
                };
                let target_attribute = match edit.target_attribute_id {
                    Some(id) => Some(ctx.attribute(store, id).await?),
                    None => None,
                };
                (source_attribute, target_attribute)
            }
        };

        Ok(ResolvedEdit {
            source,
            target,
            source_attribute,
            target_attribute,
        })
    }

    /// One layer; `Err(reason)` means the layer is skipped
    async fn sync_layer(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        model: &DataModel,
        resolved: &ResolvedEdit,
        edit: &RelationshipEdit,
        canonical_id: Option<CanonicalId>,
    ) -> Result<std::result::Result<Relationship, SkipReason>> {
        let store = self.store.as_ref();

        let Some(source) = self.local_object(ctx, model, &resolved.source).await? else {
            return Ok(Err(SkipReason::ObjectMissing {
                object_id: resolved.source.id,
            }));
        };
        let Some(target) = self.local_object(ctx, model, &resolved.target).await? else {
            return Ok(Err(SkipReason::ObjectMissing {
                object_id: resolved.target.id,
            }));
        };

        // Conceptual rows are object-level whatever was requested
        let (source_attr, target_attr) =
            if model.layer.requires_attribute_relationships() && edit.level == LevelKind::Attribute {
                let create = self.config.create_missing_attributes;
                (
                    self.local_attribute(ctx, &source, resolved.source_attribute.as_ref(), create)
                        .await?,
                    self.local_attribute(ctx, &target, resolved.target_attribute.as_ref(), create)
                        .await?,
                )
            } else {
                (None, None)
            };

        let level = match decide_layer_level(model.layer, edit.level, source_attr, target_attr) {
            LayerDecision::Store(level) => level,
            LayerDecision::Skip(kind) => return Ok(Err(kind.into())),
        };

        let desired = NewRelationship {
            model_id: model.id,
            layer: model.layer,
            source_object_id: source.id,
            target_object_id: target.id,
            level,
            relationship_type: edit.relationship_type,
            source_handle: edit.source_handle.clone(),
            target_handle: edit.target_handle.clone(),
            name: edit.name.clone(),
            description: edit.description.clone(),
            canonical_id,
        };

        let existing = store
            .get_relationships_by_model(model.id)
            .await?
            .into_iter()
            .find(|r| {
                r.source_object_id == desired.source_object_id
                    && r.target_object_id == desired.target_object_id
                    && r.level == desired.level
            });

        let relationship = match existing {
            Some(existing) => {
                let patch = diff_relationship(&existing, &desired);
                if patch.is_empty() {
                    debug!("Relationship {} in model {} unchanged", existing.id, model.id);
                    existing
                } else {
                    debug!("Updating relationship {} in model {}", existing.id, model.id);
                    store.update_relationship(existing.id, patch).await?
                }
            }
            None => {
                let created = ctx.create_relationship(store, desired).await?;
                debug!(
                    "Created {} relationship {} in family {}",
                    model.layer,
                    created.id,
                    family.root_id()
                );
                created
            }
        };

        Ok(Ok(relationship))
    }

    /// Copy of `global` in `model`: same object, then provenance, then name
    pub(crate) async fn local_object(
        &self,
        ctx: &mut SyncContext,
        model: &DataModel,
        global: &DataObject,
    ) -> Result<Option<DataObject>> {
        let objects = ctx.objects_in(self.store.as_ref(), model.id).await?;

        if let Some(object) = objects.iter().find(|o| o.id == global.id) {
            return Ok(Some(object.clone()));
        }
        let identity = global.identity();
        if let Some(object) = objects.iter().find(|o| o.identity() == identity) {
            return Ok(Some(object.clone()));
        }
        if self.config.name_fallback {
            if let Some(object) = objects.iter().find(|o| names_match(&o.name, &global.name)) {
                debug!(
                    "Matched object {} to {} in model {} by name",
                    global.id, object.id, model.id
                );
                return Ok(Some(object.clone()));
            }
        }
        Ok(None)
    }

    /// Copy of `global` on `local_object`: same attribute, then provenance,
    /// then name; created from `global` when allowed
    async fn local_attribute(
        &self,
        ctx: &mut SyncContext,
        local_object: &DataObject,
        global: Option<&Attribute>,
        create_missing: bool,
    ) -> Result<Option<AttributeId>> {
        let Some(global) = global else {
            return Ok(None);
        };
        let store = self.store.as_ref();
        let attributes = ctx.attributes_of(store, local_object.id).await?;

        if let Some(found) = attributes.iter().find(|a| a.id == global.id) {
            return Ok(Some(found.id));
        }
        let identity = attribute_identity(global);
        if let Some(found) = attributes.iter().find(|a| attribute_identity(a) == identity) {
            return Ok(Some(found.id));
        }
        if let Some(found) = attributes.iter().find(|a| names_match(&a.name, &global.name)) {
            return Ok(Some(found.id));
        }

        if !create_missing {
            return Ok(None);
        }

        let mut payload = NewAttribute::copied_from(global, local_object.id);
        payload.order_index = attributes
            .iter()
            .map(|a| a.order_index + 1)
            .max()
            .unwrap_or(0);
        match ctx.create_attribute(store, payload).await {
            Ok(created) => {
                info!(
                    "Created attribute '{}' on object {} for relationship sync",
                    created.name, local_object.id
                );
                Ok(Some(created.id))
            }
            Err(e) => {
                warn!(
                    "Could not create attribute '{}' on object {}: {}",
                    global.name, local_object.id, e
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conceptual_always_object_level() {
        for requested in [LevelKind::Object, LevelKind::Attribute] {
            assert_eq!(
                decide_layer_level(Layer::Conceptual, requested, Some(1), Some(2)),
                LayerDecision::Store(RelationshipLevel::Object)
            );
        }
    }

    #[test]
    fn test_logical_and_physical_never_downgrade() {
        for layer in [Layer::Logical, Layer::Physical] {
            assert_eq!(
                decide_layer_level(layer, LevelKind::Attribute, Some(1), None),
                LayerDecision::Skip(SkipReasonKind::AttributesUnresolved)
            );
            assert_eq!(
                decide_layer_level(layer, LevelKind::Object, None, None),
                LayerDecision::Skip(SkipReasonKind::ObjectLevelNotAllowed)
            );
            assert_eq!(
                decide_layer_level(layer, LevelKind::Attribute, Some(3), Some(4)),
                LayerDecision::Store(RelationshipLevel::resolve(Some(3), Some(4)))
            );
        }
    }

    #[test]
    fn test_scope() {
        assert!(SyncScope::all().includes(42));
        let scope = SyncScope::only([1, 2]);
        assert!(scope.includes(2));
        assert!(!scope.includes(3));
        assert_eq!(SyncScope::all().in_family(7).family_of, Some(7));
    }

    #[test]
    fn test_skip_reason_serde() {
        let json = serde_json::to_value(SkipReason::ObjectMissing { object_id: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"reason": "object_missing", "object_id": 4}));
    }
}
