//! Batch population of a family
//!
//! Copies a selection of existing objects into every layer of a family in
//! three strictly ordered stages. Within a stage each layer is one concurrent
//! batch.
//!
//! | Stage | Writes                          |
//! |-------|---------------------------------|
//! | 1     | objects and placement rows      |
//! | 2     | attributes                      |
//! | 3     | relationships among the objects |

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strata_storage::{
    Attribute, DataModel, DataObject, Layer, LevelKind, ModelId, ModelObject, ModelStore,
    NewAttribute, NewDataObject, ObjectId, Provenance, RelationshipLevel, StorageError,
};
use tracing::{debug, info, warn};

use crate::compensation::settle_result;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::family::{FamilyResolver, FamilySeed, ModelFamily};
use crate::locks::FamilyLocks;
use crate::naming::names_match;
use crate::relationships::{RelationshipEdit, RelationshipSynchronizer, SyncOutcome, SyncScope};
use crate::replicator::{placement_for, AttributeInput, LayerConfig, ObjectInput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateRequest {
    /// Any member of the target family
    pub conceptual_model_id: ModelId,
    /// Objects to copy, from any model
    pub object_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulateResult {
    pub family: ModelFamily,
    /// New object ids per layer
    pub created: BTreeMap<Layer, Vec<ObjectId>>,
    /// Selected objects that already had a copy in a layer
    pub reused: usize,
    pub attributes: usize,
    pub relationships: Vec<SyncOutcome>,
}

/// Rows one layer batch managed to write before stopping
struct LayerWrite<T> {
    rows: Vec<T>,
    placements: Vec<ModelObject>,
    error: Option<StorageError>,
}

impl<T> LayerWrite<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            placements: Vec::new(),
            error: None,
        }
    }
}

/// Selected object and its copy in one layer
struct Pairing {
    source: DataObject,
    local: DataObject,
}

pub struct FamilyPopulator {
    store: Arc<dyn ModelStore>,
    resolver: FamilyResolver,
    synchronizer: RelationshipSynchronizer,
    locks: Arc<FamilyLocks>,
    config: SyncConfig,
}

impl FamilyPopulator {
    pub fn new(store: Arc<dyn ModelStore>, locks: Arc<FamilyLocks>, config: SyncConfig) -> Self {
        Self {
            resolver: FamilyResolver::new(store.clone()),
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

    pub async fn populate(&self, request: PopulateRequest) -> Result<PopulateResult> {
        if request.object_ids.is_empty() {
            return Err(SyncError::invalid_request("no objects selected"));
        }

        let store = self.store.as_ref();
        let mut ctx = SyncContext::new();

        let mut selected = Vec::with_capacity(request.object_ids.len());
        let mut seen = HashSet::new();
        for id in &request.object_ids {
            if seen.insert(*id) {
                selected.push(ctx.object(store, *id).await?);
            }
        }

        let root_id = self
            .resolver
            .root_of(&mut ctx, request.conceptual_model_id)
            .await?;
        let _guard = self.locks.acquire(root_id).await;

        let mut step = "ensure family".to_string();
        let result = self
            .populate_in(&mut ctx, request.conceptual_model_id, &selected, &mut step)
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

    async fn populate_in(
        &self,
        ctx: &mut SyncContext,
        model_id: ModelId,
        selected: &[DataObject],
        step: &mut String,
    ) -> Result<PopulateResult> {
        let family = self
            .resolver
            .ensure_family(ctx, FamilySeed::Model(model_id))
            .await?;

        *step = "populate objects".to_string();
        let (pairings, created, reused) = self.stage_objects(ctx, &family, selected).await?;

        *step = "populate attributes".to_string();
        let attributes = self.stage_attributes(ctx, &pairings).await?;

        *step = "populate relationships".to_string();
        let relationships = self
            .stage_relationships(ctx, family.root_id(), &pairings[0])
            .await?;

        info!(
            "Populated family {}: {} objects created, {} reused, {} attributes, {} relationships",
            family.root_id(),
            created.values().map(Vec::len).sum::<usize>(),
            reused,
            attributes,
            relationships.len()
        );

        Ok(PopulateResult {
            family,
            created,
            reused,
            attributes,
            relationships,
        })
    }

    /// Stage 1: reuse or create one copy per selected object per layer
    ///
    /// The conceptual copies are written first and become the family's own
    /// origins. Logical and physical copies point at them, never at the
    /// selected objects. The first entry of the returned pairings is the
    /// conceptual layer.
    async fn stage_objects(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        selected: &[DataObject],
    ) -> Result<(Vec<Vec<Pairing>>, BTreeMap<Layer, Vec<ObjectId>>, usize)> {
        let mut created = BTreeMap::new();
        let mut reused = 0;

        let conceptual = family.conceptual.clone();
        let mut plan = LayerPlan::new(conceptual);
        for source in selected {
            match self.synchronizer.local_object(ctx, &plan.model, source).await? {
                Some(local) => {
                    reused += 1;
                    plan.pairs.push(Pairing {
                        source: source.clone(),
                        local,
                    });
                }
                None => {
                    let payload = ObjectInput::from_object(source).to_payload(
                        &plan.model,
                        None,
                        &LayerConfig::default(),
                    );
                    plan.plan(source, payload);
                }
            }
        }
        let mut written = self.write_object_layers(ctx, vec![plan], &mut created).await?;
        let origins: Vec<DataObject> = written[0].iter().map(|p| p.local.clone()).collect();

        let mut plans = Vec::new();
        for model in family.layer_models().into_iter().skip(1) {
            let mut plan = LayerPlan::new(model.clone());
            for origin in &origins {
                match self.synchronizer.local_object(ctx, model, origin).await? {
                    Some(local) => {
                        reused += 1;
                        plan.pairs.push(Pairing {
                            source: origin.clone(),
                            local,
                        });
                    }
                    None => {
                        let provenance = Provenance {
                            origin_object_id: origin.identity(),
                            origin_model_id: origin
                                .provenance
                                .map(|p| p.origin_model_id)
                                .unwrap_or(origin.model_id),
                            layer: model.layer,
                        };
                        let payload = ObjectInput::from_object(origin).to_payload(
                            model,
                            Some(provenance),
                            &LayerConfig::default(),
                        );
                        plan.plan(origin, payload);
                    }
                }
            }
            plans.push(plan);
        }
        written.extend(self.write_object_layers(ctx, plans, &mut created).await?);

        Ok((written, created, reused))
    }

    /// One concurrent batch per layer; every written row is recorded even
    /// when another layer failed
    async fn write_object_layers(
        &self,
        ctx: &mut SyncContext,
        plans: Vec<LayerPlan>,
        created: &mut BTreeMap<Layer, Vec<ObjectId>>,
    ) -> Result<Vec<Vec<Pairing>>> {
        let batch_size = self.config.cascade.batch_size;
        let writes = join_all(plans.iter().map(|plan| {
            let store = self.store.clone();
            let model = plan.model.clone();
            let payloads = plan.payloads.clone();
            async move { write_objects(store.as_ref(), &model, payloads, batch_size).await }
        }))
        .await;

        let mut pairings = Vec::with_capacity(plans.len());
        let mut first_error = None;
        for (plan, write) in plans.into_iter().zip(writes) {
            ctx.record_objects(&write.rows);
            ctx.record_model_objects(&write.placements);

            created.insert(plan.model.layer, write.rows.iter().map(|o| o.id).collect());
            let mut pairs = plan.pairs;
            for (source, local) in plan.sources.into_iter().zip(write.rows) {
                pairs.push(Pairing { source, local });
            }
            pairings.push(pairs);
            if first_error.is_none() {
                first_error = write.error;
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }
        Ok(pairings)
    }

    /// Stage 2: copy attributes a layer copy does not have yet
    ///
    /// Conceptual copies own their attributes. Lower layers copy them from
    /// the conceptual copy once it is complete.
    async fn stage_attributes(
        &self,
        ctx: &mut SyncContext,
        pairings: &[Vec<Pairing>],
    ) -> Result<usize> {
        let Some((conceptual, lower)) = pairings.split_first() else {
            return Ok(0);
        };

        let planned = self.plan_attributes(ctx, conceptual, false).await?;
        let mut total = self.write_attribute_layers(ctx, vec![planned]).await?;

        let mut planned = Vec::with_capacity(lower.len());
        for layer_pairs in lower {
            planned.push(self.plan_attributes(ctx, layer_pairs, true).await?);
        }
        total += self.write_attribute_layers(ctx, planned).await?;
        Ok(total)
    }

    async fn plan_attributes(
        &self,
        ctx: &mut SyncContext,
        layer_pairs: &[Pairing],
        linked: bool,
    ) -> Result<Vec<NewAttribute>> {
        let store = self.store.as_ref();
        let mut payloads = Vec::new();
        for pairing in layer_pairs {
            if pairing.local.id == pairing.source.id {
                continue;
            }
            let source_attrs = ctx.attributes_of(store, pairing.source.id).await?;
            let local_attrs = ctx.attributes_of(store, pairing.local.id).await?;
            let missing = source_attrs
                .iter()
                .filter(|a| find_copy(&local_attrs, a).is_none())
                .enumerate()
                .map(|(i, a)| {
                    let mut input = AttributeInput::from_attribute(a);
                    if !linked {
                        input.origin_attribute_id = None;
                    }
                    input.to_payload(pairing.local.id, local_attrs.len() + i)
                });
            payloads.extend(missing);
        }
        Ok(payloads)
    }

    async fn write_attribute_layers(
        &self,
        ctx: &mut SyncContext,
        planned: Vec<Vec<NewAttribute>>,
    ) -> Result<usize> {
        let batch_size = self.config.cascade.batch_size;
        let writes = join_all(planned.into_iter().map(|payloads| {
            let store = self.store.clone();
            async move { write_attributes(store.as_ref(), payloads, batch_size).await }
        }))
        .await;

        let mut total = 0;
        let mut first_error = None;
        for write in writes {
            ctx.record_attributes(&write.rows);
            total += write.rows.len();
            if first_error.is_none() {
                first_error = write.error;
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }
        Ok(total)
    }

    /// Stage 3: relationships whose both ends were selected, restated on the
    /// family's conceptual copies
    ///
    /// Anchors are never shared with the selection's own family.
    async fn stage_relationships(
        &self,
        ctx: &mut SyncContext,
        root_id: ModelId,
        origins: &[Pairing],
    ) -> Result<Vec<SyncOutcome>> {
        let store = self.store.as_ref();
        let by_id: HashMap<ObjectId, &DataObject> =
            origins.iter().map(|p| (p.source.id, &p.local)).collect();
        let by_identity: HashMap<ObjectId, &DataObject> = origins
            .iter()
            .map(|p| (p.source.identity(), &p.local))
            .collect();

        let mut edits: Vec<RelationshipEdit> = Vec::new();

        for canonical in store.list_canonical_relationships().await? {
            let (Some(source), Some(target)) = (
                by_identity.get(&canonical.source_object_id),
                by_identity.get(&canonical.target_object_id),
            ) else {
                continue;
            };
            let Some(mut edit) = self
                .restate(ctx, canonical.level, source, target)
                .await?
            else {
                continue;
            };
            edit.relationship_type = canonical.relationship_type;
            edit.name = canonical.name.clone();
            edit.description = canonical.description.clone();
            if !edits.iter().any(|e| same_edge(e, &edit)) {
                edits.push(edit);
            }
        }

        let mut rows = Vec::new();
        for pairing in origins {
            for relationship in store.get_relationships_by_object(pairing.source.id).await? {
                if relationship.source_object_id == pairing.source.id
                    && by_id.contains_key(&relationship.target_object_id)
                {
                    rows.push(relationship);
                }
            }
        }
        for relationship in rows {
            let (Some(source), Some(target)) = (
                by_id.get(&relationship.source_object_id),
                by_id.get(&relationship.target_object_id),
            ) else {
                continue;
            };
            let Some(mut edit) = self
                .restate(ctx, relationship.level, source, target)
                .await?
            else {
                continue;
            };
            // An object-level row is the conceptual face of an edge already listed
            let covered = edits.iter().any(|e| {
                same_edge(e, &edit)
                    || (edit.level == LevelKind::Object
                        && e.source_object_id == edit.source_object_id
                        && e.target_object_id == edit.target_object_id)
            });
            if covered {
                continue;
            }
            edit.relationship_type = relationship.relationship_type;
            edit.source_handle = relationship.source_handle.clone();
            edit.target_handle = relationship.target_handle.clone();
            edit.name = relationship.name.clone();
            edit.description = relationship.description.clone();
            edits.push(edit);
        }

        let scope = SyncScope::all().in_family(root_id);
        let mut outcomes = Vec::with_capacity(edits.len());
        for edit in &edits {
            outcomes.push(self.synchronizer.sync_in(ctx, edit, &scope).await?);
        }
        debug!("Synchronized {} relationships during population", outcomes.len());
        Ok(outcomes)
    }

    /// Edit between two conceptual copies at `level`, with attributes mapped
    /// onto the copies; `None` when an attribute of `level` was deleted
    async fn restate(
        &self,
        ctx: &mut SyncContext,
        level: RelationshipLevel,
        source: &DataObject,
        target: &DataObject,
    ) -> Result<Option<RelationshipEdit>> {
        let store = self.store.as_ref();
        let mut edit = RelationshipEdit::object_level(source.id, target.id);
        let Some((source_attribute, target_attribute)) = level.attribute_ids() else {
            return Ok(Some(edit));
        };

        let mut mapped = Vec::with_capacity(2);
        for (copy, attribute_id) in [(source, source_attribute), (target, target_attribute)] {
            let Some(attribute) = store.get_attribute(attribute_id).await? else {
                warn!("Skipping relationship on deleted attribute {}", attribute_id);
                return Ok(None);
            };
            let local = ctx.attributes_of(store, copy.id).await?;
            mapped.push(find_copy(&local, &attribute).map(|a| a.id));
        }

        edit.level = LevelKind::Attribute;
        edit.source_attribute_id = mapped[0];
        edit.target_attribute_id = mapped[1];
        Ok(Some(edit))
    }
}

/// Selected objects and the payloads still to write for one layer
struct LayerPlan {
    model: DataModel,
    pairs: Vec<Pairing>,
    sources: Vec<DataObject>,
    payloads: Vec<NewDataObject>,
}

impl LayerPlan {
    fn new(model: DataModel) -> Self {
        Self {
            model,
            pairs: Vec::new(),
            sources: Vec::new(),
            payloads: Vec::new(),
        }
    }

    fn plan(&mut self, source: &DataObject, payload: NewDataObject) {
        self.sources.push(source.clone());
        self.payloads.push(payload);
    }
}

fn same_edge(a: &RelationshipEdit, b: &RelationshipEdit) -> bool {
    a.source_object_id == b.source_object_id
        && a.target_object_id == b.target_object_id
        && a.level == b.level
        && a.source_attribute_id == b.source_attribute_id
        && a.target_attribute_id == b.target_attribute_id
}

/// Attribute of `local` standing for `source`, by identity then name
fn find_copy<'a>(local: &'a [Attribute], source: &Attribute) -> Option<&'a Attribute> {
    let identity = source.origin_attribute_id.unwrap_or(source.id);
    local
        .iter()
        .find(|a| a.origin_attribute_id.unwrap_or(a.id) == identity)
        .or_else(|| local.iter().find(|a| names_match(&a.name, &source.name)))
}

/// Objects then placement rows for one layer, in chunks of `batch_size`
async fn write_objects(
    store: &dyn ModelStore,
    model: &DataModel,
    payloads: Vec<NewDataObject>,
    batch_size: usize,
) -> LayerWrite<DataObject> {
    let mut write = LayerWrite::with_capacity(payloads.len());

    for chunk in payloads.chunks(batch_size.max(1)) {
        let created = match store.create_data_objects_batch(chunk.to_vec()).await {
            Ok(created) => created,
            Err(e) => {
                write.error = Some(e);
                break;
            }
        };
        let placements = created.iter().map(|o| placement_for(model, o)).collect();
        write.rows.extend(created);
        match store.create_data_model_objects_batch(placements).await {
            Ok(placed) => write.placements.extend(placed),
            Err(e) => {
                write.error = Some(e);
                break;
            }
        }
    }
    write
}

async fn write_attributes(
    store: &dyn ModelStore,
    payloads: Vec<NewAttribute>,
    batch_size: usize,
) -> LayerWrite<Attribute> {
    let mut write = LayerWrite::with_capacity(payloads.len());
    for chunk in payloads.chunks(batch_size.max(1)) {
        match store.create_attributes_batch(chunk.to_vec()).await {
            Ok(created) => write.rows.extend(created),
            Err(e) => {
                write.error = Some(e);
                break;
            }
        }
    }
    write
}
