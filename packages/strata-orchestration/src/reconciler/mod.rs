//! Desired-state reconciliation
//!
//! One run:
//!
//! 1. load or create the family and snapshot it (capped)
//! 2. ask the generator for the desired state
//! 3. validate the answer ([`schema::ValidatedResponse::parse`]); a failure
//!    aborts the run with no diff
//! 4. apply entities and attributes layer by layer, then relationships
//! 5. run the consistency checks
//! 6. derive migration hints from the applied diff
//!
//! Removals are applied only when the request allows drops.

pub mod consistency;
pub mod generator;
pub mod hints;
pub mod layer_sync;
pub mod schema;
pub mod snapshot;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_storage::{Layer, ModelId, ModelStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cascade::CascadeOrchestrator;
use crate::compensation::settle_result;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::family::{FamilyResolver, FamilySeed, ModelFamily};
use crate::locks::FamilyLocks;
use crate::relationships::RelationshipSynchronizer;
use crate::replicator::LayerReplicator;

pub use consistency::{check_layer, find_cycles, Issue, LayerGraph, Severity};
pub use generator::{DesiredStateGenerator, GenerationPrompt, StaticGenerator, DEFAULT_SYSTEM_PROMPT};
pub use hints::migration_hints;
pub use layer_sync::{DiffAction, DiffEntry, DiffStatus};
pub use schema::{LayerBlock, SchemaError, SqlBlock, ValidatedResponse};
pub use snapshot::ContextSnapshot;

use layer_sync::{LayerSync, SyncReport};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Any member of an existing family
    pub root_model_id: Option<ModelId>,
    /// Conceptual model to find or create when no id is given
    pub model_name: Option<String>,
    pub business_description: String,
    pub instructions: Option<String>,
    /// Sole authority over destructive changes
    pub allow_drop: bool,
    pub target_database: Option<String>,
}

impl ReconcileRequest {
    pub fn for_model(root_model_id: ModelId, business_description: impl Into<String>) -> Self {
        Self {
            root_model_id: Some(root_model_id),
            business_description: business_description.into(),
            ..Default::default()
        }
    }

    pub fn named(model_name: impl Into<String>, business_description: impl Into<String>) -> Self {
        Self {
            model_name: Some(model_name.into()),
            business_description: business_description.into(),
            ..Default::default()
        }
    }

    pub fn allow_drop(mut self, allow_drop: bool) -> Self {
        self.allow_drop = allow_drop;
        self
    }

    fn seed(&self) -> Result<FamilySeed> {
        match (self.root_model_id, &self.model_name) {
            (Some(model_id), _) => Ok(FamilySeed::Model(model_id)),
            (None, Some(name)) => Ok(FamilySeed::Name(name.clone())),
            (None, None) => Err(SyncError::invalid_request(
                "either root_model_id or model_name is required",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub run_id: Uuid,
    pub family: ModelFamily,
    pub summary: String,
    pub assumptions: Vec<String>,
    pub conceptual_model: LayerBlock,
    pub logical_model: LayerBlock,
    pub physical_model: LayerBlock,
    pub sql: SqlBlock,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    pub diff: Vec<DiffEntry>,
}

impl ReconcileResult {
    pub fn applied(&self) -> impl Iterator<Item = &DiffEntry> {
        self.diff.iter().filter(|e| e.is_applied())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &DiffEntry> {
        self.diff.iter().filter(|e| !e.is_applied())
    }
}

pub struct Reconciler {
    store: Arc<dyn ModelStore>,
    resolver: FamilyResolver,
    replicator: LayerReplicator,
    cascade: CascadeOrchestrator,
    synchronizer: RelationshipSynchronizer,
    generator: Arc<dyn DesiredStateGenerator>,
    locks: Arc<FamilyLocks>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ModelStore>,
        generator: Arc<dyn DesiredStateGenerator>,
        locks: Arc<FamilyLocks>,
        config: SyncConfig,
    ) -> Self {
        Self {
            resolver: FamilyResolver::new(store.clone()),
            replicator: LayerReplicator::new(store.clone()),
            cascade: CascadeOrchestrator::new(store.clone(), locks.clone(), config.clone()),
            synchronizer: RelationshipSynchronizer::new(
                store.clone(),
                locks.clone(),
                config.relationships.clone(),
                config.cascade.rollback_on_failure,
            ),
            store,
            generator,
            locks,
            config,
        }
    }

    pub async fn run(&self, request: ReconcileRequest) -> Result<ReconcileResult> {
        if request.business_description.trim().is_empty() {
            return Err(SyncError::invalid_request("business description must not be empty"));
        }
        let seed = request.seed()?;
        let store = self.store.as_ref();
        let run_id = Uuid::new_v4();

        // Family setup is kept even when the run fails later
        let mut setup = SyncContext::new();
        let root_id = match seed {
            FamilySeed::Model(model_id) => self.resolver.root_of(&mut setup, model_id).await?,
            seed @ FamilySeed::Name(_) => self.resolver.ensure_family(&mut setup, seed).await?.root_id(),
        };
        let _guard = self.locks.acquire(root_id).await;
        let family = self
            .resolver
            .ensure_family(&mut setup, FamilySeed::Model(root_id))
            .await?;

        info!(
            "Reconcile run {} on family {} (allow_drop={})",
            run_id, root_id, request.allow_drop
        );

        let mut ctx = SyncContext::new();
        let snapshot = ContextSnapshot::build(&mut ctx, store, &family, &self.config.reconciler).await?;
        if snapshot.is_truncated() {
            info!("Context for family {} was truncated", root_id);
        }

        let target_database = request
            .target_database
            .clone()
            .unwrap_or_else(|| self.config.reconciler.default_target_database.clone());
        let prompt = GenerationPrompt {
            system_prompt: self
                .config
                .reconciler
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            serialized_context: snapshot.to_json()?,
            business_description: request.business_description.clone(),
            instructions: request.instructions.clone(),
            allow_drop: request.allow_drop,
            target_database: target_database.clone(),
        };

        let raw = self.generator.generate(&prompt).await?;
        let response = ValidatedResponse::parse(&raw).map_err(|e| {
            warn!("Run {}: generated response rejected: {}", run_id, e);
            SyncError::Schema(e)
        })?;

        let mut step = String::new();
        let result = self
            .apply(&mut ctx, &family, &response, &snapshot, request.allow_drop, &mut step)
            .await;
        let mut report = settle_result(
            &mut ctx.compensation,
            store,
            self.config.cascade.rollback_on_failure,
            &step,
            result,
        )
        .await?;

        report.issues.extend(self.check_family(&family).await?);

        let mut issues: Vec<Issue> = response
            .issues
            .iter()
            .map(|issue| Issue {
                entity: issue.entity.clone(),
                ..Issue::new(issue.severity, issue.message.clone())
            })
            .collect();
        issues.append(&mut report.issues);

        let mut seen = HashSet::new();
        let suggestions: Vec<String> = migration_hints(&report.diff)
            .into_iter()
            .chain(response.suggestions.iter().cloned())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        let mut sql = response.sql.clone();
        if sql.dialect.is_none() {
            sql.dialect = Some(target_database);
        }

        info!(
            "Reconcile run {} finished: {} applied, {} skipped, {} issues",
            run_id,
            report.diff.iter().filter(|e| e.is_applied()).count(),
            report.diff.iter().filter(|e| !e.is_applied()).count(),
            issues.len()
        );

        Ok(ReconcileResult {
            run_id,
            family,
            summary: response.summary,
            assumptions: response.assumptions,
            conceptual_model: response.conceptual_model,
            logical_model: response.logical_model,
            physical_model: response.physical_model,
            sql,
            issues,
            suggestions,
            diff: report.diff,
        })
    }

    async fn apply(
        &self,
        ctx: &mut SyncContext,
        family: &ModelFamily,
        response: &ValidatedResponse,
        snapshot: &ContextSnapshot,
        allow_drop: bool,
        step: &mut String,
    ) -> Result<SyncReport> {
        let sync = LayerSync {
            store: self.store.as_ref(),
            replicator: &self.replicator,
            cascade: &self.cascade,
            synchronizer: &self.synchronizer,
            snapshot,
            allow_drop,
        };
        let mut report = SyncReport::default();

        for layer in Layer::ALL {
            *step = format!("sync {} layer", layer);
            sync.apply_layer(ctx, family, layer, response.block(layer), &mut report)
                .await?;
        }

        *step = "sync relationships".to_string();
        sync.apply_relationships(ctx, family, response, &mut report)
            .await?;

        Ok(report)
    }

    /// Consistency checks over every layer model, read fresh from storage
    pub async fn check_family(&self, family: &ModelFamily) -> Result<Vec<Issue>> {
        let store = self.store.as_ref();
        let mut issues = Vec::new();

        for model in family.layer_models() {
            let objects = store.get_data_objects_by_model(model.id).await?;
            let mut attributes = HashMap::new();
            for object in &objects {
                attributes.insert(object.id, store.get_attributes_by_object(object.id).await?);
            }
            let relationships = store.get_relationships_by_model(model.id).await?;

            issues.extend(check_layer(&LayerGraph {
                layer: model.layer,
                objects: &objects,
                attributes: &attributes,
                relationships: &relationships,
            }));
        }

        Ok(issues)
    }
}
