/*
 * Strata Orchestration - Multi-layer entity model synchronization
 *
 * Keeps the conceptual, logical and physical layers of a model family in
 * step with each other.
 *
 * Components:
 * - Model Family Resolver (family.rs)
 * - Layer Replicator (replicator.rs)
 * - Relationship Synchronizer (relationships.rs)
 * - Cascade Orchestrator (cascade.rs)
 * - Desired-State Reconciler (reconciler/)
 * - Batch population (population.rs)
 *
 * Every entry point holds the family lock; multi-step writes are
 * compensated on failure.
 */

// Public modules
pub mod cascade;
pub mod compensation;
pub mod config;
pub mod context;
pub mod error;
pub mod family;
pub mod locks;
pub mod naming;
pub mod population;
pub mod reconciler;
pub mod relationships;
pub mod replicator;
pub mod telemetry;

// Re-exports
pub use cascade::{
    CascadeOrchestrator, CascadeResult, CreateObjectRequest, DeleteOptions, DeletionReport,
    LayerObjects, ObjectRef, RelationshipInput,
};
pub use compensation::{CompensatingAction, CompensationLog, PartialFailureReport};
pub use config::{CascadeConfig, ConfigError, ReconcilerConfig, RelationshipConfig, SyncConfig};
pub use context::SyncContext;
pub use error::{ErrorCategory, Result, SyncError};
pub use family::{family_from_catalog, FamilyResolver, FamilySeed, ModelFamily};
pub use locks::FamilyLocks;
pub use naming::{names_match, normalize_name};
pub use population::{FamilyPopulator, PopulateRequest, PopulateResult};
pub use reconciler::{
    DesiredStateGenerator, DiffAction, DiffEntry, DiffStatus, GenerationPrompt, Issue,
    ReconcileRequest, ReconcileResult, Reconciler, Severity, StaticGenerator, ValidatedResponse,
};
pub use relationships::{
    decide_layer_level, LayerDecision, RelationshipEdit, RelationshipSynchronizer, SkipReason,
    SkippedLayer, SyncOutcome, SyncScope,
};
pub use replicator::{
    AttributeInput, LayerConfig, LayerReplicator, ObjectInput, ReplicatedObject,
    ReplicationRequest, TypeProjections,
};
pub use telemetry::init_tracing;
