//! Common test utilities for strata-orchestration
//!
//! Every test runs against a fresh in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use strata_orchestration::{
    AttributeInput, CascadeOrchestrator, CreateObjectRequest, FamilyLocks, FamilyPopulator,
    FamilyResolver, FamilySeed, ModelFamily, ObjectInput, Reconciler, RelationshipSynchronizer,
    StaticGenerator, SyncConfig, SyncContext,
};
use strata_storage::{
    Attribute, DataObject, InMemoryModelStore, ModelId, ModelStore, ObjectId, Relationship,
};

pub struct Engine {
    pub store: Arc<InMemoryModelStore>,
    pub locks: Arc<FamilyLocks>,
    pub config: SyncConfig,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            store: Arc::new(InMemoryModelStore::new()),
            locks: Arc::new(FamilyLocks::new()),
            config,
        }
    }

    pub fn cascade(&self) -> CascadeOrchestrator {
        CascadeOrchestrator::new(self.store.clone(), self.locks.clone(), self.config.clone())
    }

    pub fn synchronizer(&self) -> RelationshipSynchronizer {
        RelationshipSynchronizer::new(
            self.store.clone(),
            self.locks.clone(),
            self.config.relationships.clone(),
            self.config.cascade.rollback_on_failure,
        )
    }

    pub fn populator(&self) -> FamilyPopulator {
        FamilyPopulator::new(self.store.clone(), self.locks.clone(), self.config.clone())
    }

    pub fn reconciler(&self, generator: Arc<StaticGenerator>) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            generator,
            self.locks.clone(),
            self.config.clone(),
        )
    }

    /// Complete conceptual/logical/physical family named `name`
    pub async fn family(&self, name: &str) -> ModelFamily {
        let resolver = FamilyResolver::new(self.store.clone());
        let mut ctx = SyncContext::new();
        resolver
            .ensure_family(&mut ctx, FamilySeed::Name(name.to_string()))
            .await
            .expect("family setup failed")
    }

    /// Create `name` with attributes in `model_id`, cascading into lower layers
    pub async fn create(
        &self,
        model_id: ModelId,
        name: &str,
        attributes: Vec<AttributeInput>,
    ) -> DataObject {
        self.cascade()
            .create_object_with_cascade(
                CreateObjectRequest::new(model_id, ObjectInput::new(name)).with_attributes(attributes),
            )
            .await
            .expect("cascade create failed")
            .primary_object
    }

    pub async fn objects(&self, model_id: ModelId) -> Vec<DataObject> {
        self.store.get_data_objects_by_model(model_id).await.unwrap()
    }

    pub async fn object_named(&self, model_id: ModelId, name: &str) -> Option<DataObject> {
        self.objects(model_id)
            .await
            .into_iter()
            .find(|o| o.name == name)
    }

    pub async fn attributes(&self, object_id: ObjectId) -> Vec<Attribute> {
        self.store.get_attributes_by_object(object_id).await.unwrap()
    }

    pub async fn attribute_named(&self, object_id: ObjectId, name: &str) -> Attribute {
        self.attributes(object_id)
            .await
            .into_iter()
            .find(|a| a.name == name)
            .unwrap_or_else(|| panic!("attribute {} missing on object {}", name, object_id))
    }

    pub async fn relationships(&self, model_id: ModelId) -> Vec<Relationship> {
        self.store.get_relationships_by_model(model_id).await.unwrap()
    }
}

/// `id: Number [pk]`, `email: Text`
pub fn customer_attributes() -> Vec<AttributeInput> {
    vec![
        AttributeInput::new("id", "Number").primary_key(),
        AttributeInput::new("email", "Text"),
    ]
}

/// `id: Number [pk]`, `customer_id: Number [fk]`
pub fn order_attributes() -> Vec<AttributeInput> {
    vec![
        AttributeInput::new("id", "Number").primary_key(),
        AttributeInput::new("customer_id", "Number").foreign_key(),
    ]
}
