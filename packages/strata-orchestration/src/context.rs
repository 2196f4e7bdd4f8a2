//! Per-call synchronization context
//!
//! A `SyncContext` is owned by one top-level call (a cascade, a population
//! run, a reconcile run) and handed down by `&mut`. It caches the reads a
//! multi-layer call repeats and funnels every insert through one place so the
//! compensation log sees all of them.
//!
//! A cache entry, once present, is the complete list for its key: rows created
//! through the context are appended, rows deleted through it are dropped.

use std::collections::HashMap;

use strata_storage::{
    Attribute, AttributeId, CanonicalRelationship, DataModel, DataObject, ModelId, ModelObject,
    ModelStore, NewAttribute, NewCanonicalRelationship, NewDataModel, NewDataObject,
    NewModelObject, NewRelationship, ObjectId, Relationship,
};
use tracing::debug;

use crate::compensation::{CompensatingAction, CompensationLog};
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
pub struct SyncContext {
    objects_by_model: HashMap<ModelId, Vec<DataObject>>,
    attributes_by_object: HashMap<ObjectId, Vec<Attribute>>,
    catalog: Option<Vec<DataModel>>,
    pub compensation: CompensationLog,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Cached reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Whole model catalog, loaded once per context
    pub async fn catalog(&mut self, store: &dyn ModelStore) -> Result<Vec<DataModel>> {
        if let Some(models) = &self.catalog {
            return Ok(models.clone());
        }
        let models = store.list_data_models().await?;
        debug!("Loaded model catalog ({} models)", models.len());
        self.catalog = Some(models.clone());
        Ok(models)
    }

    pub async fn model(&mut self, store: &dyn ModelStore, model_id: ModelId) -> Result<DataModel> {
        if let Some(model) = self
            .catalog
            .as_ref()
            .and_then(|models| models.iter().find(|m| m.id == model_id))
        {
            return Ok(model.clone());
        }
        store
            .get_data_model(model_id)
            .await?
            .ok_or(SyncError::ModelNotFound(model_id))
    }

    pub async fn objects_in(
        &mut self,
        store: &dyn ModelStore,
        model_id: ModelId,
    ) -> Result<Vec<DataObject>> {
        if let Some(objects) = self.objects_by_model.get(&model_id) {
            return Ok(objects.clone());
        }
        let objects = store.get_data_objects_by_model(model_id).await?;
        self.objects_by_model.insert(model_id, objects.clone());
        Ok(objects)
    }

    pub async fn attributes_of(
        &mut self,
        store: &dyn ModelStore,
        object_id: ObjectId,
    ) -> Result<Vec<Attribute>> {
        if let Some(attributes) = self.attributes_by_object.get(&object_id) {
            return Ok(attributes.clone());
        }
        let attributes = store.get_attributes_by_object(object_id).await?;
        self.attributes_by_object
            .insert(object_id, attributes.clone());
        Ok(attributes)
    }

    pub async fn object(&mut self, store: &dyn ModelStore, object_id: ObjectId) -> Result<DataObject> {
        if let Some(object) = self
            .objects_by_model
            .values()
            .flatten()
            .find(|o| o.id == object_id)
        {
            return Ok(object.clone());
        }
        store
            .get_data_object(object_id)
            .await?
            .ok_or(SyncError::ObjectNotFound(object_id))
    }

    pub async fn attribute(
        &mut self,
        store: &dyn ModelStore,
        attribute_id: AttributeId,
    ) -> Result<Attribute> {
        if let Some(attribute) = self
            .attributes_by_object
            .values()
            .flatten()
            .find(|a| a.id == attribute_id)
        {
            return Ok(attribute.clone());
        }
        store
            .get_attribute(attribute_id)
            .await?
            .ok_or(SyncError::AttributeNotFound(attribute_id))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Cache maintenance
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Drop every cached read for a model so the next read sees storage
    pub fn invalidate_model(&mut self, model_id: ModelId) {
        if let Some(objects) = self.objects_by_model.remove(&model_id) {
            for object in objects {
                self.attributes_by_object.remove(&object.id);
            }
        }
    }

    pub fn replace_object(&mut self, object: &DataObject) {
        if let Some(cached) = self
            .objects_by_model
            .get_mut(&object.model_id)
            .and_then(|objects| objects.iter_mut().find(|o| o.id == object.id))
        {
            *cached = object.clone();
        }
    }

    pub fn replace_attribute(&mut self, attribute: &Attribute) {
        if let Some(cached) = self
            .attributes_by_object
            .get_mut(&attribute.object_id)
            .and_then(|attrs| attrs.iter_mut().find(|a| a.id == attribute.id))
        {
            *cached = attribute.clone();
        }
    }

    pub fn forget_object(&mut self, object_id: ObjectId) {
        for objects in self.objects_by_model.values_mut() {
            objects.retain(|o| o.id != object_id);
        }
        self.attributes_by_object.remove(&object_id);
        self.compensation
            .forget(CompensatingAction::DeleteObject(object_id));
    }

    pub fn forget_attribute(&mut self, attribute_id: AttributeId) {
        for attributes in self.attributes_by_object.values_mut() {
            attributes.retain(|a| a.id != attribute_id);
        }
        self.compensation
            .forget(CompensatingAction::DeleteAttribute(attribute_id));
    }

    fn push_object(&mut self, object: &DataObject) {
        if let Some(objects) = self.objects_by_model.get_mut(&object.model_id) {
            objects.push(object.clone());
        }
        // A fresh object has no attributes yet, so an empty entry is complete
        self.attributes_by_object.entry(object.id).or_default();
    }

    fn push_attribute(&mut self, attribute: &Attribute) {
        if let Some(attributes) = self.attributes_by_object.get_mut(&attribute.object_id) {
            attributes.push(attribute.clone());
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Recorded writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn create_model(
        &mut self,
        store: &dyn ModelStore,
        payload: NewDataModel,
    ) -> Result<DataModel> {
        let model = store.create_data_model(payload).await?;
        self.compensation
            .record(CompensatingAction::DeleteModel(model.id));
        if let Some(models) = self.catalog.as_mut() {
            models.push(model.clone());
        }
        // Nothing can live in a model created a moment ago
        self.objects_by_model.insert(model.id, Vec::new());
        Ok(model)
    }

    pub async fn create_object(
        &mut self,
        store: &dyn ModelStore,
        payload: NewDataObject,
    ) -> Result<DataObject> {
        let object = store.create_data_object(payload).await?;
        self.compensation
            .record(CompensatingAction::DeleteObject(object.id));
        self.push_object(&object);
        Ok(object)
    }

    pub async fn create_objects_batch(
        &mut self,
        store: &dyn ModelStore,
        payloads: Vec<NewDataObject>,
    ) -> Result<Vec<DataObject>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let objects = store.create_data_objects_batch(payloads).await?;
        self.record_objects(&objects);
        Ok(objects)
    }

    /// Register objects inserted outside the context (concurrent batches)
    pub fn record_objects(&mut self, objects: &[DataObject]) {
        for object in objects {
            self.compensation
                .record(CompensatingAction::DeleteObject(object.id));
            self.push_object(object);
        }
    }

    pub async fn create_attribute(
        &mut self,
        store: &dyn ModelStore,
        payload: NewAttribute,
    ) -> Result<Attribute> {
        let attribute = store.create_attribute(payload).await?;
        self.compensation
            .record(CompensatingAction::DeleteAttribute(attribute.id));
        self.push_attribute(&attribute);
        Ok(attribute)
    }

    pub async fn create_attributes_batch(
        &mut self,
        store: &dyn ModelStore,
        payloads: Vec<NewAttribute>,
    ) -> Result<Vec<Attribute>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let attributes = store.create_attributes_batch(payloads).await?;
        self.record_attributes(&attributes);
        Ok(attributes)
    }

    pub fn record_attributes(&mut self, attributes: &[Attribute]) {
        for attribute in attributes {
            self.compensation
                .record(CompensatingAction::DeleteAttribute(attribute.id));
            self.push_attribute(attribute);
        }
    }

    pub async fn create_model_object(
        &mut self,
        store: &dyn ModelStore,
        payload: NewModelObject,
    ) -> Result<ModelObject> {
        let model_object = store.create_data_model_object(payload).await?;
        self.compensation
            .record(CompensatingAction::DeleteModelObject(model_object.id));
        Ok(model_object)
    }

    pub fn record_model_objects(&mut self, model_objects: &[ModelObject]) {
        for model_object in model_objects {
            self.compensation
                .record(CompensatingAction::DeleteModelObject(model_object.id));
        }
    }

    pub async fn create_relationship(
        &mut self,
        store: &dyn ModelStore,
        payload: NewRelationship,
    ) -> Result<Relationship> {
        let relationship = store.create_relationship(payload).await?;
        self.compensation
            .record(CompensatingAction::DeleteRelationship(relationship.id));
        Ok(relationship)
    }

    pub async fn create_canonical(
        &mut self,
        store: &dyn ModelStore,
        payload: NewCanonicalRelationship,
    ) -> Result<CanonicalRelationship> {
        let canonical = store.create_canonical_relationship(payload).await?;
        self.compensation
            .record(CompensatingAction::DeleteCanonical(canonical.id));
        Ok(canonical)
    }
}
