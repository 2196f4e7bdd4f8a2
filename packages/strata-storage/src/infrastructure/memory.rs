//! In-Memory Model Store
//!
//! BTreeMap-backed implementation used by tests and embedders that keep the
//! model in process. Ids are allocated from one shared counter, so ids are
//! unique across tables.
//!
//! Failpoints make a named operation fail with a database error, which lets
//! callers exercise partial-failure paths.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::domain::models::*;
use crate::domain::ports::ModelStore;
use crate::error::{Result, StorageError};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    models: BTreeMap<ModelId, DataModel>,
    objects: BTreeMap<ObjectId, DataObject>,
    attributes: BTreeMap<AttributeId, Attribute>,
    model_objects: BTreeMap<ModelObjectId, ModelObject>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    canonical: BTreeMap<CanonicalId, CanonicalRelationship>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_model(&self, model_id: ModelId) -> Result<()> {
        if self.models.contains_key(&model_id) {
            Ok(())
        } else {
            Err(StorageError::not_found("data_model", model_id))
        }
    }

    fn require_object(&self, object_id: ObjectId) -> Result<()> {
        if self.objects.contains_key(&object_id) {
            Ok(())
        } else {
            Err(StorageError::not_found("data_object", object_id))
        }
    }

    fn insert_object(&mut self, object: NewDataObject) -> Result<DataObject> {
        self.require_model(object.model_id)?;
        let now = Utc::now();
        let row = DataObject {
            id: self.allocate_id(),
            model_id: object.model_id,
            name: object.name,
            description: object.description,
            object_type: object.object_type,
            domain_id: object.domain_id,
            data_area_id: object.data_area_id,
            target_system_id: object.target_system_id,
            position: object.position,
            is_visible: object.is_visible,
            provenance: object.provenance,
            metadata: object.metadata,
            created_at: now,
            updated_at: now,
        };
        self.objects.insert(row.id, row.clone());
        Ok(row)
    }

    fn insert_attribute(&mut self, attribute: NewAttribute) -> Result<Attribute> {
        self.require_object(attribute.object_id)?;
        let row = Attribute {
            id: self.allocate_id(),
            object_id: attribute.object_id,
            name: attribute.name,
            description: attribute.description,
            data_type: attribute.data_type,
            conceptual_type: attribute.conceptual_type,
            logical_type: attribute.logical_type,
            physical_type: attribute.physical_type,
            length: attribute.length,
            precision: attribute.precision,
            scale: attribute.scale,
            nullable: attribute.nullable,
            is_primary_key: attribute.is_primary_key,
            is_foreign_key: attribute.is_foreign_key,
            order_index: attribute.order_index,
            origin_attribute_id: attribute.origin_attribute_id,
            created_at: Utc::now(),
        };
        self.attributes.insert(row.id, row.clone());
        Ok(row)
    }

    fn insert_model_object(&mut self, model_object: NewModelObject) -> Result<ModelObject> {
        self.require_model(model_object.model_id)?;
        self.require_object(model_object.object_id)?;
        let row = ModelObject {
            id: self.allocate_id(),
            model_id: model_object.model_id,
            object_id: model_object.object_id,
            position: model_object.position,
            target_system_id: model_object.target_system_id,
            is_visible: model_object.is_visible,
        };
        self.model_objects.insert(row.id, row.clone());
        Ok(row)
    }

    fn insert_relationship(&mut self, relationship: NewRelationship) -> Result<Relationship> {
        self.require_model(relationship.model_id)?;
        self.require_object(relationship.source_object_id)?;
        self.require_object(relationship.target_object_id)?;
        let now = Utc::now();
        let row = Relationship {
            id: self.allocate_id(),
            model_id: relationship.model_id,
            layer: relationship.layer,
            source_object_id: relationship.source_object_id,
            target_object_id: relationship.target_object_id,
            level: relationship.level,
            relationship_type: relationship.relationship_type,
            source_handle: relationship.source_handle,
            target_handle: relationship.target_handle,
            name: relationship.name,
            description: relationship.description,
            canonical_id: relationship.canonical_id,
            created_at: now,
            updated_at: now,
        };
        self.relationships.insert(row.id, row.clone());
        Ok(row)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryModelStore {
    tables: Arc<RwLock<Tables>>,
    failpoints: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` (trait method name) fail
    pub fn fail_on(&self, operation: &str) {
        self.failpoints.write().insert(operation.to_string());
    }

    /// Remove every failpoint
    pub fn clear_failpoints(&self) {
        self.failpoints.write().clear();
    }

    fn check_failpoint(&self, operation: &str) -> Result<()> {
        if self.failpoints.read().contains(operation) {
            debug!("failpoint hit: {}", operation);
            return Err(StorageError::database(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn get_data_model(&self, model_id: ModelId) -> Result<Option<DataModel>> {
        self.check_failpoint("get_data_model")?;
        Ok(self.tables.read().models.get(&model_id).cloned())
    }

    async fn list_data_models(&self) -> Result<Vec<DataModel>> {
        self.check_failpoint("list_data_models")?;
        Ok(self.tables.read().models.values().cloned().collect())
    }

    async fn create_data_model(&self, model: NewDataModel) -> Result<DataModel> {
        self.check_failpoint("create_data_model")?;
        let mut tables = self.tables.write();
        if let Some(parent_id) = model.parent_model_id {
            tables.require_model(parent_id)?;
        }
        let row = DataModel {
            id: tables.allocate_id(),
            name: model.name,
            layer: model.layer,
            parent_model_id: model.parent_model_id,
            domain_id: model.domain_id,
            data_area_id: model.data_area_id,
            target_system_id: model.target_system_id,
            created_at: Utc::now(),
        };
        tables.models.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_data_object(&self, object_id: ObjectId) -> Result<Option<DataObject>> {
        self.check_failpoint("get_data_object")?;
        Ok(self.tables.read().objects.get(&object_id).cloned())
    }

    async fn get_data_objects_by_model(&self, model_id: ModelId) -> Result<Vec<DataObject>> {
        self.check_failpoint("get_data_objects_by_model")?;
        Ok(self
            .tables
            .read()
            .objects
            .values()
            .filter(|o| o.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn get_replicas_of(&self, origin_object_id: ObjectId) -> Result<Vec<DataObject>> {
        self.check_failpoint("get_replicas_of")?;
        Ok(self
            .tables
            .read()
            .objects
            .values()
            .filter(|o| {
                o.provenance
                    .map(|p| p.origin_object_id == origin_object_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn create_data_object(&self, object: NewDataObject) -> Result<DataObject> {
        self.check_failpoint("create_data_object")?;
        self.tables.write().insert_object(object)
    }

    async fn create_data_objects_batch(
        &self,
        objects: Vec<NewDataObject>,
    ) -> Result<Vec<DataObject>> {
        self.check_failpoint("create_data_objects_batch")?;
        let mut tables = self.tables.write();
        for object in &objects {
            tables.require_model(object.model_id)?;
        }
        objects
            .into_iter()
            .map(|object| tables.insert_object(object))
            .collect()
    }

    async fn update_data_object(
        &self,
        object_id: ObjectId,
        patch: DataObjectPatch,
    ) -> Result<DataObject> {
        self.check_failpoint("update_data_object")?;
        let mut tables = self.tables.write();
        let object = tables
            .objects
            .get_mut(&object_id)
            .ok_or_else(|| StorageError::not_found("data_object", object_id))?;
        patch.apply(object);
        object.updated_at = Utc::now();
        Ok(object.clone())
    }

    async fn delete_data_object(&self, object_id: ObjectId) -> Result<()> {
        self.check_failpoint("delete_data_object")?;
        self.tables
            .write()
            .objects
            .remove(&object_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("data_object", object_id))
    }

    async fn get_attribute(&self, attribute_id: AttributeId) -> Result<Option<Attribute>> {
        self.check_failpoint("get_attribute")?;
        Ok(self.tables.read().attributes.get(&attribute_id).cloned())
    }

    async fn get_attributes_by_object(&self, object_id: ObjectId) -> Result<Vec<Attribute>> {
        self.check_failpoint("get_attributes_by_object")?;
        let mut attributes: Vec<Attribute> = self
            .tables
            .read()
            .attributes
            .values()
            .filter(|a| a.object_id == object_id)
            .cloned()
            .collect();
        attributes.sort_by_key(|a| (a.order_index, a.id));
        Ok(attributes)
    }

    async fn create_attribute(&self, attribute: NewAttribute) -> Result<Attribute> {
        self.check_failpoint("create_attribute")?;
        self.tables.write().insert_attribute(attribute)
    }

    async fn create_attributes_batch(
        &self,
        attributes: Vec<NewAttribute>,
    ) -> Result<Vec<Attribute>> {
        self.check_failpoint("create_attributes_batch")?;
        let mut tables = self.tables.write();
        for attribute in &attributes {
            tables.require_object(attribute.object_id)?;
        }
        attributes
            .into_iter()
            .map(|attribute| tables.insert_attribute(attribute))
            .collect()
    }

    async fn update_attribute(
        &self,
        attribute_id: AttributeId,
        patch: AttributePatch,
    ) -> Result<Attribute> {
        self.check_failpoint("update_attribute")?;
        let mut tables = self.tables.write();
        let attribute = tables
            .attributes
            .get_mut(&attribute_id)
            .ok_or_else(|| StorageError::not_found("attribute", attribute_id))?;
        patch.apply(attribute);
        Ok(attribute.clone())
    }

    async fn delete_attribute(&self, attribute_id: AttributeId) -> Result<()> {
        self.check_failpoint("delete_attribute")?;
        self.tables
            .write()
            .attributes
            .remove(&attribute_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("attribute", attribute_id))
    }

    async fn get_data_model_objects_by_model(
        &self,
        model_id: ModelId,
    ) -> Result<Vec<ModelObject>> {
        self.check_failpoint("get_data_model_objects_by_model")?;
        Ok(self
            .tables
            .read()
            .model_objects
            .values()
            .filter(|mo| mo.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn get_model_objects_by_object(&self, object_id: ObjectId) -> Result<Vec<ModelObject>> {
        self.check_failpoint("get_model_objects_by_object")?;
        Ok(self
            .tables
            .read()
            .model_objects
            .values()
            .filter(|mo| mo.object_id == object_id)
            .cloned()
            .collect())
    }

    async fn create_data_model_object(&self, model_object: NewModelObject) -> Result<ModelObject> {
        self.check_failpoint("create_data_model_object")?;
        self.tables.write().insert_model_object(model_object)
    }

    async fn create_data_model_objects_batch(
        &self,
        model_objects: Vec<NewModelObject>,
    ) -> Result<Vec<ModelObject>> {
        self.check_failpoint("create_data_model_objects_batch")?;
        let mut tables = self.tables.write();
        for model_object in &model_objects {
            tables.require_model(model_object.model_id)?;
            tables.require_object(model_object.object_id)?;
        }
        model_objects
            .into_iter()
            .map(|model_object| tables.insert_model_object(model_object))
            .collect()
    }

    async fn update_data_model_object(
        &self,
        model_object_id: ModelObjectId,
        patch: ModelObjectPatch,
    ) -> Result<ModelObject> {
        self.check_failpoint("update_data_model_object")?;
        let mut tables = self.tables.write();
        let row = tables
            .model_objects
            .get_mut(&model_object_id)
            .ok_or_else(|| StorageError::not_found("data_model_object", model_object_id))?;
        if let Some(position) = patch.position {
            row.position = Some(position);
        }
        if let Some(target_system_id) = patch.target_system_id {
            row.target_system_id = Some(target_system_id);
        }
        if let Some(is_visible) = patch.is_visible {
            row.is_visible = is_visible;
        }
        Ok(row.clone())
    }

    async fn delete_data_model_object(&self, model_object_id: ModelObjectId) -> Result<()> {
        self.check_failpoint("delete_data_model_object")?;
        self.tables
            .write()
            .model_objects
            .remove(&model_object_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("data_model_object", model_object_id))
    }

    async fn get_relationships_by_model(&self, model_id: ModelId) -> Result<Vec<Relationship>> {
        self.check_failpoint("get_relationships_by_model")?;
        Ok(self
            .tables
            .read()
            .relationships
            .values()
            .filter(|r| r.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn get_relationships_by_object(
        &self,
        object_id: ObjectId,
    ) -> Result<Vec<Relationship>> {
        self.check_failpoint("get_relationships_by_object")?;
        Ok(self
            .tables
            .read()
            .relationships
            .values()
            .filter(|r| r.touches_object(object_id))
            .cloned()
            .collect())
    }

    async fn create_relationship(&self, relationship: NewRelationship) -> Result<Relationship> {
        self.check_failpoint("create_relationship")?;
        self.tables.write().insert_relationship(relationship)
    }

    async fn create_relationships_batch(
        &self,
        relationships: Vec<NewRelationship>,
    ) -> Result<Vec<Relationship>> {
        self.check_failpoint("create_relationships_batch")?;
        let mut tables = self.tables.write();
        for relationship in &relationships {
            tables.require_model(relationship.model_id)?;
            tables.require_object(relationship.source_object_id)?;
            tables.require_object(relationship.target_object_id)?;
        }
        relationships
            .into_iter()
            .map(|relationship| tables.insert_relationship(relationship))
            .collect()
    }

    async fn update_relationship(
        &self,
        relationship_id: RelationshipId,
        patch: RelationshipPatch,
    ) -> Result<Relationship> {
        self.check_failpoint("update_relationship")?;
        let mut tables = self.tables.write();
        let row = tables
            .relationships
            .get_mut(&relationship_id)
            .ok_or_else(|| StorageError::not_found("relationship", relationship_id))?;
        if let Some(level) = patch.level {
            row.level = level;
        }
        if let Some(relationship_type) = patch.relationship_type {
            row.relationship_type = relationship_type;
        }
        if let Some(handle) = patch.source_handle {
            row.source_handle = Some(handle);
        }
        if let Some(handle) = patch.target_handle {
            row.target_handle = Some(handle);
        }
        if let Some(name) = patch.name {
            row.name = Some(name);
        }
        if let Some(description) = patch.description {
            row.description = Some(description);
        }
        if let Some(canonical_id) = patch.canonical_id {
            row.canonical_id = Some(canonical_id);
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete_relationship(&self, relationship_id: RelationshipId) -> Result<()> {
        self.check_failpoint("delete_relationship")?;
        self.tables
            .write()
            .relationships
            .remove(&relationship_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("relationship", relationship_id))
    }

    async fn list_canonical_relationships(&self) -> Result<Vec<CanonicalRelationship>> {
        self.check_failpoint("list_canonical_relationships")?;
        Ok(self.tables.read().canonical.values().cloned().collect())
    }

    async fn create_canonical_relationship(
        &self,
        relationship: NewCanonicalRelationship,
    ) -> Result<CanonicalRelationship> {
        self.check_failpoint("create_canonical_relationship")?;
        let mut tables = self.tables.write();
        let key = relationship.key();
        if tables.canonical.values().any(|c| c.key() == key) {
            return Err(StorageError::conflict(format!(
                "canonical relationship {} -> {} ({}) already exists",
                key.source_object_id,
                key.target_object_id,
                key.level.kind().as_str()
            )));
        }
        let row = CanonicalRelationship {
            id: tables.allocate_id(),
            source_object_id: relationship.source_object_id,
            target_object_id: relationship.target_object_id,
            level: relationship.level,
            relationship_type: relationship.relationship_type,
            name: relationship.name,
            description: relationship.description,
            created_at: Utc::now(),
        };
        tables.canonical.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_canonical_relationship(&self, canonical_id: CanonicalId) -> Result<()> {
        self.check_failpoint("delete_canonical_relationship")?;
        self.tables
            .write()
            .canonical
            .remove(&canonical_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("canonical_relationship", canonical_id))
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let tables = self.tables.read();
        Ok(StorageStats {
            models: tables.models.len(),
            objects: tables.objects.len(),
            attributes: tables.attributes.len(),
            model_objects: tables.model_objects.len(),
            relationships: tables.relationships.len(),
            canonical_relationships: tables.canonical.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_object_requires_model() {
        let store = InMemoryModelStore::new();
        let err = store
            .create_data_object(NewDataObject::new(99, "Orphan"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = InMemoryModelStore::new();
        let model = store
            .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
            .await
            .unwrap();

        let result = store
            .create_data_objects_batch(vec![
                NewDataObject::new(model.id, "Customer"),
                NewDataObject::new(model.id + 1000, "Order"),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.get_stats().await.unwrap().objects, 0);
    }

    #[tokio::test]
    async fn test_failpoint() {
        let store = InMemoryModelStore::new();
        store.fail_on("create_data_model");

        let err = store
            .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
            .await
            .unwrap_err();
        assert!(err.message.contains("create_data_model"));

        store.clear_failpoints();
        assert!(store
            .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_attributes_ordered_by_index() {
        let store = InMemoryModelStore::new();
        let model = store
            .create_data_model(NewDataModel::new("Sales", Layer::Logical))
            .await
            .unwrap();
        let object = store
            .create_data_object(NewDataObject::new(model.id, "Customer"))
            .await
            .unwrap();

        let mut second = NewAttribute::new(object.id, "email");
        second.order_index = 1;
        let mut first = NewAttribute::new(object.id, "id");
        first.order_index = 0;
        store.create_attribute(second).await.unwrap();
        store.create_attribute(first).await.unwrap();

        let names: Vec<String> = store
            .get_attributes_by_object(object.id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["id".to_string(), "email".to_string()]);
    }
}
