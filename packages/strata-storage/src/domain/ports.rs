//! Storage Port (Trait Interface)
//!
//! The synchronization engine only ever talks to storage through
//! [`ModelStore`]. Lookups by id return `Option`; callers decide whether a
//! missing row is an error. Updates and deletes of a missing row return
//! `ErrorKind::NotFound`.

use async_trait::async_trait;

use super::models::{
    Attribute, AttributeId, AttributePatch, CanonicalId, CanonicalRelationship, DataModel,
    DataObject, DataObjectPatch, ModelId, ModelObject, ModelObjectId, ModelObjectPatch,
    NewAttribute, NewCanonicalRelationship, NewDataModel, NewDataObject, NewModelObject,
    NewRelationship, ObjectId, Relationship, RelationshipId, RelationshipPatch, StorageStats,
};
use crate::Result;

/// Model Store Port (Primary Interface)
///
/// All storage backends must implement this trait
#[async_trait]
pub trait ModelStore: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Models
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Get model by ID
    async fn get_data_model(&self, model_id: ModelId) -> Result<Option<DataModel>>;

    /// List the whole model catalog, ordered by id
    async fn list_data_models(&self) -> Result<Vec<DataModel>>;

    async fn create_data_model(&self, model: NewDataModel) -> Result<DataModel>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Objects
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn get_data_object(&self, object_id: ObjectId) -> Result<Option<DataObject>>;

    /// Objects whose home model is `model_id`, ordered by id
    async fn get_data_objects_by_model(&self, model_id: ModelId) -> Result<Vec<DataObject>>;

    /// Objects whose provenance points at `origin_object_id`
    async fn get_replicas_of(&self, origin_object_id: ObjectId) -> Result<Vec<DataObject>>;

    async fn create_data_object(&self, object: NewDataObject) -> Result<DataObject>;

    /// Insert several objects (all or nothing)
    async fn create_data_objects_batch(&self, objects: Vec<NewDataObject>)
        -> Result<Vec<DataObject>>;

    async fn update_data_object(
        &self,
        object_id: ObjectId,
        patch: DataObjectPatch,
    ) -> Result<DataObject>;

    /// Delete the object row only (no cascade)
    async fn delete_data_object(&self, object_id: ObjectId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Attributes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn get_attribute(&self, attribute_id: AttributeId) -> Result<Option<Attribute>>;

    /// Attributes of an object, ordered by `order_index` then id
    async fn get_attributes_by_object(&self, object_id: ObjectId) -> Result<Vec<Attribute>>;

    async fn create_attribute(&self, attribute: NewAttribute) -> Result<Attribute>;

    /// Insert several attributes (all or nothing)
    async fn create_attributes_batch(&self, attributes: Vec<NewAttribute>)
        -> Result<Vec<Attribute>>;

    async fn update_attribute(
        &self,
        attribute_id: AttributeId,
        patch: AttributePatch,
    ) -> Result<Attribute>;

    async fn delete_attribute(&self, attribute_id: AttributeId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Model-object placements
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn get_data_model_objects_by_model(&self, model_id: ModelId)
        -> Result<Vec<ModelObject>>;

    /// Placements of one object across every model
    async fn get_model_objects_by_object(&self, object_id: ObjectId) -> Result<Vec<ModelObject>>;

    async fn create_data_model_object(&self, model_object: NewModelObject) -> Result<ModelObject>;

    async fn create_data_model_objects_batch(
        &self,
        model_objects: Vec<NewModelObject>,
    ) -> Result<Vec<ModelObject>>;

    async fn update_data_model_object(
        &self,
        model_object_id: ModelObjectId,
        patch: ModelObjectPatch,
    ) -> Result<ModelObject>;

    async fn delete_data_model_object(&self, model_object_id: ModelObjectId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Per-layer relationships
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn get_relationships_by_model(&self, model_id: ModelId) -> Result<Vec<Relationship>>;

    /// Relationships where the object is source or target, in any model
    async fn get_relationships_by_object(&self, object_id: ObjectId)
        -> Result<Vec<Relationship>>;

    async fn create_relationship(&self, relationship: NewRelationship) -> Result<Relationship>;

    async fn create_relationships_batch(
        &self,
        relationships: Vec<NewRelationship>,
    ) -> Result<Vec<Relationship>>;

    async fn update_relationship(
        &self,
        relationship_id: RelationshipId,
        patch: RelationshipPatch,
    ) -> Result<Relationship>;

    async fn delete_relationship(&self, relationship_id: RelationshipId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Canonical relationships
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn list_canonical_relationships(&self) -> Result<Vec<CanonicalRelationship>>;

    async fn create_canonical_relationship(
        &self,
        relationship: NewCanonicalRelationship,
    ) -> Result<CanonicalRelationship>;

    async fn delete_canonical_relationship(&self, canonical_id: CanonicalId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Statistics
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn get_stats(&self) -> Result<StorageStats>;
}
