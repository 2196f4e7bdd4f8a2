//! strata-storage - Three-layer entity model storage
//!
//! > Conceptual, logical and physical layers each keep their own copies of
//! > objects, attributes and relationships.
//!
//! ## Core Principles
//!
//! 1. **No shared identity**: replicas link to their origin through typed `Provenance`
//! 2. **Port first**: the engine depends on [`ModelStore`], never on a backend
//! 3. **No soft delete**: deleting a row removes it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_storage::{InMemoryModelStore, Layer, ModelStore, NewDataModel};
//!
//! let store = InMemoryModelStore::new();
//! let conceptual = store
//!     .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
//!     .await?;
//! let logical = store
//!     .create_data_model(NewDataModel::new("Sales", Layer::Logical).with_parent(conceptual.id))
//!     .await?;
//! ```

pub mod domain;
pub mod error;

pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    Attribute, AttributeId, AttributePatch, CanonicalId, CanonicalKey, CanonicalRelationship,
    Cardinality, DataModel, DataObject, DataObjectPatch, Layer, LevelKind, ModelId, ModelObject,
    ModelObjectId, ModelObjectPatch, ModelStore, NewAttribute, NewCanonicalRelationship,
    NewDataModel, NewDataObject, NewModelObject, NewRelationship, ObjectId, Position, Provenance,
    Relationship, RelationshipId, RelationshipLevel, RelationshipPatch, StorageStats,
};

#[cfg(feature = "memory")]
pub use infrastructure::InMemoryModelStore;
