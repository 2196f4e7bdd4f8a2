//! Domain layer for strata-storage
//!
//! # Domain Models
//!
//! - `DataModel`: one layer of a conceptual → logical → physical family
//! - `DataObject` / `Attribute`: layer-scoped entities and their fields
//! - `ModelObject`: canvas placement rows
//! - `Relationship` / `CanonicalRelationship`: per-layer edges and their anchor
//!
//! # Port Trait
//!
//! - `ModelStore`: primary storage abstraction
//!
//! # Examples
//!
//! ```rust,ignore
//! use strata_storage::domain::{Layer, ModelStore, NewDataModel, NewDataObject};
//!
//! async fn example(store: impl ModelStore) -> strata_storage::Result<()> {
//!     let model = store
//!         .create_data_model(NewDataModel::new("Sales", Layer::Conceptual))
//!         .await?;
//!     let customer = store
//!         .create_data_object(NewDataObject::new(model.id, "Customer"))
//!         .await?;
//!     let objects = store.get_data_objects_by_model(model.id).await?;
//!     assert_eq!(objects[0].id, customer.id);
//!     Ok(())
//! }
//! ```

pub mod models;
pub mod ports;

pub use models::*;
pub use ports::ModelStore;
