//! Storage Domain Models
//!
//! Three-layer entity model:
//! - `DataModel`: one layer (conceptual, logical or physical) of a model family
//! - `DataObject`: an entity scoped to a single layer model
//! - `Attribute`: a field owned by exactly one object
//! - `ModelObject`: placement of an object on a model (position, visibility)
//! - `Relationship`: per-layer edge between two objects
//! - `CanonicalRelationship`: layer-independent anchor for one logical edge
//!
//! Objects in different layers are never linked by a shared id. Replicas carry
//! a typed [`Provenance`] pointing back at their origin object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Model ID (primary key of `DataModel`)
pub type ModelId = i64;

/// Object ID (primary key of `DataObject`)
pub type ObjectId = i64;

/// Attribute ID (primary key of `Attribute`)
pub type AttributeId = i64;

/// Placement row ID (primary key of `ModelObject`)
pub type ModelObjectId = i64;

/// Per-layer relationship ID
pub type RelationshipId = i64;

/// Canonical relationship ID
pub type CanonicalId = i64;

// ═══════════════════════════════════════════════════════════════════════════
// Layer
// ═══════════════════════════════════════════════════════════════════════════

/// Model layer
///
/// Ordered from most abstract to most concrete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Conceptual,
    Logical,
    Physical,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Conceptual, Layer::Logical, Layer::Physical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conceptual => "conceptual",
            Self::Logical => "logical",
            Self::Physical => "physical",
        }
    }

    /// Parse layer from string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "conceptual" => Ok(Self::Conceptual),
            "logical" => Ok(Self::Logical),
            "physical" => Ok(Self::Physical),
            _ => Err(format!(
                "Unknown layer '{}'. Valid layers: conceptual, logical, physical",
                s
            )),
        }
    }

    /// Layers below this one, nearest first
    pub fn descendants(&self) -> &'static [Layer] {
        match self {
            Self::Conceptual => &[Layer::Logical, Layer::Physical],
            Self::Logical => &[Layer::Physical],
            Self::Physical => &[],
        }
    }

    /// Logical and physical layers hold attribute-level relationships only
    pub fn requires_attribute_relationships(&self) -> bool {
        !matches!(self, Self::Conceptual)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canvas position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DataModel
// ═══════════════════════════════════════════════════════════════════════════

/// One layer of a model family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    pub id: ModelId,
    pub name: String,
    pub layer: Layer,
    /// Parent layer model (logical → conceptual, physical → logical or conceptual)
    pub parent_model_id: Option<ModelId>,
    pub domain_id: Option<i64>,
    pub data_area_id: Option<i64>,
    pub target_system_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `DataModel`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDataModel {
    pub name: String,
    pub layer: Layer,
    pub parent_model_id: Option<ModelId>,
    pub domain_id: Option<i64>,
    pub data_area_id: Option<i64>,
    pub target_system_id: Option<i64>,
}

impl NewDataModel {
    pub fn new(name: impl Into<String>, layer: Layer) -> Self {
        Self {
            name: name.into(),
            layer,
            parent_model_id: None,
            domain_id: None,
            data_area_id: None,
            target_system_id: None,
        }
    }

    pub fn with_parent(mut self, parent_model_id: ModelId) -> Self {
        self.parent_model_id = Some(parent_model_id);
        self
    }

    pub fn with_scope(mut self, domain_id: Option<i64>, data_area_id: Option<i64>) -> Self {
        self.domain_id = domain_id;
        self.data_area_id = data_area_id;
        self
    }

    pub fn with_target_system(mut self, target_system_id: i64) -> Self {
        self.target_system_id = Some(target_system_id);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DataObject
// ═══════════════════════════════════════════════════════════════════════════

/// Link from a replicated object back to the object it was copied from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Origin object (the conceptual object for a conceptual-rooted cascade)
    pub origin_object_id: ObjectId,
    /// Model owning the origin object
    pub origin_model_id: ModelId,
    /// Layer the replica was written into
    pub layer: Layer,
}

/// Entity instance scoped to a single layer model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub id: ObjectId,
    /// Home model
    pub model_id: ModelId,
    pub name: String,
    pub description: Option<String>,
    /// Free-form classification ("entity", "view", ...)
    pub object_type: Option<String>,
    pub domain_id: Option<i64>,
    pub data_area_id: Option<i64>,
    pub target_system_id: Option<i64>,
    pub position: Option<Position>,
    pub is_visible: bool,
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataObject {
    /// Origin object id: the provenance origin, or this object itself
    pub fn identity(&self) -> ObjectId {
        self.provenance
            .map(|p| p.origin_object_id)
            .unwrap_or(self.id)
    }
}

/// Insert payload for `DataObject`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDataObject {
    pub model_id: ModelId,
    pub name: String,
    pub description: Option<String>,
    pub object_type: Option<String>,
    pub domain_id: Option<i64>,
    pub data_area_id: Option<i64>,
    pub target_system_id: Option<i64>,
    pub position: Option<Position>,
    pub is_visible: bool,
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewDataObject {
    pub fn new(model_id: ModelId, name: impl Into<String>) -> Self {
        Self {
            model_id,
            name: name.into(),
            description: None,
            object_type: None,
            domain_id: None,
            data_area_id: None,
            target_system_id: None,
            position: None,
            is_visible: true,
            provenance: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

/// Partial update for `DataObject` (`None` keeps the stored value)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataObjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub object_type: Option<String>,
    pub target_system_id: Option<i64>,
    pub position: Option<Position>,
    pub is_visible: Option<bool>,
    pub provenance: Option<Provenance>,
}

impl DataObjectPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, object: &mut DataObject) {
        if let Some(name) = &self.name {
            object.name = name.clone();
        }
        if let Some(description) = &self.description {
            object.description = Some(description.clone());
        }
        if let Some(object_type) = &self.object_type {
            object.object_type = Some(object_type.clone());
        }
        if let Some(target_system_id) = self.target_system_id {
            object.target_system_id = Some(target_system_id);
        }
        if let Some(position) = self.position {
            object.position = Some(position);
        }
        if let Some(is_visible) = self.is_visible {
            object.is_visible = is_visible;
        }
        if let Some(provenance) = self.provenance {
            object.provenance = Some(provenance);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Attribute
// ═══════════════════════════════════════════════════════════════════════════

/// Field owned by one object
///
/// Carries one type per layer. `is_primary_key` implies `nullable == false`;
/// the store does not reject violations, the consistency checks report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub object_id: ObjectId,
    pub name: String,
    pub description: Option<String>,
    /// Raw, untyped type string as entered
    pub data_type: Option<String>,
    pub conceptual_type: Option<String>,
    pub logical_type: Option<String>,
    pub physical_type: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub order_index: i32,
    /// Attribute this one was copied from
    pub origin_attribute_id: Option<AttributeId>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `Attribute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttribute {
    pub object_id: ObjectId,
    pub name: String,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub conceptual_type: Option<String>,
    pub logical_type: Option<String>,
    pub physical_type: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub order_index: i32,
    pub origin_attribute_id: Option<AttributeId>,
}

impl NewAttribute {
    pub fn new(object_id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            object_id,
            name: name.into(),
            description: None,
            data_type: None,
            conceptual_type: None,
            logical_type: None,
            physical_type: None,
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
            order_index: 0,
            origin_attribute_id: None,
        }
    }

    /// Copy every type and constraint field of `source` onto a new owner
    pub fn copied_from(source: &Attribute, object_id: ObjectId) -> Self {
        Self {
            object_id,
            name: source.name.clone(),
            description: source.description.clone(),
            data_type: source.data_type.clone(),
            conceptual_type: source.conceptual_type.clone(),
            logical_type: source.logical_type.clone(),
            physical_type: source.physical_type.clone(),
            length: source.length,
            precision: source.precision,
            scale: source.scale,
            nullable: source.nullable,
            is_primary_key: source.is_primary_key,
            is_foreign_key: source.is_foreign_key,
            order_index: source.order_index,
            origin_attribute_id: Some(source.origin_attribute_id.unwrap_or(source.id)),
        }
    }
}

/// Partial update for `Attribute` (`None` keeps the stored value)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub conceptual_type: Option<String>,
    pub logical_type: Option<String>,
    pub physical_type: Option<String>,
    pub length: Option<u32>,
    pub nullable: Option<bool>,
    pub is_primary_key: Option<bool>,
    pub is_foreign_key: Option<bool>,
    pub order_index: Option<i32>,
}

impl AttributePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, attribute: &mut Attribute) {
        if let Some(name) = &self.name {
            attribute.name = name.clone();
        }
        if let Some(description) = &self.description {
            attribute.description = Some(description.clone());
        }
        if let Some(data_type) = &self.data_type {
            attribute.data_type = Some(data_type.clone());
        }
        if let Some(t) = &self.conceptual_type {
            attribute.conceptual_type = Some(t.clone());
        }
        if let Some(t) = &self.logical_type {
            attribute.logical_type = Some(t.clone());
        }
        if let Some(t) = &self.physical_type {
            attribute.physical_type = Some(t.clone());
        }
        if let Some(length) = self.length {
            attribute.length = Some(length);
        }
        if let Some(nullable) = self.nullable {
            attribute.nullable = nullable;
        }
        if let Some(pk) = self.is_primary_key {
            attribute.is_primary_key = pk;
        }
        if let Some(fk) = self.is_foreign_key {
            attribute.is_foreign_key = fk;
        }
        if let Some(order_index) = self.order_index {
            attribute.order_index = order_index;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ModelObject
// ═══════════════════════════════════════════════════════════════════════════

/// Placement of an object on a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: ModelObjectId,
    pub model_id: ModelId,
    pub object_id: ObjectId,
    pub position: Option<Position>,
    pub target_system_id: Option<i64>,
    pub is_visible: bool,
}

/// Insert payload for `ModelObject`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModelObject {
    pub model_id: ModelId,
    pub object_id: ObjectId,
    pub position: Option<Position>,
    pub target_system_id: Option<i64>,
    pub is_visible: bool,
}

impl NewModelObject {
    pub fn new(model_id: ModelId, object_id: ObjectId) -> Self {
        Self {
            model_id,
            object_id,
            position: None,
            target_system_id: None,
            is_visible: true,
        }
    }
}

/// Partial update for `ModelObject`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelObjectPatch {
    pub position: Option<Position>,
    pub target_system_id: Option<i64>,
    pub is_visible: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Relationships
// ═══════════════════════════════════════════════════════════════════════════

/// Relationship cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:M")]
    ManyToMany,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "1:1",
            Self::OneToMany => "1:N",
            Self::ManyToMany => "N:M",
        }
    }

    /// Normalize a free-form cardinality
    ///
    /// Returns the canonical cardinality and whether source/target must be
    /// swapped (`N:1` becomes `1:N` read the other way round). `M:N` is `N:M`.
    pub fn normalize(raw: &str) -> Option<(Self, bool)> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        match compact.as_str() {
            "1:1" | "ONE_TO_ONE" | "ONETOONE" => Some((Self::OneToOne, false)),
            "1:N" | "1:M" | "1:*" | "ONE_TO_MANY" | "ONETOMANY" => Some((Self::OneToMany, false)),
            "N:1" | "M:1" | "*:1" | "MANY_TO_ONE" | "MANYTOONE" => Some((Self::OneToMany, true)),
            "N:M" | "M:N" | "N:N" | "M:M" | "*:*" | "MANY_TO_MANY" | "MANYTOMANY" => {
                Some((Self::ManyToMany, false))
            }
            _ => None,
        }
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::OneToMany
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relationship granularity, without attribute ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Object,
    Attribute,
}

impl LevelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Attribute => "attribute",
        }
    }
}

/// Relationship granularity
///
/// Attribute-level iff both a source and a target attribute are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum RelationshipLevel {
    Object,
    Attribute {
        source_attribute_id: AttributeId,
        target_attribute_id: AttributeId,
    },
}

impl RelationshipLevel {
    /// The single constructor deciding granularity from resolved attribute ids
    pub fn resolve(source: Option<AttributeId>, target: Option<AttributeId>) -> Self {
        match (source, target) {
            (Some(source_attribute_id), Some(target_attribute_id)) => Self::Attribute {
                source_attribute_id,
                target_attribute_id,
            },
            _ => Self::Object,
        }
    }

    pub fn kind(&self) -> LevelKind {
        match self {
            Self::Object => LevelKind::Object,
            Self::Attribute { .. } => LevelKind::Attribute,
        }
    }

    pub fn attribute_ids(&self) -> Option<(AttributeId, AttributeId)> {
        match self {
            Self::Object => None,
            Self::Attribute {
                source_attribute_id,
                target_attribute_id,
            } => Some((*source_attribute_id, *target_attribute_id)),
        }
    }

    pub fn touches_attribute(&self, attribute_id: AttributeId) -> bool {
        self.attribute_ids()
            .map(|(s, t)| s == attribute_id || t == attribute_id)
            .unwrap_or(false)
    }
}

/// Per-layer relationship row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub model_id: ModelId,
    pub layer: Layer,
    pub source_object_id: ObjectId,
    pub target_object_id: ObjectId,
    pub level: RelationshipLevel,
    pub relationship_type: Cardinality,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub canonical_id: Option<CanonicalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn touches_object(&self, object_id: ObjectId) -> bool {
        self.source_object_id == object_id || self.target_object_id == object_id
    }
}

/// Insert payload for `Relationship`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub model_id: ModelId,
    pub layer: Layer,
    pub source_object_id: ObjectId,
    pub target_object_id: ObjectId,
    pub level: RelationshipLevel,
    pub relationship_type: Cardinality,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub canonical_id: Option<CanonicalId>,
}

/// Partial update for `Relationship`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPatch {
    pub level: Option<RelationshipLevel>,
    pub relationship_type: Option<Cardinality>,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub canonical_id: Option<CanonicalId>,
}

impl RelationshipPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Deduplication key of a canonical relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalKey {
    pub source_object_id: ObjectId,
    pub target_object_id: ObjectId,
    pub level: RelationshipLevel,
}

/// Layer-independent relationship anchor
///
/// Object ids are object identities (conceptual origin where one exists).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    pub id: CanonicalId,
    pub source_object_id: ObjectId,
    pub target_object_id: ObjectId,
    pub level: RelationshipLevel,
    pub relationship_type: Cardinality,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CanonicalRelationship {
    pub fn key(&self) -> CanonicalKey {
        CanonicalKey {
            source_object_id: self.source_object_id,
            target_object_id: self.target_object_id,
            level: self.level,
        }
    }

    pub fn touches_object(&self, object_id: ObjectId) -> bool {
        self.source_object_id == object_id || self.target_object_id == object_id
    }
}

/// Insert payload for `CanonicalRelationship`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCanonicalRelationship {
    pub source_object_id: ObjectId,
    pub target_object_id: ObjectId,
    pub level: RelationshipLevel,
    pub relationship_type: Cardinality,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl NewCanonicalRelationship {
    pub fn key(&self) -> CanonicalKey {
        CanonicalKey {
            source_object_id: self.source_object_id,
            target_object_id: self.target_object_id,
            level: self.level,
        }
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub models: usize,
    pub objects: usize,
    pub attributes: usize,
    pub model_objects: usize,
    pub relationships: usize,
    pub canonical_relationships: usize,
}
