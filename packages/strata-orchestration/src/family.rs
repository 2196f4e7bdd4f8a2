//! Model family resolution
//!
//! A family is the conceptual root plus every model whose `parent_model_id`
//! chain ends at it. The resolver never fails on a malformed catalog: a model
//! with no conceptual ancestor is its own degenerate family, and a parent
//! cycle is cut by a visited set.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_storage::{DataModel, Layer, ModelId, ModelStore, NewDataModel};
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::naming::names_match;

/// Conceptual root and its layer siblings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFamily {
    /// Root of the family (the input model itself for a degenerate family)
    pub conceptual: DataModel,
    pub logical: Option<DataModel>,
    pub physical: Option<DataModel>,
    /// Every model resolving to the root, ordered by id
    pub members: Vec<DataModel>,
}

impl ModelFamily {
    pub fn root_id(&self) -> ModelId {
        self.conceptual.id
    }

    /// Slot holder for a layer
    pub fn layer(&self, layer: Layer) -> Option<&DataModel> {
        match layer {
            Layer::Conceptual => Some(&self.conceptual),
            Layer::Logical => self.logical.as_ref(),
            Layer::Physical => self.physical.as_ref(),
        }
    }

    /// Slot holders, conceptual first
    pub fn layer_models(&self) -> Vec<&DataModel> {
        Layer::ALL.iter().filter_map(|l| self.layer(*l)).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.conceptual.layer == Layer::Conceptual
            && self.logical.is_some()
            && self.physical.is_some()
    }

    pub fn contains(&self, model_id: ModelId) -> bool {
        self.members.iter().any(|m| m.id == model_id)
    }
}

/// How `ensure_family` finds the conceptual root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilySeed {
    /// Any member of an existing family
    Model(ModelId),
    /// Conceptual model name; created when absent
    Name(String),
}

/// Walk parents until a conceptual model; the input itself when none is found
fn find_root<'a>(index: &HashMap<ModelId, &'a DataModel>, model: &'a DataModel) -> &'a DataModel {
    let mut visited = HashSet::new();
    let mut current = model;
    loop {
        if current.layer == Layer::Conceptual {
            return current;
        }
        if !visited.insert(current.id) {
            warn!("Parent cycle detected at model {}", current.id);
            return model;
        }
        match current.parent_model_id.and_then(|p| index.get(&p)) {
            Some(parent) => current = parent,
            None => return model,
        }
    }
}

/// Build the family of `model` from a full catalog
pub fn family_from_catalog(catalog: &[DataModel], model: &DataModel) -> ModelFamily {
    let mut index: HashMap<ModelId, &DataModel> = catalog.iter().map(|m| (m.id, m)).collect();
    index.entry(model.id).or_insert(model);

    let root = find_root(&index, model).clone();

    let mut members: Vec<DataModel> = index
        .values()
        .filter(|m| find_root(&index, m).id == root.id)
        .map(|m| (*m).clone())
        .collect();
    members.sort_by_key(|m| m.id);

    let mut family = ModelFamily {
        conceptual: root.clone(),
        logical: None,
        physical: None,
        members,
    };

    if root.layer != Layer::Conceptual {
        debug!("Model {} has no conceptual ancestor", root.id);
        return family;
    }

    for member in &family.members {
        let slot = match member.layer {
            Layer::Conceptual => continue,
            Layer::Logical => &mut family.logical,
            Layer::Physical => &mut family.physical,
        };
        if let Some(holder) = slot.as_ref() {
            warn!(
                "Family {} has a second {} model {} (keeping {})",
                root.id, member.layer, member.id, holder.id
            );
        } else {
            *slot = Some(member.clone());
        }
    }

    family
}

/// Family resolver
pub struct FamilyResolver {
    store: Arc<dyn ModelStore>,
}

impl FamilyResolver {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_family(&self, ctx: &mut SyncContext, model_id: ModelId) -> Result<ModelFamily> {
        let model = ctx.model(self.store.as_ref(), model_id).await?;
        let catalog = ctx.catalog(self.store.as_ref()).await?;
        Ok(family_from_catalog(&catalog, &model))
    }

    /// Root id of the family owning `model_id`
    pub async fn root_of(&self, ctx: &mut SyncContext, model_id: ModelId) -> Result<ModelId> {
        Ok(self.resolve_family(ctx, model_id).await?.root_id())
    }

    /// Models below `root_id` in breadth-first order (root excluded)
    pub async fn descendant_models(
        &self,
        ctx: &mut SyncContext,
        root_id: ModelId,
    ) -> Result<Vec<DataModel>> {
        let catalog = ctx.catalog(self.store.as_ref()).await?;

        let mut children: HashMap<ModelId, Vec<&DataModel>> = HashMap::new();
        for model in &catalog {
            if let Some(parent) = model.parent_model_id {
                children.entry(parent).or_default().push(model);
            }
        }

        let mut visited = HashSet::from([root_id]);
        let mut queue = VecDeque::from([root_id]);
        let mut descendants = Vec::new();

        while let Some(current) = queue.pop_front() {
            for child in children.get(&current).into_iter().flatten() {
                if visited.insert(child.id) {
                    descendants.push((*child).clone());
                    queue.push_back(child.id);
                }
            }
        }

        Ok(descendants)
    }

    /// Load the conceptual/logical/physical triad, creating missing members
    ///
    /// Logical is parented to the conceptual root, physical to the logical
    /// model.
    pub async fn ensure_family(&self, ctx: &mut SyncContext, seed: FamilySeed) -> Result<ModelFamily> {
        let store = self.store.as_ref();

        let root = match seed {
            FamilySeed::Model(model_id) => self.resolve_family(ctx, model_id).await?.conceptual,
            FamilySeed::Name(name) => {
                if name.trim().is_empty() {
                    return Err(SyncError::invalid_request("model name must not be empty"));
                }
                let existing = ctx
                    .catalog(store)
                    .await?
                    .into_iter()
                    .find(|m| m.layer == Layer::Conceptual && names_match(&m.name, &name));
                match existing {
                    Some(model) => model,
                    None => {
                        info!("Creating conceptual model '{}'", name);
                        ctx.create_model(store, NewDataModel::new(name, Layer::Conceptual))
                            .await?
                    }
                }
            }
        };

        if root.layer != Layer::Conceptual {
            return Err(SyncError::invalid_request(format!(
                "model {} has no conceptual root",
                root.id
            )));
        }

        let mut family = self.resolve_family(ctx, root.id).await?;

        let logical = match family.logical.clone() {
            Some(model) => model,
            None => {
                info!("Creating logical model for family {}", root.id);
                let model = ctx
                    .create_model(
                        store,
                        NewDataModel::new(format!("{} Logical", root.name), Layer::Logical)
                            .with_parent(root.id)
                            .with_scope(root.domain_id, root.data_area_id),
                    )
                    .await?;
                family.logical = Some(model.clone());
                family.members.push(model.clone());
                model
            }
        };

        if family.physical.is_none() {
            info!("Creating physical model for family {}", root.id);
            let mut payload = NewDataModel::new(format!("{} Physical", root.name), Layer::Physical)
                .with_parent(logical.id)
                .with_scope(root.domain_id, root.data_area_id);
            payload.target_system_id = root.target_system_id;
            let model = ctx.create_model(store, payload).await?;
            family.physical = Some(model.clone());
            family.members.push(model);
        }

        Ok(family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_storage::InMemoryModelStore;

    fn model(id: ModelId, layer: Layer, parent: Option<ModelId>) -> DataModel {
        DataModel {
            id,
            name: format!("m{}", id),
            layer,
            parent_model_id: parent,
            domain_id: None,
            data_area_id: None,
            target_system_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_family_through_intermediate_layer() {
        let catalog = vec![
            model(1, Layer::Conceptual, None),
            model(2, Layer::Logical, Some(1)),
            model(3, Layer::Physical, Some(2)),
            model(4, Layer::Conceptual, None),
        ];

        let family = family_from_catalog(&catalog, &catalog[2]);
        assert_eq!(family.root_id(), 1);
        assert_eq!(family.logical.as_ref().map(|m| m.id), Some(2));
        assert_eq!(family.physical.as_ref().map(|m| m.id), Some(3));
        assert_eq!(family.members.len(), 3);
        assert!(family.is_complete());
        assert!(!family.contains(4));
    }

    #[test]
    fn test_orphan_is_degenerate_family() {
        let catalog = vec![model(5, Layer::Logical, None), model(6, Layer::Physical, Some(5))];

        let family = family_from_catalog(&catalog, &catalog[0]);
        assert_eq!(family.conceptual.id, 5);
        assert!(family.logical.is_none());
        assert_eq!(family.members.len(), 1);
        assert!(!family.is_complete());
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let catalog = vec![model(1, Layer::Logical, Some(2)), model(2, Layer::Physical, Some(1))];

        let family = family_from_catalog(&catalog, &catalog[0]);
        assert_eq!(family.conceptual.id, 1);
    }

    #[test]
    fn test_duplicate_layer_lowest_id_wins() {
        let catalog = vec![
            model(1, Layer::Conceptual, None),
            model(9, Layer::Logical, Some(1)),
            model(3, Layer::Logical, Some(1)),
        ];

        let family = family_from_catalog(&catalog, &catalog[0]);
        assert_eq!(family.logical.as_ref().map(|m| m.id), Some(3));
        assert_eq!(family.members.len(), 3);
    }

    #[tokio::test]
    async fn test_ensure_family_creates_triad_once() {
        let store = Arc::new(InMemoryModelStore::new());
        let resolver = FamilyResolver::new(store.clone());

        let mut ctx = SyncContext::new();
        let family = resolver
            .ensure_family(&mut ctx, FamilySeed::Name("Sales".to_string()))
            .await
            .unwrap();
        assert!(family.is_complete());

        let logical = family.logical.clone().unwrap();
        let physical = family.physical.clone().unwrap();
        assert_eq!(logical.parent_model_id, Some(family.root_id()));
        assert_eq!(physical.parent_model_id, Some(logical.id));

        let mut ctx = SyncContext::new();
        let again = resolver
            .ensure_family(&mut ctx, FamilySeed::Name("sales".to_string()))
            .await
            .unwrap();
        assert_eq!(again.root_id(), family.root_id());
        assert_eq!(store.get_stats().await.unwrap().models, 3);
    }

    #[tokio::test]
    async fn test_descendant_models_bfs() {
        let store = Arc::new(InMemoryModelStore::new());
        let resolver = FamilyResolver::new(store.clone());

        let mut ctx = SyncContext::new();
        let family = resolver
            .ensure_family(&mut ctx, FamilySeed::Name("Billing".to_string()))
            .await
            .unwrap();

        let mut ctx = SyncContext::new();
        let below = resolver
            .descendant_models(&mut ctx, family.root_id())
            .await
            .unwrap();
        let layers: Vec<Layer> = below.iter().map(|m| m.layer).collect();
        assert_eq!(layers, vec![Layer::Logical, Layer::Physical]);
    }
}
