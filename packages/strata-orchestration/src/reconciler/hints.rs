//! Migration hints derived from the applied diff

use std::collections::HashSet;

use super::layer_sync::{DiffAction, DiffEntry};

/// DDL-intent suggestions for every applied entry, first occurrence wins
///
/// An entity created in three layers yields one hint.
pub fn migration_hints(diff: &[DiffEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    diff.iter()
        .filter(|entry| entry.is_applied())
        .filter_map(hint_for)
        .filter(|hint| seen.insert(hint.clone()))
        .collect()
}

fn hint_for(entry: &DiffEntry) -> Option<String> {
    let entity = entry.meta_str("entity");
    let attribute = entry.meta_str("attribute");

    match entry.action {
        DiffAction::CreateEntity => Some(format!("Plan a CREATE TABLE for {}", entry.target)),
        DiffAction::RemoveEntity => Some(format!("Plan a DROP TABLE for {}", entry.target)),
        DiffAction::UpdateEntity => {
            let previous = entry.meta_str("previousName")?;
            (previous != entry.target)
                .then(|| format!("Plan a table rename from {} to {}", previous, entry.target))
        }
        DiffAction::CreateAttribute => Some(format!(
            "Plan an ALTER TABLE {} ADD COLUMN {}",
            entity?, attribute?
        )),
        DiffAction::UpdateAttribute => Some(format!(
            "Plan an ALTER TABLE {} ALTER COLUMN {}",
            entity?, attribute?
        )),
        DiffAction::RemoveAttribute => Some(format!(
            "Plan an ALTER TABLE {} DROP COLUMN {}",
            entity?, attribute?
        )),
        DiffAction::CreateRelationship | DiffAction::UpdateRelationship => {
            if entry.meta_str("level") != Some("attribute") {
                return None;
            }
            Some(format!(
                "Plan a FOREIGN KEY from {}.{} to {}.{}",
                entry.meta_str("source")?,
                entry.meta_str("sourceAttribute")?,
                entry.meta_str("target")?,
                entry.meta_str("targetAttribute")?
            ))
        }
        DiffAction::RemoveRelationship => Some(format!(
            "Plan to drop the foreign key between {} and {}",
            entry.meta_str("source")?,
            entry.meta_str("target")?
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use strata_storage::Layer;

    #[test]
    fn test_hints_are_deduplicated_and_applied_only() {
        let diff = vec![
            DiffEntry::applied(DiffAction::CreateEntity, Layer::Conceptual, "Customer"),
            DiffEntry::applied(DiffAction::CreateEntity, Layer::Logical, "Customer"),
            DiffEntry::applied(DiffAction::CreateAttribute, Layer::Physical, "Order.total")
                .with_metadata(json!({"entity": "Order", "attribute": "total"})),
            DiffEntry::skipped(DiffAction::RemoveEntity, Layer::Physical, "Legacy"),
            DiffEntry::applied(DiffAction::CreateRelationship, Layer::Conceptual, "Customer -> Order")
                .with_metadata(json!({"level": "object", "source": "Customer", "target": "Order"})),
            DiffEntry::applied(DiffAction::CreateRelationship, Layer::Physical, "Customer -> Order")
                .with_metadata(json!({
                    "level": "attribute",
                    "source": "Customer",
                    "target": "Order",
                    "sourceAttribute": "id",
                    "targetAttribute": "customer_id"
                })),
        ];

        assert_eq!(
            migration_hints(&diff),
            vec![
                "Plan a CREATE TABLE for Customer".to_string(),
                "Plan an ALTER TABLE Order ADD COLUMN total".to_string(),
                "Plan a FOREIGN KEY from Customer.id to Order.customer_id".to_string(),
            ]
        );
    }

    #[test]
    fn test_rename_hint() {
        let entry = DiffEntry::applied(DiffAction::UpdateEntity, Layer::Physical, "Client")
            .with_metadata(json!({"previousName": "Customer"}));
        assert_eq!(
            migration_hints(&[entry]),
            vec!["Plan a table rename from Customer to Client".to_string()]
        );

        let entry = DiffEntry::applied(DiffAction::UpdateEntity, Layer::Physical, "Client")
            .with_metadata(json!({"previousName": "Client"}));
        assert!(migration_hints(&[entry]).is_empty());
    }
}
