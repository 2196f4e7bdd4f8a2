//! Integration tests for cross-layer relationship synchronization

mod common;

use common::{customer_attributes, order_attributes, Engine};
use pretty_assertions::assert_eq;
use strata_orchestration::{RelationshipConfig, RelationshipEdit, SkipReason, SyncConfig};
use strata_storage::{
    Cardinality, DataObject, Layer, LevelKind, ModelStore, NewAttribute, RelationshipLevel,
};

/// Conceptual Customer and Order, cascaded into every layer
async fn customer_and_order(engine: &Engine) -> (DataObject, DataObject) {
    let family = engine.family("Sales").await;
    let customer = engine
        .create(family.conceptual.id, "Customer", customer_attributes())
        .await;
    let order = engine
        .create(family.conceptual.id, "Order", order_attributes())
        .await;
    (customer, order)
}

#[tokio::test]
async fn test_attribute_level_edit_reaches_every_layer() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;
    let customer_id = engine.attribute_named(customer.id, "id").await;
    let order_fk = engine.attribute_named(order.id, "customer_id").await;

    let edit = RelationshipEdit::attribute_level(customer.id, customer_id.id, order.id, order_fk.id)
        .with_name("places");
    let outcome = engine.synchronizer().sync(&edit).await.unwrap();

    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.relationships.len(), 3);

    let conceptual = outcome.for_layer(Layer::Conceptual).unwrap();
    assert_eq!(conceptual.level, RelationshipLevel::Object);
    assert_eq!(conceptual.source_object_id, customer.id);

    let canonical = outcome.canonical.clone().unwrap();
    assert_eq!(canonical.source_object_id, customer.id);
    assert_eq!(canonical.level.kind(), LevelKind::Attribute);

    for layer in [Layer::Logical, Layer::Physical] {
        let row = outcome.for_layer(layer).unwrap();
        assert_eq!(row.level.kind(), LevelKind::Attribute);
        assert_eq!(row.canonical_id, Some(canonical.id));
        assert_eq!(row.name.as_deref(), Some("places"));

        let (source_attr, target_attr) = row.level.attribute_ids().unwrap();
        let source = engine.store.get_attribute(source_attr).await.unwrap().unwrap();
        let target = engine.store.get_attribute(target_attr).await.unwrap().unwrap();
        assert_eq!(source.origin_attribute_id, Some(customer_id.id));
        assert_eq!(target.origin_attribute_id, Some(order_fk.id));
        assert_ne!(source.object_id, customer.id);
    }
}

#[tokio::test]
async fn test_resync_updates_instead_of_duplicating() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;
    let customer_id = engine.attribute_named(customer.id, "id").await;
    let order_fk = engine.attribute_named(order.id, "customer_id").await;

    let edit = RelationshipEdit::attribute_level(customer.id, customer_id.id, order.id, order_fk.id);
    let first = engine.synchronizer().sync(&edit).await.unwrap();
    let second = engine
        .synchronizer()
        .sync(&edit.clone().with_type(Cardinality::OneToOne))
        .await
        .unwrap();

    let stats = engine.store.get_stats().await.unwrap();
    assert_eq!(stats.relationships, 3);
    assert_eq!(stats.canonical_relationships, 1);

    for layer in Layer::ALL {
        let before = first.for_layer(layer).unwrap();
        let after = second.for_layer(layer).unwrap();
        assert_eq!(before.id, after.id);
        assert_eq!(after.relationship_type, Cardinality::OneToOne);
    }
}

#[tokio::test]
async fn test_edit_from_a_lower_layer_lands_everywhere() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;
    let family = engine.family("Sales").await;
    let physical = family.physical.unwrap();

    let p_customer = engine.object_named(physical.id, "Customer").await.unwrap();
    let p_order = engine.object_named(physical.id, "Order").await.unwrap();
    let p_id = engine.attribute_named(p_customer.id, "id").await;
    let p_fk = engine.attribute_named(p_order.id, "customer_id").await;

    let outcome = engine
        .synchronizer()
        .sync(&RelationshipEdit::attribute_level(p_customer.id, p_id.id, p_order.id, p_fk.id))
        .await
        .unwrap();

    assert_eq!(outcome.relationships.len(), 3);
    let conceptual = outcome.for_layer(Layer::Conceptual).unwrap();
    assert_eq!(conceptual.source_object_id, customer.id);
    assert_eq!(conceptual.target_object_id, order.id);

    // The anchor is keyed on the first copies
    assert_eq!(outcome.canonical.unwrap().source_object_id, customer.id);
}

#[tokio::test]
async fn test_object_level_edit_is_conceptual_only() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;

    let outcome = engine
        .synchronizer()
        .sync(&RelationshipEdit::object_level(customer.id, order.id))
        .await
        .unwrap();

    assert_eq!(outcome.relationships.len(), 1);
    assert!(outcome.for_layer(Layer::Conceptual).is_some());
    assert_eq!(outcome.skipped.len(), 2);
    assert!(outcome
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::ObjectLevelNotAllowed));
}

#[tokio::test]
async fn test_unresolved_attribute_skips_lower_layers() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;
    let order_fk = engine.attribute_named(order.id, "customer_id").await;

    let edit = RelationshipEdit {
        source_attribute_id: None,
        target_attribute_id: Some(order_fk.id),
        level: LevelKind::Attribute,
        ..RelationshipEdit::object_level(customer.id, order.id)
    };
    let outcome = engine.synchronizer().sync(&edit).await.unwrap();

    // Conceptual keeps an object-level row; nothing is downgraded below it
    let conceptual = outcome.for_layer(Layer::Conceptual).unwrap();
    assert_eq!(conceptual.level, RelationshipLevel::Object);

    let skipped: Vec<Layer> = outcome.skipped.iter().map(|s| s.layer).collect();
    assert_eq!(skipped, vec![Layer::Logical, Layer::Physical]);
    assert!(outcome
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::AttributesUnresolved));

    let family = engine.family("Sales").await;
    assert!(engine.relationships(family.logical.unwrap().id).await.is_empty());
    assert!(engine.relationships(family.physical.unwrap().id).await.is_empty());
}

#[tokio::test]
async fn test_missing_local_attribute_is_created() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;
    let customer_id = engine.attribute_named(customer.id, "id").await;

    // Added on the conceptual object only
    let mut payload = NewAttribute::new(order.id, "buyer_ref");
    payload.data_type = Some("Number".to_string());
    let buyer_ref = engine.store.create_attribute(payload).await.unwrap();

    let outcome = engine
        .synchronizer()
        .sync(&RelationshipEdit::attribute_level(
            customer.id,
            customer_id.id,
            order.id,
            buyer_ref.id,
        ))
        .await
        .unwrap();
    assert!(outcome.skipped.is_empty());

    let logical = engine.family("Sales").await.logical.unwrap();
    let l_order = engine.object_named(logical.id, "Order").await.unwrap();
    let copied = engine.attribute_named(l_order.id, "buyer_ref").await;
    assert_eq!(copied.origin_attribute_id, Some(buyer_ref.id));
    assert_eq!(copied.order_index, 2);
}

#[tokio::test]
async fn test_missing_local_attribute_skips_when_creation_disabled() {
    let config = SyncConfig {
        relationships: RelationshipConfig {
            create_missing_attributes: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = Engine::with_config(config);
    let (customer, order) = customer_and_order(&engine).await;
    let customer_id = engine.attribute_named(customer.id, "id").await;

    let mut payload = NewAttribute::new(order.id, "buyer_ref");
    payload.data_type = Some("Number".to_string());
    let buyer_ref = engine.store.create_attribute(payload).await.unwrap();

    let outcome = engine
        .synchronizer()
        .sync(&RelationshipEdit::attribute_level(
            customer.id,
            customer_id.id,
            order.id,
            buyer_ref.id,
        ))
        .await
        .unwrap();

    assert_eq!(outcome.relationships.len(), 1);
    assert_eq!(outcome.skipped.len(), 2);
    assert!(outcome
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::AttributesUnresolved));
}

#[tokio::test]
async fn test_unreplicated_object_skips_layer() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    let customer = engine
        .create(family.conceptual.id, "Customer", customer_attributes())
        .await;
    let draft = engine
        .cascade()
        .create_object_with_cascade(
            strata_orchestration::CreateObjectRequest::new(
                family.conceptual.id,
                strata_orchestration::ObjectInput::new("Draft"),
            )
            .with_cascade(false),
        )
        .await
        .unwrap()
        .primary_object;

    let outcome = engine
        .synchronizer()
        .sync(&RelationshipEdit::object_level(customer.id, draft.id))
        .await
        .unwrap();

    assert_eq!(outcome.relationships.len(), 1);
    assert!(outcome
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::ObjectMissing { object_id: draft.id }));
}

#[tokio::test]
async fn test_remove_clears_rows_and_anchor() {
    let engine = Engine::new();
    let (customer, order) = customer_and_order(&engine).await;
    let customer_id = engine.attribute_named(customer.id, "id").await;
    let order_fk = engine.attribute_named(order.id, "customer_id").await;

    let edit = RelationshipEdit::attribute_level(customer.id, customer_id.id, order.id, order_fk.id);
    engine.synchronizer().sync(&edit).await.unwrap();

    let removed = engine.synchronizer().remove(&edit).await.unwrap();
    assert_eq!(removed.removed_count(), 3);
    assert_eq!(removed.canonical_removed.len(), 1);

    let stats = engine.store.get_stats().await.unwrap();
    assert_eq!(stats.relationships, 0);
    assert_eq!(stats.canonical_relationships, 0);
    // Attributes survive relationship removal
    assert_eq!(stats.attributes, 12);
}

#[tokio::test]
async fn test_unknown_object_is_an_error() {
    let engine = Engine::new();
    let (customer, _) = customer_and_order(&engine).await;

    let err = engine
        .synchronizer()
        .sync(&RelationshipEdit::object_level(customer.id, 9_999))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        strata_orchestration::SyncError::ObjectNotFound(9_999)
    ));
}
