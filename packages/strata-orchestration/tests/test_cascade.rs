//! Integration tests for cascade create/delete
//!
//! Covers:
//! - Conceptual → logical → physical replication with provenance
//! - Type inference for a logical-home object
//! - Relationship inputs resolved by name with N:1 flipping
//! - Deletion leaving zero residual rows
//! - Compensation when a later step fails

mod common;

use common::{customer_attributes, order_attributes, Engine};
use pretty_assertions::assert_eq;
use strata_orchestration::{
    AttributeInput, CompensatingAction, CreateObjectRequest, DeleteOptions, ErrorCategory,
    LayerConfig, ObjectInput, ObjectRef, RelationshipInput, SyncConfig, SyncError,
};
use strata_storage::{Cardinality, Layer, LevelKind, ModelStore, Position};

#[tokio::test]
async fn test_customer_cascades_into_every_layer() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;

    let result = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Customer"))
                .with_attributes(customer_attributes()),
        )
        .await
        .unwrap();

    assert!(result.cascade_performed);
    assert_eq!(result.primary_object.model_id, family.conceptual.id);
    assert!(result.primary_object.provenance.is_none());

    for layer in [Layer::Logical, Layer::Physical] {
        let model = family.layer(layer).unwrap();
        let replica = engine.object_named(model.id, "Customer").await.unwrap();

        let provenance = replica.provenance.unwrap();
        assert_eq!(provenance.origin_object_id, result.primary_object.id);
        assert_eq!(provenance.origin_model_id, family.conceptual.id);
        assert_eq!(provenance.layer, layer);

        let attributes = engine.attributes(replica.id).await;
        assert_eq!(attributes.len(), 2);

        let id = engine.attribute_named(replica.id, "id").await;
        assert!(id.is_primary_key);
        assert!(!id.nullable);
        assert!(id.origin_attribute_id.is_some());

        let email = engine.attribute_named(replica.id, "email").await;
        assert!(email.nullable);
        assert_eq!(email.physical_type.as_deref(), Some("Text"));

        let placements = engine
            .store
            .get_model_objects_by_object(replica.id)
            .await
            .unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].model_id, model.id);
    }
}

#[tokio::test]
async fn test_logical_home_derives_physical_type_from_logical() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    let logical = family.logical.clone().unwrap();

    let email = AttributeInput {
        logical_type: Some("VARCHAR(255)".to_string()),
        ..AttributeInput::new("email", "Text")
    };
    let result = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(logical.id, ObjectInput::new("Contact"))
                .with_attributes(vec![email]),
        )
        .await
        .unwrap();

    assert!(result.cascade_performed);
    assert!(result.layers.conceptual.is_none());

    let physical = result.layers.get(Layer::Physical).unwrap();
    assert_eq!(
        physical.object.provenance.unwrap().origin_object_id,
        result.primary_object.id
    );
    assert_eq!(
        physical.attributes[0].physical_type.as_deref(),
        Some("VARCHAR(255)")
    );
    assert_eq!(
        physical.attributes[0].logical_type.as_deref(),
        Some("VARCHAR(255)")
    );

    // Nothing was written upward
    assert!(engine.objects(family.conceptual.id).await.is_empty());
}

#[tokio::test]
async fn test_cascade_disabled_stays_home() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;

    let result = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Draft")).with_cascade(false),
        )
        .await
        .unwrap();

    assert!(!result.cascade_performed);
    assert!(engine.objects(family.logical.unwrap().id).await.is_empty());
    assert!(engine.objects(family.physical.unwrap().id).await.is_empty());
}

#[tokio::test]
async fn test_layer_config_overrides_land_on_placement() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    let physical = family.physical.clone().unwrap();

    let result = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Customer"))
                .with_layer_config(
                    Layer::Conceptual,
                    LayerConfig {
                        position: Some(Position::new(10.0, 20.0)),
                        ..Default::default()
                    },
                )
                .with_layer_config(
                    Layer::Physical,
                    LayerConfig {
                        target_system_id: Some(9),
                        is_visible: Some(false),
                        ..Default::default()
                    },
                ),
        )
        .await
        .unwrap();

    let replica = result.layers.get(Layer::Physical).unwrap();
    assert_eq!(replica.model_object.model_id, physical.id);
    assert_eq!(replica.model_object.target_system_id, Some(9));
    assert!(!replica.model_object.is_visible);
    // Inherited from the home layer config
    assert_eq!(replica.model_object.position, Some(Position::new(10.0, 20.0)));
}

#[tokio::test]
async fn test_relationship_input_flips_many_to_one() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    engine
        .create(family.conceptual.id, "Customer", customer_attributes())
        .await;

    let result = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Order"))
                .with_attributes(order_attributes())
                .with_relationship(
                    RelationshipInput::to(ObjectRef::Name("customer".to_string()))
                        .with_cardinality("N:1")
                        .on_attributes("customer_id", "id"),
                ),
        )
        .await
        .unwrap();

    let outcome = &result.relationships[0];
    assert!(outcome.canonical.is_some());
    assert!(outcome.skipped.is_empty());

    let conceptual = outcome.for_layer(Layer::Conceptual).unwrap();
    assert_eq!(conceptual.level.kind(), LevelKind::Object);
    assert_eq!(conceptual.relationship_type, Cardinality::OneToMany);

    let logical_model = family.logical.clone().unwrap();
    let customer = engine.object_named(logical_model.id, "Customer").await.unwrap();
    let order = engine.object_named(logical_model.id, "Order").await.unwrap();
    let customer_id = engine.attribute_named(customer.id, "id").await;
    let order_fk = engine.attribute_named(order.id, "customer_id").await;

    let logical = outcome.for_layer(Layer::Logical).unwrap();
    assert_eq!(logical.source_object_id, customer.id);
    assert_eq!(logical.target_object_id, order.id);
    assert_eq!(logical.level.attribute_ids(), Some((customer_id.id, order_fk.id)));
    assert_eq!(logical.canonical_id, outcome.canonical.as_ref().map(|c| c.id));

    assert_eq!(
        outcome.for_layer(Layer::Physical).unwrap().level.kind(),
        LevelKind::Attribute
    );
}

#[tokio::test]
async fn test_unknown_relationship_target_is_not_found() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;

    let err = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Order"))
                .with_relationship(RelationshipInput::to(ObjectRef::Name("Ghost".to_string()))),
        )
        .await
        .unwrap_err();

    // The order itself was already written, so this is a partial cascade
    assert_eq!(err.category(), ErrorCategory::PartialCascade);
    let SyncError::PartialCascade { source, report, .. } = err else {
        unreachable!()
    };
    assert!(matches!(*source, SyncError::ObjectNameNotFound { .. }));
    assert!(report.is_clean());
    assert_eq!(engine.store.get_stats().await.unwrap().objects, 0);
}

#[tokio::test]
async fn test_invalid_cardinality_rejected_before_writes() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;

    let err = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Order"))
                .with_relationship(RelationshipInput::to(ObjectRef::Id(1)).with_cardinality("lots")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidRequest(_)));
    assert_eq!(engine.store.get_stats().await.unwrap().objects, 0);
}

#[tokio::test]
async fn test_delete_with_replicas_leaves_no_residue() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    let customer = engine
        .create(family.conceptual.id, "Customer", customer_attributes())
        .await;
    engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Order"))
                .with_attributes(order_attributes())
                .with_relationship(
                    RelationshipInput::to(ObjectRef::Id(customer.id))
                        .with_cardinality("N:1")
                        .on_attributes("customer_id", "id"),
                ),
        )
        .await
        .unwrap();

    let before = engine.store.get_stats().await.unwrap();
    assert_eq!(before.objects, 6);
    assert_eq!(before.relationships, 3);
    assert_eq!(before.canonical_relationships, 1);

    let report = engine
        .cascade()
        .delete_object_cascade(
            customer.id,
            DeleteOptions {
                include_replicas: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.objects.len(), 3);
    assert_eq!(report.attributes, 6);
    assert_eq!(report.relationships, 3);

    let after = engine.store.get_stats().await.unwrap();
    assert_eq!(after.objects, 3);
    assert_eq!(after.attributes, 6);
    assert_eq!(after.model_objects, 3);
    assert_eq!(after.relationships, 0);
    assert_eq!(after.canonical_relationships, 0);

    for model in family.layer_models() {
        assert!(engine.object_named(model.id, "Customer").await.is_none());
    }
}

#[tokio::test]
async fn test_delete_without_replicas_keeps_lower_layers() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    let customer = engine
        .create(family.conceptual.id, "Customer", customer_attributes())
        .await;

    engine
        .cascade()
        .delete_object_cascade(customer.id, DeleteOptions::default())
        .await
        .unwrap();

    assert!(engine.object_named(family.conceptual.id, "Customer").await.is_none());
    let logical = family.logical.unwrap();
    assert!(engine.object_named(logical.id, "Customer").await.is_some());
}

#[tokio::test]
async fn test_failed_attribute_batch_rolls_back() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    engine.store.fail_on("create_attributes_batch");

    let err = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Customer"))
                .with_attributes(customer_attributes()),
        )
        .await
        .unwrap_err();

    let SyncError::PartialCascade { step, report, .. } = err else {
        panic!("expected partial cascade");
    };
    assert!(step.starts_with("create object"));
    assert!(report.rollback_attempted);
    assert!(report.is_clean());
    assert!(report
        .completed
        .iter()
        .any(|a| matches!(a, CompensatingAction::DeleteObject(_))));

    let stats = engine.store.get_stats().await.unwrap();
    assert_eq!(stats.objects, 0);
    assert_eq!(stats.model_objects, 0);
}

#[tokio::test]
async fn test_failed_relationship_step_rolls_back_replicas() {
    let engine = Engine::new();
    let family = engine.family("Sales").await;
    let customer = engine
        .create(family.conceptual.id, "Customer", customer_attributes())
        .await;
    let baseline = engine.store.get_stats().await.unwrap();

    engine.store.fail_on("create_relationship");
    let err = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Order"))
                .with_attributes(order_attributes())
                .with_relationship(RelationshipInput::to(ObjectRef::Id(customer.id))),
        )
        .await
        .unwrap_err();

    let SyncError::PartialCascade { step, report, .. } = err else {
        panic!("expected partial cascade");
    };
    assert!(step.starts_with("sync relationship"));
    assert!(report.is_clean());
    assert!(report.residual().is_empty());

    // Order replicas and the canonical anchor are gone again
    assert_eq!(engine.store.get_stats().await.unwrap(), baseline);
}

#[tokio::test]
async fn test_failure_without_rollback_reports_residue() {
    let mut config = SyncConfig::default();
    config.cascade.rollback_on_failure = false;
    let engine = Engine::with_config(config);
    let family = engine.family("Sales").await;
    engine.store.fail_on("create_attributes_batch");

    let err = engine
        .cascade()
        .create_object_with_cascade(
            CreateObjectRequest::new(family.conceptual.id, ObjectInput::new("Customer"))
                .with_attributes(customer_attributes()),
        )
        .await
        .unwrap_err();

    let SyncError::PartialCascade { report, .. } = err else {
        panic!("expected partial cascade");
    };
    assert!(!report.rollback_attempted);
    assert_eq!(report.residual().len(), 2);
    assert_eq!(engine.store.get_stats().await.unwrap().objects, 1);
}
