mod common;

use common::test_db;
use datamesh::seed::{self, SeedError, SeedFile};
use datamesh::{JoinStore, RecordPk, ServiceRegistry};
use uuid::Uuid;

const SEED: &str = r#"
logic_modules:
  - endpoint_name: products
    endpoint: http://products.svc
    docs_endpoint: http://products.svc/docs
  - endpoint_name: crm
    endpoint: http://crm.svc
    docs_endpoint: http://crm.svc/docs

models:
  - model: Product
    logic_module_endpoint_name: products
    endpoint: /product/
    lookup_field_name: product_uuid
  - model: ProductTeam
    logic_module_endpoint_name: crm
    endpoint: /productteam/
    lookup_field_name: product_team_uuid

relationships:
  - origin_module: products
    origin_model: Product
    related_module: crm
    related_model: ProductTeam
    key: product_product_team_relationship
    fk_field_name: product_team_uuid

joins:
  - relationship: product_product_team_relationship
    origin_pk: "550e8400-e29b-41d4-a716-446655440000"
    related_pk: "42"
"#;

#[tokio::test]
async fn seed_file_applies_idempotently() {
    let db = test_db().await;
    let file = SeedFile::parse(SEED).unwrap();

    let report = seed::apply(&db, file.clone()).await.unwrap();
    assert_eq!(report.logic_modules, 2);
    assert_eq!(report.models, 2);
    assert_eq!(report.relationships, 1);
    assert_eq!(report.joins_created, 1);
    assert_eq!(report.joins_existing, 0);

    // Global join (no organization) is legal from the seeder path.
    let registry = ServiceRegistry::new(db.clone());
    let binding = registry
        .find_by_key("product_product_team_relationship")
        .await
        .unwrap();
    let store = JoinStore::new(db.clone());
    assert!(store
        .exists(
            binding.relationship.id,
            &RecordPk::parse("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            &RecordPk::Id(42)
        )
        .await
        .unwrap());

    // Re-applying the same file creates nothing new.
    let report = seed::apply(&db, SeedFile::parse(SEED).unwrap())
        .await
        .unwrap();
    assert_eq!(report.joins_created, 0);
    assert_eq!(report.joins_existing, 1);
}

#[tokio::test]
async fn seeded_joins_are_visible_to_any_tenant() {
    let db = test_db().await;
    seed::apply(&db, SeedFile::parse(SEED).unwrap())
        .await
        .unwrap();

    let registry = ServiceRegistry::new(db.clone());
    let binding = registry
        .find_by_key("product_product_team_relationship")
        .await
        .unwrap();
    let store = JoinStore::new(db);

    let related = store
        .find_related(
            binding.relationship.id,
            &RecordPk::parse("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            true,
            Some(Uuid::new_v4()),
        )
        .await
        .unwrap();
    assert_eq!(related, vec![RecordPk::Id(42)]);
}

#[tokio::test]
async fn relationships_must_reference_known_models() {
    let db = test_db().await;

    let bad = r#"
relationships:
  - origin_module: products
    origin_model: Product
    related_module: crm
    related_model: Ghost
    key: product_ghost_relationship
"#;
    let result = seed::apply(&db, SeedFile::parse(bad).unwrap()).await;
    assert!(matches!(result, Err(SeedError::UnknownModel { .. })));
}

#[tokio::test]
async fn join_pks_are_validated() {
    let db = test_db().await;
    seed::apply(&db, SeedFile::parse(SEED).unwrap())
        .await
        .unwrap();

    let bad = r#"
joins:
  - relationship: product_product_team_relationship
    origin_pk: "not-a-key"
    related_pk: "42"
"#;
    let result = seed::apply(&db, SeedFile::parse(bad).unwrap()).await;
    assert!(matches!(result, Err(SeedError::InvalidJoin { .. })));
}
