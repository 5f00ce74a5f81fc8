#![allow(dead_code)]

use datamesh::entity::{logic_module_model, relationship};
use datamesh::{NewLogicModule, NewModel, ServiceRegistry};
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

/// Create a fresh test database for each test
pub async fn test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to test database");

    datamesh::migrations::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

/// Two services, three models, two relationships off the product model.
pub struct Fixture {
    pub db: DatabaseConnection,
    pub registry: ServiceRegistry,
    pub product: logic_module_model::Model,
    pub team: logic_module_model::Model,
    pub tool: logic_module_model::Model,
    pub team_rel: relationship::Model,
    pub tool_rel: relationship::Model,
}

pub const TEAM_REL_KEY: &str = "product_product_team_relationship";
pub const TOOL_REL_KEY: &str = "product_product_tool_relationship";

pub async fn fixture() -> Fixture {
    let db = test_db().await;
    let registry = ServiceRegistry::new(db.clone());

    registry
        .upsert_logic_module(NewLogicModule {
            endpoint_name: "products".into(),
            endpoint: "http://products.svc".into(),
            docs_endpoint: "http://products.svc/docs".into(),
            is_local: false,
        })
        .await
        .expect("register products module");
    registry
        .upsert_logic_module(NewLogicModule {
            endpoint_name: "crm".into(),
            endpoint: "http://crm.svc".into(),
            docs_endpoint: "http://crm.svc/docs".into(),
            is_local: false,
        })
        .await
        .expect("register crm module");

    let product = registry
        .upsert_logic_module_model(NewModel {
            model: "Product".into(),
            logic_module_endpoint_name: "products".into(),
            endpoint: "/product/".into(),
            lookup_field_name: "product_uuid".into(),
            is_local: false,
        })
        .await
        .expect("register product model");
    let team = registry
        .upsert_logic_module_model(NewModel {
            model: "ProductTeam".into(),
            logic_module_endpoint_name: "crm".into(),
            endpoint: "/productteam/".into(),
            lookup_field_name: "product_team_uuid".into(),
            is_local: false,
        })
        .await
        .expect("register team model");
    let tool = registry
        .upsert_logic_module_model(NewModel {
            model: "ProductTool".into(),
            logic_module_endpoint_name: "crm".into(),
            endpoint: "/producttool/".into(),
            lookup_field_name: "product_tool_uuid".into(),
            is_local: false,
        })
        .await
        .expect("register tool model");

    let team_rel = registry
        .upsert_relationship(product.id, team.id, TEAM_REL_KEY, Some("product_team_uuid"))
        .await
        .expect("register team relationship");
    let tool_rel = registry
        .upsert_relationship(product.id, tool.id, TOOL_REL_KEY, Some("product_tool_uuid"))
        .await
        .expect("register tool relationship");

    Fixture {
        db,
        registry,
        product,
        team,
        tool,
        team_rel,
        tool_rel,
    }
}
