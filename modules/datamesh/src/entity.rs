//! SeaORM entities for the relationship registry and the join record store.

/// A registered backend microservice.
pub mod logic_module {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "logic_module")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Stable, URL-safe routing identity. Immutable after creation.
        #[sea_orm(unique)]
        pub endpoint_name: String,
        /// Absolute base URL of the service.
        pub endpoint: String,
        /// URL where the OpenAPI document is served.
        pub docs_endpoint: String,
        /// Served from inside the gateway process, bypassing the HTTP client.
        pub is_local: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// A single resource type within a logic module.
pub mod logic_module_model {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "logic_module_model")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Resource type name, unique per logic module.
        pub model: String,
        pub logic_module_endpoint_name: String,
        /// Path under the logic module, e.g. `/product/`.
        pub endpoint: String,
        /// Field carrying the primary key in response bodies, e.g. `product_uuid`.
        pub lookup_field_name: String,
        pub is_local: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// A directed, named edge type between two logic module models.
pub mod relationship {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "relationship")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub origin_model_id: i32,
        pub related_model_id: i32,
        /// Stable human-readable slug. Immutable after creation.
        #[sea_orm(unique)]
        pub key: String,
        /// Payload field holding the related PK when the join is expressed
        /// as an inline foreign key.
        pub fk_field_name: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// A materialised instance of a relationship linking two concrete records.
///
/// Exactly one of (`record_id`, `record_uuid`) and one of
/// (`related_record_id`, `related_record_uuid`) is populated per row.
pub mod join_record {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "join_record")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub relationship_id: i32,
        pub record_id: Option<i64>,
        pub record_uuid: Option<Uuid>,
        pub related_record_id: Option<i64>,
        pub related_record_uuid: Option<Uuid>,
        /// Tenant scope; `None` marks a globally visible join (seeders only).
        pub organization_uuid: Option<Uuid>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
