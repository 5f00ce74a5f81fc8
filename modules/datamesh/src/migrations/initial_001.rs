use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LogicModule::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LogicModule::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LogicModule::EndpointName)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(LogicModule::Endpoint).string().not_null())
                    .col(
                        ColumnDef::new(LogicModule::DocsEndpoint)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LogicModule::IsLocal)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LogicModuleModel::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LogicModuleModel::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LogicModuleModel::Model).string().not_null())
                    .col(
                        ColumnDef::new(LogicModuleModel::LogicModuleEndpointName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LogicModuleModel::Endpoint)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LogicModuleModel::LookupFieldName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LogicModuleModel::IsLocal)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        // (logic_module_endpoint_name, model) is the identity of a model row.
        manager
            .create_index(
                Index::create()
                    .name("idx_lmm_module_model")
                    .table(LogicModuleModel::Table)
                    .col(LogicModuleModel::LogicModuleEndpointName)
                    .col(LogicModuleModel::Model)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Relationship::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Relationship::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Relationship::OriginModelId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Relationship::RelatedModelId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Relationship::Key)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Relationship::FkFieldName).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_relationship_origin_model")
                            .from(Relationship::Table, Relationship::OriginModelId)
                            .to(LogicModuleModel::Table, LogicModuleModel::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_relationship_related_model")
                            .from(Relationship::Table, Relationship::RelatedModelId)
                            .to(LogicModuleModel::Table, LogicModuleModel::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_relationship_edge")
                    .table(Relationship::Table)
                    .col(Relationship::OriginModelId)
                    .col(Relationship::RelatedModelId)
                    .col(Relationship::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(JoinRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JoinRecord::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(JoinRecord::RelationshipId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(JoinRecord::RecordId).big_integer())
                    .col(ColumnDef::new(JoinRecord::RecordUuid).uuid())
                    .col(ColumnDef::new(JoinRecord::RelatedRecordId).big_integer())
                    .col(ColumnDef::new(JoinRecord::RelatedRecordUuid).uuid())
                    .col(ColumnDef::new(JoinRecord::OrganizationUuid).uuid())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_join_record_relationship")
                            .from(JoinRecord::Table, JoinRecord::RelationshipId)
                            .to(Relationship::Table, Relationship::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Per row, exactly one of these four indexes has no NULL column, so
        // duplicates of the populated PK pair collide while rows of other
        // kind combinations pass. They double as forward-lookup indexes.
        for (name, origin_col, related_col) in [
            (
                "uq_join_uuid_uuid",
                JoinRecord::RecordUuid,
                JoinRecord::RelatedRecordUuid,
            ),
            (
                "uq_join_uuid_id",
                JoinRecord::RecordUuid,
                JoinRecord::RelatedRecordId,
            ),
            (
                "uq_join_id_uuid",
                JoinRecord::RecordId,
                JoinRecord::RelatedRecordUuid,
            ),
            (
                "uq_join_id_id",
                JoinRecord::RecordId,
                JoinRecord::RelatedRecordId,
            ),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(JoinRecord::Table)
                        .col(JoinRecord::RelationshipId)
                        .col(origin_col)
                        .col(related_col)
                        .unique()
                        .to_owned(),
                )
                .await?;
        }

        // Reverse-lookup indexes
        for (name, column) in [
            ("idx_join_related_uuid", JoinRecord::RelatedRecordUuid),
            ("idx_join_related_id", JoinRecord::RelatedRecordId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(JoinRecord::Table)
                        .col(JoinRecord::RelationshipId)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JoinRecord::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Relationship::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LogicModuleModel::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LogicModule::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum LogicModule {
    Table,
    Id,
    EndpointName,
    Endpoint,
    DocsEndpoint,
    IsLocal,
}

#[derive(DeriveIden)]
enum LogicModuleModel {
    Table,
    Id,
    Model,
    LogicModuleEndpointName,
    Endpoint,
    LookupFieldName,
    IsLocal,
}

#[derive(DeriveIden)]
enum Relationship {
    Table,
    Id,
    OriginModelId,
    RelatedModelId,
    Key,
    FkFieldName,
}

#[derive(DeriveIden)]
enum JoinRecord {
    Table,
    Id,
    RelationshipId,
    RecordId,
    RecordUuid,
    RelatedRecordId,
    RelatedRecordUuid,
    OrganizationUuid,
}
