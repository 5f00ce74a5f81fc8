use sea_orm::sea_query::SimpleExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entity::{join_record, relationship};
use crate::error::DataMeshError;
use crate::pk::RecordPk;
use crate::registry::is_unique_violation;

/// Write-side context for join creation.
///
/// Organization scope is required on the request path; only bulk seeders
/// may write globally visible joins.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinWriteCtx {
    pub organization: Option<Uuid>,
    pub migration_seed: bool,
}

impl JoinWriteCtx {
    pub fn for_request(organization: Option<Uuid>) -> Self {
        Self {
            organization,
            migration_seed: false,
        }
    }

    pub fn for_seed(organization: Option<Uuid>) -> Self {
        Self {
            organization,
            migration_seed: true,
        }
    }
}

/// Result of an idempotent join write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Created,
    Existed,
}

/// Persistent store of (relationship, origin PK, related PK, organization)
/// tuples.
#[derive(Clone)]
pub struct JoinStore {
    db: DatabaseConnection,
}

fn origin_expr(pk: &RecordPk) -> SimpleExpr {
    match pk {
        RecordPk::Uuid(uuid) => join_record::Column::RecordUuid.eq(*uuid),
        RecordPk::Id(id) => join_record::Column::RecordId.eq(*id),
    }
}

fn related_expr(pk: &RecordPk) -> SimpleExpr {
    match pk {
        RecordPk::Uuid(uuid) => join_record::Column::RelatedRecordUuid.eq(*uuid),
        RecordPk::Id(id) => join_record::Column::RelatedRecordId.eq(*id),
    }
}

impl JoinStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist a join tuple. The PK kind of each side independently selects
    /// the `_id` or `_uuid` column.
    pub async fn insert(
        &self,
        relationship_id: i32,
        origin: &RecordPk,
        related: &RecordPk,
        ctx: &JoinWriteCtx,
    ) -> Result<join_record::Model, DataMeshError> {
        if ctx.organization.is_none() && !ctx.migration_seed {
            return Err(DataMeshError::OrgRequired);
        }

        let mut row = join_record::ActiveModel {
            relationship_id: Set(relationship_id),
            organization_uuid: Set(ctx.organization),
            ..Default::default()
        };
        match origin {
            RecordPk::Uuid(uuid) => row.record_uuid = Set(Some(*uuid)),
            RecordPk::Id(id) => row.record_id = Set(Some(*id)),
        }
        match related {
            RecordPk::Uuid(uuid) => row.related_record_uuid = Set(Some(*uuid)),
            RecordPk::Id(id) => row.related_record_id = Set(Some(*id)),
        }

        Ok(row.insert(&self.db).await?)
    }

    /// Read side of the validate-join idempotency check.
    pub async fn exists(
        &self,
        relationship_id: i32,
        origin: &RecordPk,
        related: &RecordPk,
    ) -> Result<bool, DataMeshError> {
        let found = join_record::Entity::find()
            .filter(
                Condition::all()
                    .add(join_record::Column::RelationshipId.eq(relationship_id))
                    .add(origin_expr(origin))
                    .add(related_expr(related)),
            )
            .one(&self.db)
            .await?;
        Ok(found.is_some())
    }

    /// Canonical idempotent entry point: create the join only if it does not
    /// already exist. Tolerates concurrent callers; a losing insert is
    /// reported as `Existed`.
    pub async fn validate_join(
        &self,
        relationship_id: i32,
        origin: &RecordPk,
        related: &RecordPk,
        ctx: &JoinWriteCtx,
    ) -> Result<JoinOutcome, DataMeshError> {
        if self.exists(relationship_id, origin, related).await? {
            return Ok(JoinOutcome::Existed);
        }
        match self.insert(relationship_id, origin, related, ctx).await {
            Ok(_) => Ok(JoinOutcome::Created),
            Err(DataMeshError::Database(err)) if is_unique_violation(&err) => {
                Ok(JoinOutcome::Existed)
            }
            Err(err) => Err(err),
        }
    }

    /// Same as [`validate_join`](Self::validate_join), addressed by
    /// relationship key.
    pub async fn validate_join_by_key(
        &self,
        relationship_key: &str,
        origin: &RecordPk,
        related: &RecordPk,
        ctx: &JoinWriteCtx,
    ) -> Result<JoinOutcome, DataMeshError> {
        let relationship = relationship::Entity::find()
            .filter(relationship::Column::Key.eq(relationship_key))
            .one(&self.db)
            .await?
            .ok_or_else(|| DataMeshError::RelationshipNotFound(relationship_key.to_owned()))?;
        self.validate_join(relationship.id, origin, related, ctx)
            .await
    }

    /// Related PKs of `pk` under `relationship_id`. `forward` means `pk`
    /// sits on the origin side. Reads are scoped to the request organization
    /// plus globally visible joins; without an organization only global
    /// joins are returned.
    pub async fn find_related(
        &self,
        relationship_id: i32,
        pk: &RecordPk,
        forward: bool,
        organization: Option<Uuid>,
    ) -> Result<Vec<RecordPk>, DataMeshError> {
        let side = if forward {
            origin_expr(pk)
        } else {
            related_expr(pk)
        };
        let org_scope = match organization {
            Some(org) => Condition::any()
                .add(join_record::Column::OrganizationUuid.eq(org))
                .add(join_record::Column::OrganizationUuid.is_null()),
            None => Condition::any().add(join_record::Column::OrganizationUuid.is_null()),
        };

        let rows = join_record::Entity::find()
            .filter(
                Condition::all()
                    .add(join_record::Column::RelationshipId.eq(relationship_id))
                    .add(side)
                    .add(org_scope),
            )
            .all(&self.db)
            .await?;

        // Rows with an unpopulated far side are malformed; filter on read.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                if forward {
                    row.related_record_uuid
                        .map(RecordPk::Uuid)
                        .or(row.related_record_id.map(RecordPk::Id))
                } else {
                    row.record_uuid
                        .map(RecordPk::Uuid)
                        .or(row.record_id.map(RecordPk::Id))
                }
            })
            .collect())
    }

    /// Delete tuples connecting the two PKs, in either direction, across all
    /// relationships.
    pub async fn delete_matching(
        &self,
        pk: &RecordPk,
        previous_pk: &RecordPk,
    ) -> Result<u64, DataMeshError> {
        let res = join_record::Entity::delete_many()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(origin_expr(pk))
                            .add(related_expr(previous_pk)),
                    )
                    .add(
                        Condition::all()
                            .add(origin_expr(previous_pk))
                            .add(related_expr(pk)),
                    ),
            )
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Delete every tuple referencing `pk` on either side. Used after the
    /// primary record itself was deleted.
    pub async fn delete_touching(&self, pk: &RecordPk) -> Result<u64, DataMeshError> {
        let res = join_record::Entity::delete_many()
            .filter(
                Condition::any()
                    .add(origin_expr(pk))
                    .add(related_expr(pk)),
            )
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }
}
