use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set,
};

use crate::entity::{logic_module, logic_module_model, relationship};
use crate::error::DataMeshError;

/// Catalog of logic modules, their models, and the typed relationships
/// between them. Administrator-managed; rows are rarely mutated at runtime.
#[derive(Clone)]
pub struct ServiceRegistry {
    db: DatabaseConnection,
}

/// Registration data for a logic module.
#[derive(Debug, Clone)]
pub struct NewLogicModule {
    pub endpoint_name: String,
    pub endpoint: String,
    pub docs_endpoint: String,
    pub is_local: bool,
}

/// Registration data for a resource model within a logic module.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub model: String,
    pub logic_module_endpoint_name: String,
    pub endpoint: String,
    pub lookup_field_name: String,
    pub is_local: bool,
}

/// A relationship together with both of its endpoint models.
#[derive(Debug, Clone)]
pub struct RelationshipBinding {
    pub relationship: relationship::Model,
    pub origin_model: logic_module_model::Model,
    pub related_model: logic_module_model::Model,
}

impl RelationshipBinding {
    /// True when `model_id` sits on the origin side of the edge.
    /// Self-referencing relationships count as forward.
    pub fn is_forward_for(&self, model_id: i32) -> bool {
        self.origin_model.id == model_id
    }
}

/// True when a DbErr is a unique-constraint collision. Concurrent upserts
/// race on insert; the loser re-reads the committed row.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("UNIQUE constraint") || msg.contains("duplicate key")
}

impl ServiceRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Idempotent registration keyed by `endpoint_name`.
    pub async fn upsert_logic_module(
        &self,
        new: NewLogicModule,
    ) -> Result<logic_module::Model, DataMeshError> {
        if let Some(existing) = self.find_logic_module(&new.endpoint_name).await? {
            return Ok(existing);
        }

        let insert = logic_module::ActiveModel {
            endpoint_name: Set(new.endpoint_name.clone()),
            endpoint: Set(new.endpoint),
            docs_endpoint: Set(new.docs_endpoint),
            is_local: Set(new.is_local),
            ..Default::default()
        }
        .insert(&self.db)
        .await;

        match insert {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => self
                .find_logic_module(&new.endpoint_name)
                .await?
                .ok_or_else(|| DataMeshError::LogicModuleNotFound(new.endpoint_name)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_logic_module(
        &self,
        endpoint_name: &str,
    ) -> Result<Option<logic_module::Model>, DataMeshError> {
        Ok(logic_module::Entity::find()
            .filter(logic_module::Column::EndpointName.eq(endpoint_name))
            .one(&self.db)
            .await?)
    }

    /// Idempotent registration keyed by (logic module, model).
    pub async fn upsert_logic_module_model(
        &self,
        new: NewModel,
    ) -> Result<logic_module_model::Model, DataMeshError> {
        if let Some(existing) = self
            .find_model(&new.logic_module_endpoint_name, &new.model)
            .await?
        {
            return Ok(existing);
        }

        let insert = logic_module_model::ActiveModel {
            model: Set(new.model.clone()),
            logic_module_endpoint_name: Set(new.logic_module_endpoint_name.clone()),
            endpoint: Set(new.endpoint),
            lookup_field_name: Set(new.lookup_field_name),
            is_local: Set(new.is_local),
            ..Default::default()
        }
        .insert(&self.db)
        .await;

        match insert {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => self
                .find_model(&new.logic_module_endpoint_name, &new.model)
                .await?
                .ok_or_else(|| {
                    DataMeshError::misconfigured(&new.model, "model row vanished during upsert")
                }),
            Err(err) => Err(err.into()),
        }
    }

    /// Idempotent registration keyed by `key`; the (origin, related, key)
    /// tuple is the edge identity.
    pub async fn upsert_relationship(
        &self,
        origin_model_id: i32,
        related_model_id: i32,
        key: &str,
        fk_field_name: Option<&str>,
    ) -> Result<relationship::Model, DataMeshError> {
        if let Some(existing) = self.find_relationship(key).await? {
            return Ok(existing);
        }

        let insert = relationship::ActiveModel {
            origin_model_id: Set(origin_model_id),
            related_model_id: Set(related_model_id),
            key: Set(key.to_owned()),
            fk_field_name: Set(fk_field_name.map(str::to_owned)),
            ..Default::default()
        }
        .insert(&self.db)
        .await;

        match insert {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => self
                .find_relationship(key)
                .await?
                .ok_or_else(|| DataMeshError::RelationshipNotFound(key.to_owned())),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_relationship(
        &self,
        key: &str,
    ) -> Result<Option<relationship::Model>, DataMeshError> {
        Ok(relationship::Entity::find()
            .filter(relationship::Column::Key.eq(key))
            .one(&self.db)
            .await?)
    }

    /// Look up a relationship by key and load both endpoint models.
    pub async fn find_by_key(&self, key: &str) -> Result<RelationshipBinding, DataMeshError> {
        let relationship = self
            .find_relationship(key)
            .await?
            .ok_or_else(|| DataMeshError::RelationshipNotFound(key.to_owned()))?;
        self.bind(relationship).await
    }

    /// Every relationship touching `model_id`, in either direction. Used by
    /// expansion to discover what to fan out.
    pub async fn relationships_for(
        &self,
        model_id: i32,
    ) -> Result<Vec<RelationshipBinding>, DataMeshError> {
        let rows = relationship::Entity::find()
            .filter(
                Condition::any()
                    .add(relationship::Column::OriginModelId.eq(model_id))
                    .add(relationship::Column::RelatedModelId.eq(model_id)),
            )
            .all(&self.db)
            .await?;

        let mut bindings = Vec::with_capacity(rows.len());
        for row in rows {
            bindings.push(self.bind(row).await?);
        }
        Ok(bindings)
    }

    /// Look up a model by its (logic module, model name) identity.
    pub async fn find_model(
        &self,
        logic_module_endpoint_name: &str,
        model: &str,
    ) -> Result<Option<logic_module_model::Model>, DataMeshError> {
        Ok(logic_module_model::Entity::find()
            .filter(
                Condition::all()
                    .add(
                        logic_module_model::Column::LogicModuleEndpointName
                            .eq(logic_module_endpoint_name),
                    )
                    .add(logic_module_model::Column::Model.eq(model)),
            )
            .one(&self.db)
            .await?)
    }

    /// Resolve the model an inbound sub-path targets, by its endpoint's
    /// first segment (`/product/…` → the model registered at `/product/`).
    pub async fn find_model_by_endpoint(
        &self,
        logic_module_endpoint_name: &str,
        first_segment: &str,
    ) -> Result<Option<logic_module_model::Model>, DataMeshError> {
        let wanted = first_segment.trim_matches('/');
        let rows = logic_module_model::Entity::find()
            .filter(
                logic_module_model::Column::LogicModuleEndpointName
                    .eq(logic_module_endpoint_name),
            )
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .find(|m| m.endpoint.trim_matches('/') == wanted))
    }

    async fn bind(
        &self,
        relationship: relationship::Model,
    ) -> Result<RelationshipBinding, DataMeshError> {
        let origin_model = logic_module_model::Entity::find_by_id(relationship.origin_model_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                DataMeshError::misconfigured(&relationship.key, "origin model row is missing")
            })?;
        let related_model = logic_module_model::Entity::find_by_id(relationship.related_model_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                DataMeshError::misconfigured(&relationship.key, "related model row is missing")
            })?;
        Ok(RelationshipBinding {
            relationship,
            origin_model,
            related_model,
        })
    }
}
