//! Operation storage backed by PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use process_engine::operation::{InstanceDetails, ProvisioningParameters};
use process_engine::{Operation, OperationState, OperationType, Operations, StorageError};

use crate::db::DbPool;

const SELECT_COLUMNS: &str = r#"
    SELECT id, instance_id, version, operation_type, state, description,
           created_at, updated_at, finished_stages, finished_steps,
           provisioning_parameters, instance_details
    FROM operations
"#;

/// Row of the `operations` table.
#[derive(Debug, FromRow)]
struct OperationRow {
    id: String,
    instance_id: String,
    version: i64,
    operation_type: String,
    state: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_stages: Vec<String>,
    finished_steps: Vec<String>,
    provisioning_parameters: Json<ProvisioningParameters>,
    instance_details: Json<InstanceDetails>,
}

impl From<OperationRow> for Operation {
    fn from(row: OperationRow) -> Self {
        Operation {
            id: row.id,
            instance_id: row.instance_id,
            version: row.version,
            operation_type: OperationType::from(row.operation_type.as_str()),
            state: OperationState::from(row.state.as_str()),
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_stages: row.finished_stages,
            finished_steps: row.finished_steps,
            provisioning_parameters: row.provisioning_parameters.0,
            instance_details: row.instance_details.0,
        }
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Unique violations on the primary key or on the one-unfinished-operation
/// index are conflicts; everything else is a backend error.
fn insert_error(e: sqlx::Error, operation: &Operation) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict(format!(
                "operation {} conflicts with a stored operation of instance {}",
                operation.id, operation.instance_id
            ));
        }
    }
    backend(e)
}

/// [`Operations`] implementation on top of a Postgres pool.
///
/// Updates are compare-and-swap on the `version` column.
#[derive(Clone)]
pub struct PostgresOperations {
    pool: DbPool,
}

impl PostgresOperations {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM operations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }

    /// Operations that are pending or in progress, oldest first.
    pub async fn unfinished_operations(&self) -> Result<Vec<Operation>, StorageError> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "{} WHERE state IN ($1, $2) ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .bind(OperationState::Pending.to_string())
        .bind(OperationState::InProgress.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(Operation::from).collect())
    }
}

#[async_trait]
impl Operations for PostgresOperations {
    async fn insert_operation(&self, operation: Operation) -> Result<Operation, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO operations (
                id, instance_id, version, operation_type, state, description,
                created_at, updated_at, finished_stages, finished_steps,
                provisioning_parameters, instance_details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.instance_id)
        .bind(operation.version)
        .bind(operation.operation_type.to_string())
        .bind(operation.state.to_string())
        .bind(&operation.description)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .bind(&operation.finished_stages)
        .bind(&operation.finished_steps)
        .bind(Json(operation.provisioning_parameters.clone()))
        .bind(Json(operation.instance_details.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, &operation))?;

        tracing::debug!(operation_id = %operation.id, instance_id = %operation.instance_id, "Operation inserted");
        Ok(operation)
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Operation, StorageError> {
        let row = sqlx::query_as::<_, OperationRow>(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Operation::from)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update_operation(&self, operation: Operation) -> Result<Operation, StorageError> {
        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            UPDATE operations
            SET version = version + 1, state = $3, description = $4, updated_at = $5,
                finished_stages = $6, finished_steps = $7,
                provisioning_parameters = $8, instance_details = $9
            WHERE id = $1 AND version = $2
            RETURNING id, instance_id, version, operation_type, state, description,
                      created_at, updated_at, finished_stages, finished_steps,
                      provisioning_parameters, instance_details
            "#,
        )
        .bind(&operation.id)
        .bind(operation.version)
        .bind(operation.state.to_string())
        .bind(&operation.description)
        .bind(Utc::now())
        .bind(&operation.finished_stages)
        .bind(&operation.finished_steps)
        .bind(Json(operation.provisioning_parameters.clone()))
        .bind(Json(operation.instance_details.clone()))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(row.into()),
            None if self.exists(&operation.id).await? => Err(StorageError::Conflict(format!(
                "operation {} changed since version {}",
                operation.id, operation.version
            ))),
            None => Err(StorageError::NotFound(operation.id)),
        }
    }

    async fn get_last_operation(&self, instance_id: &str) -> Result<Operation, StorageError> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "{} WHERE instance_id = $1 ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Operation::from)
            .ok_or_else(|| StorageError::NotFound(format!("instance {}", instance_id)))
    }
}
