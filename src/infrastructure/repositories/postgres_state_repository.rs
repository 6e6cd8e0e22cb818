use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::domain::plan::{PlanKey, PlanState};
use crate::domain::repositories::{PlanEdit, StateError, StateRepository};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS plan_states (
        user_id    TEXT        NOT NULL,
        plan_id    TEXT        NOT NULL,
        document   JSONB       NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, plan_id)
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO plan_states (user_id, plan_id, document, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (user_id, plan_id) DO UPDATE SET
        document = EXCLUDED.document,
        updated_at = EXCLUDED.updated_at
"#;

const INSERT_EMPTY: &str = r#"
    INSERT INTO plan_states (user_id, plan_id, document, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (user_id, plan_id) DO NOTHING
"#;

/// PostgreSQL implementation of StateRepository
///
/// Stores each plan as one JSONB document keyed by (user_id, plan_id).
/// `modify` inserts an empty row when needed, then locks it for the
/// read-modify-write.
pub struct PostgresStateRepository {
    pool: PgPool,
}

impl PostgresStateRepository {
    /// Creates a new PostgresStateRepository
    ///
    /// # Arguments
    /// * `pool` - SQLx connection pool for PostgreSQL
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table when it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StateError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("create plan_states table", e))?;
        Ok(())
    }
}

fn backend(action: &str, error: sqlx::Error) -> StateError {
    StateError::Backend(format!("Failed to {}: {}", action, error))
}

#[async_trait]
impl StateRepository for PostgresStateRepository {
    async fn get(&self, key: &PlanKey) -> Result<Option<PlanState>, StateError> {
        let row: Option<(Json<PlanState>,)> = sqlx::query_as(
            "SELECT document FROM plan_states WHERE user_id = $1 AND plan_id = $2",
        )
        .bind(key.user_id())
        .bind(key.plan_id())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("load plan state", e))?;

        Ok(row.map(|(Json(state),)| state))
    }

    async fn set(&self, key: &PlanKey, state: &PlanState) -> Result<(), StateError> {
        sqlx::query(UPSERT)
            .bind(key.user_id())
            .bind(key.plan_id())
            .bind(Json(state))
            .execute(&self.pool)
            .await
            .map_err(|e| backend("save plan state", e))?;

        tracing::info!(plan = %key, "Saved plan state");
        Ok(())
    }

    async fn modify(&self, key: &PlanKey, edit: PlanEdit) -> Result<PlanState, StateError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("begin transaction", e))?;

        // The row must exist before FOR UPDATE can lock it
        sqlx::query(INSERT_EMPTY)
            .bind(key.user_id())
            .bind(key.plan_id())
            .bind(Json(PlanState::default()))
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("create plan state", e))?;

        let (Json(current),): (Json<PlanState>,) = sqlx::query_as(
            "SELECT document FROM plan_states WHERE user_id = $1 AND plan_id = $2 FOR UPDATE",
        )
        .bind(key.user_id())
        .bind(key.plan_id())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| backend("lock plan state", e))?;

        let updated = edit(current)?;

        sqlx::query(UPSERT)
            .bind(key.user_id())
            .bind(key.plan_id())
            .bind(Json(&updated))
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("write plan state", e))?;

        tx.commit()
            .await
            .map_err(|e| backend("commit plan state", e))?;

        tracing::info!(plan = %key, "Modified plan state");
        Ok(updated)
    }

    async fn delete(&self, key: &PlanKey) -> Result<bool, StateError> {
        let result = sqlx::query("DELETE FROM plan_states WHERE user_id = $1 AND plan_id = $2")
            .bind(key.user_id())
            .bind(key.plan_id())
            .execute(&self.pool)
            .await
            .map_err(|e| backend("delete plan state", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &PlanKey) -> Result<bool, StateError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM plan_states WHERE user_id = $1 AND plan_id = $2)",
        )
        .bind(key.user_id())
        .bind(key.plan_id())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend("check plan state", e))?;

        Ok(exists)
    }
}
