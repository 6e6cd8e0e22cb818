use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::plan::{FieldPath, PlanError, PlanKey, PlanState};

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("state backend failed: {0}")]
    Backend(String),
}

/// Edit applied to a plan document inside [`StateRepository::modify`]
pub type PlanEdit = Box<dyn FnOnce(PlanState) -> Result<PlanState, PlanError> + Send>;

/// Repository trait for plan documents
///
/// Defines the contract for the durable, user-visible plan store.
/// Implementations are constructed explicitly and shared by reference.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Load a plan document
    async fn get(&self, key: &PlanKey) -> Result<Option<PlanState>, StateError>;

    /// Replace a plan document
    async fn set(&self, key: &PlanKey, state: &PlanState) -> Result<(), StateError>;

    /// Atomically read, edit and write back one document.
    ///
    /// A missing document starts out empty. No other write to the same
    /// key can land between the read and the write. A rejected edit leaves
    /// the stored document untouched. Returns the stored result.
    async fn modify(&self, key: &PlanKey, edit: PlanEdit) -> Result<PlanState, StateError>;

    /// Write one field, merging record values into existing records.
    /// A missing document starts out empty.
    async fn update_field(
        &self,
        key: &PlanKey,
        path: &FieldPath,
        value: Value,
    ) -> Result<(), StateError> {
        let target = path.clone();
        self.modify(key, Box::new(move |plan| plan.with_update(&target, value)))
            .await?;
        tracing::debug!(plan = %key, field = %path, "Updated plan field");
        Ok(())
    }

    /// Remove a plan document; returns whether one existed
    async fn delete(&self, key: &PlanKey) -> Result<bool, StateError>;

    async fn exists(&self, key: &PlanKey) -> Result<bool, StateError>;
}
