use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::plan::{PlanKey, PlanState};
use crate::domain::repositories::{PlanEdit, StateError, StateRepository};

/// In-memory implementation of StateRepository
///
/// Used for single-process runs and tests. `modify` holds the write lock
/// across read-modify-write, so edits never interleave.
#[derive(Default)]
pub struct MemoryStateRepository {
    documents: RwLock<HashMap<PlanKey, PlanState>>,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRepository for MemoryStateRepository {
    async fn get(&self, key: &PlanKey) -> Result<Option<PlanState>, StateError> {
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn set(&self, key: &PlanKey, state: &PlanState) -> Result<(), StateError> {
        self.documents
            .write()
            .await
            .insert(key.clone(), state.clone());
        tracing::debug!(plan = %key, "Saved plan state");
        Ok(())
    }

    async fn modify(&self, key: &PlanKey, edit: PlanEdit) -> Result<PlanState, StateError> {
        let mut documents = self.documents.write().await;
        let current = documents.get(key).cloned().unwrap_or_default();
        let updated = edit(current)?;
        documents.insert(key.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &PlanKey) -> Result<bool, StateError> {
        Ok(self.documents.write().await.remove(key).is_some())
    }

    async fn exists(&self, key: &PlanKey) -> Result<bool, StateError> {
        Ok(self.documents.read().await.contains_key(key))
    }
}
