use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::repositories::{SessionError, SessionRepository};
use crate::domain::session::{Session, SessionKey, SessionValue};
use crate::infrastructure::store::{Store, StoreError};

const KEY_PREFIX: &str = "session";

/// Session repository on top of the shared key/value store
///
/// Each session is one JSON document under `session:<app>:<user>:<id>`.
/// Binary values go through the tagged base64 encoding of [`SessionValue`].
pub struct StoreSessionRepository {
    store: Arc<dyn Store>,
}

impl StoreSessionRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn storage_key(key: &SessionKey) -> String {
        format!(
            "{}:{}:{}:{}",
            KEY_PREFIX, key.app_name, key.user_id, key.session_id
        )
    }

    fn user_prefix(app_name: &str, user_id: &str) -> String {
        format!("{}:{}:{}:", KEY_PREFIX, app_name, user_id)
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Backend(err.to_string())
    }
}

#[async_trait]
impl SessionRepository for StoreSessionRepository {
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        match self.store.get(&Self::storage_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        key: SessionKey,
        initial_state: BTreeMap<String, SessionValue>,
    ) -> Result<Session, SessionError> {
        let session = Session::new(key, initial_state);
        self.update(&session).await?;
        tracing::info!(
            app = %session.key.app_name,
            user = %session.key.user_id,
            session = %session.key.session_id,
            "Created session"
        );
        Ok(session)
    }

    async fn update(&self, session: &Session) -> Result<(), SessionError> {
        let mut record = session.clone();
        record.last_update_time = Utc::now();
        let raw = serde_json::to_string(&record)?;
        self.store.set(&Self::storage_key(&session.key), raw).await?;
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, SessionError> {
        Ok(self.store.delete(&Self::storage_key(key)).await?)
    }

    async fn list(&self, app_name: &str, user_id: &str) -> Result<Vec<String>, SessionError> {
        let prefix = Self::user_prefix(app_name, user_id);
        let mut ids: Vec<String> = self
            .store
            .keys(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionEvent;
    use crate::infrastructure::store::MemoryStore;

    fn repo() -> StoreSessionRepository {
        StoreSessionRepository::new(Arc::new(MemoryStore::new()))
    }

    fn key(id: &str) -> SessionKey {
        SessionKey::new("trip_planner", "user-1", id).unwrap()
    }

    #[tokio::test]
    async fn create_and_reload_session() {
        let repo = repo();
        let mut state = BTreeMap::new();
        state.insert("origin".to_string(), SessionValue::from("BLR"));

        let created = repo.create(key("s1"), state.clone()).await.unwrap();
        let loaded = repo.get(&key("s1")).await.unwrap().unwrap();

        assert_eq!(loaded.key, created.key);
        assert_eq!(loaded.state, state);
        assert!(loaded.events.is_empty());
    }

    #[tokio::test]
    async fn appended_events_are_persisted_with_bytes() {
        let repo = repo();
        let mut session = repo.create(key("s1"), BTreeMap::new()).await.unwrap();

        repo.append_event(&mut session, SessionEvent::new("user", vec![1u8, 2, 255]))
            .await
            .unwrap();

        let loaded = repo.get(&key("s1")).await.unwrap().unwrap();
        assert_eq!(loaded.events.len(), 1);
        assert_eq!(loaded.events[0].content.as_bytes(), Some(&[1u8, 2, 255][..]));
    }

    #[tokio::test]
    async fn list_only_returns_the_users_sessions() {
        let repo = repo();
        repo.create(key("b"), BTreeMap::new()).await.unwrap();
        repo.create(key("a"), BTreeMap::new()).await.unwrap();
        repo.create(SessionKey::new("trip_planner", "user-2", "c").unwrap(), BTreeMap::new())
            .await
            .unwrap();

        let ids = repo.list("trip_planner", "user-1").await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let repo = repo();
        repo.create(key("s1"), BTreeMap::new()).await.unwrap();
        assert!(repo.delete(&key("s1")).await.unwrap());
        assert!(!repo.delete(&key("s1")).await.unwrap());
        assert!(repo.get(&key("s1")).await.unwrap().is_none());
    }
}
