use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::session::{Session, SessionEvent, SessionKey, SessionValue};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("session backend failed: {0}")]
    Backend(String),
}

/// Repository trait for conversation sessions
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError>;

    /// Create (or reset) a session with the given initial state
    async fn create(
        &self,
        key: SessionKey,
        initial_state: BTreeMap<String, SessionValue>,
    ) -> Result<Session, SessionError>;

    /// Overwrite the stored record with `session`
    async fn update(&self, session: &Session) -> Result<(), SessionError>;

    /// Record a turn and persist the session immediately
    async fn append_event(
        &self,
        session: &mut Session,
        event: SessionEvent,
    ) -> Result<(), SessionError> {
        session.push_event(event);
        self.update(session).await
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, SessionError>;

    /// Session ids stored for one user of one app
    async fn list(&self, app_name: &str, user_id: &str) -> Result<Vec<String>, SessionError>;
}
