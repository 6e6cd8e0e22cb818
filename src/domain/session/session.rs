use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::SessionValue;

/// Address of a conversation session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    /// Creates a key, rejecting empty components
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<Self, String> {
        let key = Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        };
        if key.app_name.is_empty() || key.user_id.is_empty() || key.session_id.is_empty() {
            return Err(format!(
                "session key components cannot be empty: {}/{}/{}",
                key.app_name, key.user_id, key.session_id
            ));
        }
        Ok(key)
    }
}

/// One turn recorded in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub author: String,
    pub content: SessionValue,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(author: impl Into<String>, content: impl Into<SessionValue>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: author.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ephemeral conversation record: turn history plus scratch state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    #[serde(default)]
    pub state: BTreeMap<String, SessionValue>,
    #[serde(default)]
    pub events: Vec<SessionEvent>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey, state: BTreeMap<String, SessionValue>) -> Self {
        Self {
            key,
            state,
            events: Vec::new(),
            last_update_time: Utc::now(),
        }
    }

    pub fn push_event(&mut self, event: SessionEvent) {
        self.last_update_time = event.timestamp;
        self.events.push(event);
    }
}
