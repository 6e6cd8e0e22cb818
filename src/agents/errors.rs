use thiserror::Error;

use crate::domain::repositories::{SessionError, StateError};
use crate::infrastructure::broker::BrokerError;

/// Errors that can occur in the agent system
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Capability failed: {0}")]
    Capability(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Session store error: {0}")]
    Session(#[from] SessionError),

    #[error("Message {0} is not a task")]
    NotATask(uuid::Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
