use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::agents::messages::Message;
use crate::api::errors::ApiError;
use crate::api::AppState;
use crate::infrastructure::broker::QueueNames;

/// Depths of an agent's queues
#[derive(Debug, Serialize)]
pub struct QueueDepths {
    pub agent: String,
    pub tasks: usize,
    pub processing: usize,
    pub dlq: usize,
}

#[derive(Debug, Serialize)]
pub struct RecoveryReport {
    pub agent: String,
    pub recovered: usize,
}

/// GET /api/queues/:agent
pub async fn queue_depths(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> Result<Json<QueueDepths>, ApiError> {
    let queues = QueueNames::for_agent(&agent);
    Ok(Json(QueueDepths {
        tasks: state.broker.depth(&queues.tasks).await?,
        processing: state.broker.depth(&queues.processing).await?,
        dlq: state.broker.depth(&queues.dlq).await?,
        agent,
    }))
}

/// Dead-lettered messages, oldest first
///
/// GET /api/queues/:agent/dlq
pub async fn dead_letters(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let queues = QueueNames::for_agent(&agent);
    Ok(Json(state.broker.peek(&queues.dlq).await?))
}

/// Move everything claimed but never acknowledged back onto the task queue.
/// Only safe once the agent's worker is known to be down.
///
/// POST /api/queues/:agent/recover
pub async fn recover(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> Result<Json<RecoveryReport>, ApiError> {
    let queues = QueueNames::for_agent(&agent);
    let recovered = state
        .broker
        .recover_in_flight(&queues.processing, &queues.tasks)
        .await?;
    tracing::info!(agent = %agent, recovered, "Recovered in-flight tasks");
    Ok(Json(RecoveryReport { agent, recovered }))
}
