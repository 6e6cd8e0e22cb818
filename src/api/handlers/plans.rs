use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use uuid::Uuid;

use crate::agents::messages::{CorrelationId, Header, Message, MessageType, Payload, TaskPayload};
use crate::api::errors::ApiError;
use crate::api::AppState;
use crate::domain::plan::{PlanKey, PlanMessage, PlanState};
use crate::infrastructure::broker::{results_channel, QueueNames};

const INTAKE_SOURCE: &str = "user_interface";
const PLAN_TASK: &str = "plan_travel";

/// Request body for starting or continuing a plan
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub user_request: String,
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
}

/// Response once the request is queued
#[derive(Debug, Serialize)]
pub struct PlanAccepted {
    pub correlation_id: CorrelationId,
    pub message_id: Uuid,
    pub queue: String,
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
}

/// Queue a user request for the entry agent
///
/// With a `user_id` the request is tied to a plan (a fresh `plan_id` is
/// minted when absent): the user's message is logged on the plan and the
/// typing indicator is raised until the answer is stored.
///
/// POST /api/plans
pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanAccepted>), ApiError> {
    if req.user_request.trim().is_empty() {
        return Err(ApiError::bad_request("user_request cannot be empty"));
    }

    let plan = match req.user_id {
        Some(user_id) => {
            let plan_id = req.plan_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            Some(PlanKey::new(user_id, plan_id).map_err(ApiError::bad_request)?)
        }
        None => None,
    };

    let mut parameters = Map::new();
    parameters.insert("user_request".to_string(), json!(req.user_request));
    if let Some(key) = &plan {
        parameters.insert("user_id".to_string(), json!(key.user_id()));
        parameters.insert("plan_id".to_string(), json!(key.plan_id()));
        record_user_message(&state, key, &req.user_request).await?;
    }

    let correlation_id = CorrelationId::generate();
    let header = Header::new(correlation_id.clone(), MessageType::Task, INTAKE_SOURCE)
        .with_task_id(Uuid::new_v4())
        .with_target(state.entry_agent.as_str())
        .with_reply_to(results_channel(&state.results_consumer));
    let message = Message::new(header, Payload::Task(TaskPayload::new(PLAN_TASK, parameters)));

    let queue = QueueNames::for_agent(&state.entry_agent).tasks;
    state.broker.enqueue(&queue, &message).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PlanAccepted {
            correlation_id,
            message_id: message.header.message_id,
            queue,
            user_id: plan.as_ref().map(|key| key.user_id().to_string()),
            plan_id: plan.as_ref().map(|key| key.plan_id().to_string()),
        }),
    ))
}

async fn record_user_message(state: &AppState, key: &PlanKey, text: &str) -> Result<(), ApiError> {
    let entry = PlanMessage {
        sender: "user".to_string(),
        message: text.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        message_type: "text".to_string(),
        activity_type: None,
        activity_object: None,
    };
    state
        .plans
        .modify(
            key,
            Box::new(move |mut document| {
                document.messages.push(entry);
                document.typing = true;
                Ok(document)
            }),
        )
        .await?;
    Ok(())
}

/// Get a plan document
///
/// GET /api/plans/:user_id/:plan_id
pub async fn get_plan(
    State(state): State<AppState>,
    Path((user_id, plan_id)): Path<(String, String)>,
) -> Result<Json<PlanState>, ApiError> {
    let key = PlanKey::new(user_id, plan_id).map_err(ApiError::bad_request)?;
    let plan = state
        .plans
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Plan not found: {}", key)))?;

    Ok(Json(plan))
}
