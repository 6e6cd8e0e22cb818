// Response sink
//
// Drains the user-facing reply channel and writes each answer into the plan
// document: the agent's message is appended to the conversation log, any
// `state` the agent returned is merged in, and the typing indicator is
// cleared.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::errors::AgentResult;
use super::messages::Message;
use crate::domain::plan::{FieldPath, PlanKey, PlanMessage, PlanState};
use crate::domain::repositories::{StateError, StateRepository};
use crate::infrastructure::broker::{results_channel, MessageBroker};

const WRITE_ATTEMPTS: u32 = 3;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct ResponseSink {
    broker: MessageBroker,
    channel: String,
    state: Arc<dyn StateRepository>,
    poll_interval: Duration,
    initial_backoff: Duration,
}

/// What an agent answered, pulled out of a RESULT's data
#[derive(Debug, Clone, PartialEq)]
struct Answer {
    plan: PlanKey,
    text: String,
    state: Map<String, Value>,
}

impl ResponseSink {
    pub fn new(broker: MessageBroker, consumer: &str, state: Arc<dyn StateRepository>) -> Self {
        Self {
            broker,
            channel: results_channel(consumer),
            state,
            poll_interval: Duration::from_secs(2),
            initial_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// First delay between failed writes; doubled after every attempt
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(channel = %self.channel, "Response sink started");

        while !*shutdown.borrow() {
            match self.broker.pop_blocking(&self.channel, self.poll_interval).await {
                Ok(Some(message)) => {
                    if let Err(e) = self.store_response(&message).await {
                        tracing::error!(
                            correlation_id = %message.header.correlation_id,
                            error = %e,
                            "Failed to store response"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(channel = %self.channel, error = %e, "Response sink poll failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        tracing::info!(channel = %self.channel, "Response sink stopped");
    }

    /// Write one RESULT into its plan. Returns `false` when the message was
    /// skipped because it is not a result or names no plan.
    pub async fn store_response(&self, message: &Message) -> AgentResult<bool> {
        let Some(answer) = extract_answer(message) else {
            tracing::warn!(
                correlation_id = %message.header.correlation_id,
                source = %message.header.source_agent,
                "Response carries no user_id/plan_id; skipping storage"
            );
            return Ok(false);
        };

        if let Err(e) = self.with_retries(|| self.apply(&answer)).await {
            self.clear_typing(&answer.plan).await;
            return Err(e.into());
        }
        tracing::info!(
            plan = %answer.plan,
            correlation_id = %message.header.correlation_id,
            "Stored response"
        );
        Ok(true)
    }

    async fn apply(&self, answer: &Answer) -> Result<(), StateError> {
        let owned = answer.clone();
        self.state
            .modify(&answer.plan, Box::new(move |plan| Ok(merge_answer(plan, &owned))))
            .await?;
        Ok(())
    }

    /// Best effort: an answer that could not be stored must not leave the
    /// user watching a typing indicator forever.
    async fn clear_typing(&self, plan: &PlanKey) {
        let cleared = self
            .state
            .modify(
                plan,
                Box::new(|mut document| {
                    document.typing = false;
                    Ok(document)
                }),
            )
            .await;
        if let Err(e) = cleared {
            tracing::warn!(plan = %plan, error = %e, "Failed to clear typing indicator");
        }
    }

    async fn with_retries<F, Fut>(&self, mut write: F) -> Result<(), StateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StateError>>,
    {
        let mut delay = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Plan write failed; retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn extract_answer(message: &Message) -> Option<Answer> {
    let result = message.as_result()?;
    let data = result.data.as_object();
    let field = |key: &str| data.and_then(|d| d.get(key)).and_then(Value::as_str);

    let user_id = field("user_id")?;
    let plan_id = field("plan_id").or_else(|| field("itinerary_id"))?;
    let plan = PlanKey::new(user_id, plan_id).ok()?;

    let response = data.and_then(|d| d.get("response"));
    let text = match response {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(inner)) => match inner.get("response") {
            Some(Value::String(text)) => text.clone(),
            _ => Value::Object(inner.clone()).to_string(),
        },
        Some(Value::Null) | None => result.error_message.clone().unwrap_or_default(),
        Some(other) => other.to_string(),
    };

    let state = data
        .and_then(|d| d.get("state"))
        .or_else(|| response.and_then(|r| r.get("state")))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Some(Answer { plan, text, state })
}

fn merge_answer(mut plan: PlanState, answer: &Answer) -> PlanState {
    let itinerary_created = answer
        .state
        .get("itinerary_created")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    plan.messages.push(PlanMessage {
        sender: "agent".to_string(),
        message: answer.text.clone(),
        timestamp: Utc::now().to_rfc3339(),
        message_type: "text".to_string(),
        activity_type: itinerary_created.then(|| "itinerary".to_string()),
        activity_object: itinerary_created.then(|| answer.plan.plan_id().to_string()),
    });

    for (key, value) in &answer.state {
        let merged = key
            .parse::<FieldPath>()
            .and_then(|path| plan.with_update(&path, value.clone()));
        match merged {
            Ok(next) => plan = next,
            Err(e) => {
                tracing::warn!(plan = %answer.plan, field = %key, error = %e, "Ignoring state field")
            }
        }
    }

    plan.itinerary_created = false;
    plan.typing = false;
    plan
}
