use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::errors::{AgentError, AgentResult};
use super::events::DispatchEvent;
use super::messages::{Message, Payload, ResultPayload, TaskPayload};
use super::prompts::{result_data, task_input};
use super::state::TaskState;
use super::types::RetryPolicy;
use crate::config::Settings;
use crate::domain::repositories::SessionRepository;
use crate::domain::session::{SessionEvent, SessionKey};
use crate::infrastructure::broker::{events_channel, ClaimedTask, MessageBroker, QueueNames};
use crate::infrastructure::repositories::StoreSessionRepository;

const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// The thing a worker does with a task: request text in, response text out
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, request: &str) -> Result<String, CapabilityError>;
}

/// Worker Agent that owns `tasks:<name>` and runs each claimed task through
/// its capability
pub struct WorkerAgent {
    name: String,
    queues: QueueNames,
    broker: MessageBroker,
    capability: Arc<dyn Capability>,
    policy: RetryPolicy,
    claim_timeout: Duration,
    sessions: Option<Arc<dyn SessionRepository>>,
}

impl WorkerAgent {
    pub fn new(
        name: impl Into<String>,
        broker: MessageBroker,
        capability: Arc<dyn Capability>,
    ) -> Self {
        let name = name.into();
        Self {
            queues: QueueNames::for_agent(&name),
            name,
            broker,
            capability,
            policy: RetryPolicy::default(),
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            sessions: None,
        }
    }

    /// Worker configured from `settings`: retry budget, claim timeout and
    /// session recording in the broker's store
    pub fn from_settings(
        name: impl Into<String>,
        broker: MessageBroker,
        capability: Arc<dyn Capability>,
        settings: &Settings,
    ) -> Self {
        let sessions = Arc::new(StoreSessionRepository::new(broker.store().clone()));
        Self::new(name, broker, capability)
            .with_retry_policy(settings.retry_policy())
            .with_claim_timeout(settings.claim_timeout)
            .with_sessions(sessions)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long one claim waits for work. Zero waits indefinitely, which
    /// also means `run` only notices shutdown once a task arrives.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Record each turn (request and reply) in the session store
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionRepository>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queues(&self) -> &QueueNames {
        &self.queues
    }

    /// Claim loop. Stops when `shutdown` turns true; the flag is checked
    /// between claims so an in-flight task always finishes.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(agent = %self.name, queue = %self.queues.tasks, "Waiting for tasks");

        while !*shutdown.borrow() {
            if let Err(e) = self.process_next().await {
                tracing::error!(agent = %self.name, error = %e, "Worker loop error");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }

        tracing::info!(agent = %self.name, "Worker stopped");
    }

    /// Claim and fully process at most one task. Returns the state the task
    /// ended up in, or `None` when the claim timed out.
    pub async fn process_next(&self) -> AgentResult<Option<TaskState>> {
        let Some(claimed) = self
            .broker
            .claim(&self.queues.tasks, &self.queues.processing, self.claim_timeout)
            .await?
        else {
            return Ok(None);
        };
        let state = TaskState::Pending.transition(TaskState::Claimed)?;

        let Some(task) = claimed.message.as_task().cloned() else {
            tracing::error!(
                agent = %self.name,
                message_id = %claimed.message_id(),
                message_type = %claimed.message.header.message_type,
                "Non-task message on task queue"
            );
            self.broker
                .deadletter(&self.queues.processing, &self.queues.dlq, &claimed, &claimed.message)
                .await?;
            return Ok(Some(state.transition(TaskState::Dead)?));
        };

        tracing::info!(
            agent = %self.name,
            task_name = %task.task_name,
            correlation_id = %claimed.message.header.correlation_id,
            retry_count = task.retry_count,
            "Received task"
        );
        self.emit(
            &claimed.message,
            DispatchEvent::TaskClaimed {
                message_id: claimed.message_id(),
                task_name: task.task_name.clone(),
            },
        )
        .await;

        match self.handle(&claimed.message, &task).await {
            Ok(()) => {
                self.broker.ack(&self.queues.processing, &claimed).await?;
                self.emit(
                    &claimed.message,
                    DispatchEvent::TaskCompleted {
                        message_id: claimed.message_id(),
                        task_name: task.task_name.clone(),
                    },
                )
                .await;
                Ok(Some(state.transition(TaskState::Acked)?))
            }
            Err(e) => {
                tracing::error!(
                    agent = %self.name,
                    task_name = %task.task_name,
                    error = %e,
                    "Task failed"
                );
                self.fail(&claimed, state, &e).await.map(Some)
            }
        }
    }

    async fn handle(&self, message: &Message, task: &TaskPayload) -> AgentResult<()> {
        let request = task_input(task);
        let response = self
            .capability
            .invoke(&request)
            .await
            .map_err(|e| AgentError::Capability(e.to_string()))?;

        self.record_turn(message, task, &request, &response).await;

        if let Some(channel) = &message.header.reply_to_channel {
            let reply = message.reply(
                self.name.as_str(),
                Payload::Result(ResultPayload::success(result_data(task, &response))),
            );
            self.broker.enqueue(channel, &reply).await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        claimed: &ClaimedTask,
        state: TaskState,
        error: &AgentError,
    ) -> AgentResult<TaskState> {
        let next = claimed
            .message
            .next_attempt()
            .ok_or(AgentError::NotATask(claimed.message_id()))?;
        let retry_count = next.as_task().map(|t| t.retry_count).unwrap_or_default();

        match TaskState::after_failure(retry_count, &self.policy) {
            TaskState::Retrying => {
                self.broker
                    .retry(&self.queues.processing, &self.queues.tasks, claimed, &next)
                    .await?;
                self.emit(
                    &claimed.message,
                    DispatchEvent::TaskRetried {
                        message_id: claimed.message_id(),
                        retry_count,
                        error: error.to_string(),
                    },
                )
                .await;
                state.transition(TaskState::Retrying)
            }
            _ => {
                self.broker
                    .deadletter(&self.queues.processing, &self.queues.dlq, claimed, &next)
                    .await?;
                if let Some(channel) = &claimed.message.header.reply_to_channel {
                    let reason = format!(
                        "{} could not complete the task after {} attempts: {}",
                        self.name, retry_count, error
                    );
                    let reply = claimed
                        .message
                        .reply(self.name.as_str(), Payload::Result(ResultPayload::failure(reason)));
                    self.broker.enqueue(channel, &reply).await?;
                }
                self.emit(
                    &claimed.message,
                    DispatchEvent::TaskDeadLettered {
                        message_id: claimed.message_id(),
                        retry_count,
                        error: error.to_string(),
                    },
                )
                .await;
                state.transition(TaskState::Dead)
            }
        }
    }

    async fn record_turn(&self, message: &Message, task: &TaskPayload, request: &str, response: &str) {
        let Some(sessions) = &self.sessions else {
            return;
        };
        let key = match SessionKey::new(
            format!("{}_app", self.name),
            task.parameter_str("user_id").unwrap_or("user"),
            message.header.correlation_id.as_str(),
        ) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(agent = %self.name, error = %e, "Skipping session recording");
                return;
            }
        };

        let result: AgentResult<()> = async {
            let mut session = match sessions.get(&key).await? {
                Some(session) => session,
                None => sessions.create(key, BTreeMap::new()).await?,
            };
            sessions
                .append_event(&mut session, SessionEvent::new("user", request))
                .await?;
            sessions
                .append_event(&mut session, SessionEvent::new(self.name.as_str(), response))
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(agent = %self.name, error = %e, "Failed to record session turn");
        }
    }

    async fn emit(&self, origin: &Message, event: DispatchEvent) {
        let message = event.to_message(origin.header.correlation_id.clone(), &self.name);
        if let Err(e) = self.broker.publish(&events_channel(&self.name), &message).await {
            tracing::warn!(agent = %self.name, event = event.name(), error = %e, "Failed to publish event");
        }
    }
}
