use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::errors::AgentResult;
use super::messages::{CorrelationId, Header, Message, MessageType, Payload, ResultStatus, TaskPayload};
use super::types::{CollectionReport, DelegationReceipt};
use crate::domain::plan::{FieldPath, PlanKey};
use crate::domain::repositories::StateRepository;
use crate::infrastructure::broker::{results_channel, MessageBroker, QueueNames};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RESULTS_FIELD: &str = "specialist_results";

/// Fan-out/fan-in coordinator for one orchestrating agent working on one plan
///
/// Every delegation replies on its own channel,
/// `results:<agent>:<correlation_id>`, so concurrent fan-outs never see each
/// other's results. Collected answers are written to the plan under
/// `specialist_results.<source>` as they arrive.
///
/// `collect` suspends the caller until the deadline. A worker that calls it
/// from its claim loop stops claiming for that long; use
/// [`Coordinator::spawn_collect`] to keep claiming meanwhile.
#[derive(Clone)]
pub struct Coordinator {
    broker: MessageBroker,
    agent_name: String,
    state: Arc<dyn StateRepository>,
    plan: PlanKey,
    poll_interval: Duration,
}

impl Coordinator {
    pub fn new(
        broker: MessageBroker,
        agent_name: impl Into<String>,
        state: Arc<dyn StateRepository>,
        plan: PlanKey,
    ) -> Self {
        Self {
            broker,
            agent_name: agent_name.into(),
            state,
            plan,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Upper bound of a single wait on the reply channel. Collection
    /// overshoots its deadline by at most this much.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn reply_channel(&self, correlation_id: &CorrelationId) -> String {
        results_channel(&format!("{}:{}", self.agent_name, correlation_id))
    }

    /// Enqueue a TASK for `target` that replies on this coordinator's
    /// channel for the correlation (a fresh one when `None`)
    pub async fn delegate(
        &self,
        target: &str,
        task_name: &str,
        mut parameters: Map<String, Value>,
        correlation_id: Option<CorrelationId>,
    ) -> AgentResult<DelegationReceipt> {
        let correlation_id = correlation_id.unwrap_or_else(CorrelationId::generate);
        let reply_channel = self.reply_channel(&correlation_id);

        parameters
            .entry("user_id")
            .or_insert_with(|| json!(self.plan.user_id()));
        parameters
            .entry("plan_id")
            .or_insert_with(|| json!(self.plan.plan_id()));
        parameters
            .entry("session_id")
            .or_insert_with(|| json!(correlation_id.as_str()));

        let task_id = Uuid::new_v4();
        let header = Header::new(correlation_id.clone(), MessageType::Task, self.agent_name.as_str())
            .with_task_id(task_id)
            .with_target(target)
            .with_reply_to(reply_channel.clone());
        let message = Message::new(header, Payload::Task(TaskPayload::new(task_name, parameters)));

        self.broker
            .enqueue(&QueueNames::for_agent(target).tasks, &message)
            .await?;

        tracing::info!(
            agent = %self.agent_name,
            target,
            task_name,
            correlation_id = %correlation_id,
            "Delegated task"
        );

        Ok(DelegationReceipt {
            correlation_id,
            task_id,
            message_id: message.header.message_id,
            target: target.to_string(),
            reply_channel,
        })
    }

    /// Wait for one RESULT from each of `expected` on the correlation's
    /// reply channel, for at most `timeout` (plus one poll interval).
    ///
    /// Sources that never answered are reported in `missing`; running out
    /// of time is not an error.
    pub async fn collect(
        &self,
        correlation_id: &CorrelationId,
        expected: &BTreeSet<String>,
        timeout: Duration,
    ) -> AgentResult<CollectionReport> {
        let channel = self.reply_channel(correlation_id);
        let deadline = Instant::now() + timeout;
        let mut report = CollectionReport::default();

        while report.results.len() < expected.len() {
            let wait = deadline
                .saturating_duration_since(Instant::now())
                .min(self.poll_interval);
            if wait.is_zero() {
                break;
            }
            if let Some(message) = self.broker.pop_blocking(&channel, wait).await? {
                self.accept(message, correlation_id, expected, &mut report).await;
            }
        }

        report.missing = expected
            .iter()
            .filter(|source| !report.results.contains_key(*source))
            .cloned()
            .collect();

        if report.is_complete() {
            tracing::info!(
                agent = %self.agent_name,
                correlation_id = %correlation_id,
                collected = report.results.len(),
                "Collected all results"
            );
        } else {
            tracing::warn!(
                agent = %self.agent_name,
                correlation_id = %correlation_id,
                collected = report.results.len(),
                missing = ?report.missing,
                "Collection timed out"
            );
        }
        Ok(report)
    }

    /// [`Coordinator::collect`] on its own task
    pub fn spawn_collect(
        &self,
        correlation_id: CorrelationId,
        expected: BTreeSet<String>,
        timeout: Duration,
    ) -> JoinHandle<AgentResult<CollectionReport>> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.collect(&correlation_id, &expected, timeout).await })
    }

    async fn accept(
        &self,
        message: Message,
        correlation_id: &CorrelationId,
        expected: &BTreeSet<String>,
        report: &mut CollectionReport,
    ) {
        let source = message.header.source_agent.clone();

        let Some(result) = message.as_result() else {
            tracing::warn!(
                agent = %self.agent_name,
                source = %source,
                message_type = %message.header.message_type,
                "Discarding non-result message on reply channel"
            );
            return;
        };
        if message.header.correlation_id != *correlation_id {
            tracing::warn!(
                agent = %self.agent_name,
                source = %source,
                correlation_id = %message.header.correlation_id,
                "Discarding result from another correlation"
            );
            return;
        }
        if !expected.contains(&source) {
            tracing::warn!(agent = %self.agent_name, source = %source, "Discarding result from unexpected source");
            return;
        }
        if report.results.contains_key(&source) {
            tracing::warn!(agent = %self.agent_name, source = %source, "Discarding duplicate result");
            return;
        }

        let data = match result.status {
            ResultStatus::Success => result.data.clone(),
            ResultStatus::Failure => json!({
                "status": ResultStatus::Failure,
                "error_message": result.error_message,
            }),
        };

        self.persist(&source, data.clone()).await;
        tracing::info!(agent = %self.agent_name, source = %source, "Received result");
        report.results.insert(source, data);
    }

    async fn persist(&self, source: &str, data: Value) {
        let outcome = match FieldPath::field(RESULTS_FIELD, source) {
            Ok(path) => self
                .state
                .update_field(&self.plan, &path, data)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = outcome {
            tracing::warn!(
                agent = %self.agent_name,
                plan = %self.plan,
                source,
                error = %e,
                "Failed to persist result"
            );
        }
    }
}
