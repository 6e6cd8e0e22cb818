// Inter-agent message envelope
//
// Every piece of work, answer, question and notification that travels
// through the broker is a `Message`: a routing `Header` plus a payload whose
// shape is selected by `header.message_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifier shared by every message spawned from one user request.
///
/// A correlation id cannot be mutated after creation;
/// derived messages clone it from their parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh correlation id for a new end-to-end request
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of message, which also selects the payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Task,
    Result,
    ClarificationRequest,
    Error,
    Event,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Task => write!(f, "TASK"),
            MessageType::Result => write!(f, "RESULT"),
            MessageType::ClarificationRequest => write!(f, "CLARIFICATION_REQUEST"),
            MessageType::Error => write!(f, "ERROR"),
            MessageType::Event => write!(f, "EVENT"),
        }
    }
}

/// Routing information carried by every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub message_id: Uuid,
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    pub source_agent: String,
    #[serde(default)]
    pub target_agent: Option<String>,
    #[serde(default)]
    pub reply_to_channel: Option<String>,
}

impl Header {
    /// Create a header with a freshly generated message id and timestamp
    pub fn new(
        correlation_id: CorrelationId,
        message_type: MessageType,
        source_agent: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id,
            task_id: None,
            timestamp: Utc::now(),
            message_type,
            source_agent: source_agent.into(),
            target_agent: None,
            reply_to_channel: None,
        }
    }

    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_target(mut self, target_agent: impl Into<String>) -> Self {
        self.target_agent = Some(target_agent.into());
        self
    }

    pub fn with_reply_to(mut self, channel: impl Into<String>) -> Self {
        self.reply_to_channel = Some(channel.into());
        self
    }
}

/// Work request handed to a specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
}

impl TaskPayload {
    pub fn new(task_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            task_name: task_name.into(),
            parameters,
            retry_count: 0,
        }
    }

    /// Look up a string parameter
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// Answer to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub status: ResultStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ResultPayload {
    pub fn success(data: Value) -> Self {
        Self {
            status: ResultStatus::Success,
            data,
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failure,
            data: Value::Null,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationPayload {
    pub question: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_code: String,
    pub error_message: String,
}

/// Payload variants. On the wire the payload is the bare object; the variant
/// is recovered from `header.message_type` when decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Task(TaskPayload),
    Result(ResultPayload),
    Clarification(ClarificationPayload),
    Event(EventPayload),
    Error(ErrorPayload),
}

impl Payload {
    /// The message type this payload must travel under
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Task(_) => MessageType::Task,
            Payload::Result(_) => MessageType::Result,
            Payload::Clarification(_) => MessageType::ClarificationRequest,
            Payload::Event(_) => MessageType::Event,
            Payload::Error(_) => MessageType::Error,
        }
    }

    fn decode(message_type: MessageType, raw: Value) -> Result<Self, serde_json::Error> {
        Ok(match message_type {
            MessageType::Task => Payload::Task(serde_json::from_value(raw)?),
            MessageType::Result => Payload::Result(serde_json::from_value(raw)?),
            MessageType::ClarificationRequest => {
                Payload::Clarification(serde_json::from_value(raw)?)
            }
            MessageType::Event => Payload::Event(serde_json::from_value(raw)?),
            MessageType::Error => Payload::Error(serde_json::from_value(raw)?),
        })
    }
}

#[derive(Deserialize)]
struct RawMessage {
    header: Header,
    payload: Value,
}

/// A complete message: immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

impl TryFrom<RawMessage> for Message {
    type Error = serde_json::Error;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let payload = Payload::decode(raw.header.message_type, raw.payload)?;
        Ok(Self {
            header: raw.header,
            payload,
        })
    }
}

impl Message {
    /// Build a message, forcing the header's type to agree with the payload
    pub fn new(mut header: Header, payload: Payload) -> Self {
        header.message_type = payload.message_type();
        Self { header, payload }
    }

    /// New TASK message starting (or continuing) the given correlation
    pub fn task(
        correlation_id: CorrelationId,
        source_agent: impl Into<String>,
        target_agent: impl Into<String>,
        payload: TaskPayload,
    ) -> Self {
        let header = Header::new(correlation_id, MessageType::Task, source_agent)
            .with_task_id(Uuid::new_v4())
            .with_target(target_agent);
        Self::new(header, Payload::Task(payload))
    }

    /// Derive a reply to this message. The correlation id and task id are
    /// carried over and the reply is addressed back to the original sender.
    pub fn reply(&self, source_agent: impl Into<String>, payload: Payload) -> Self {
        let mut header = Header::new(
            self.header.correlation_id.clone(),
            payload.message_type(),
            source_agent,
        )
        .with_target(self.header.source_agent.clone());
        header.task_id = self.header.task_id;
        Self::new(header, payload)
    }

    /// Derive an EVENT message within the same correlation
    pub fn event(
        correlation_id: CorrelationId,
        source_agent: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        let header = Header::new(correlation_id, MessageType::Event, source_agent);
        Self::new(header, Payload::Event(payload))
    }

    pub fn as_task(&self) -> Option<&TaskPayload> {
        match &self.payload {
            Payload::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&ResultPayload> {
        match &self.payload {
            Payload::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Copy of this task with its retry counter bumped. The message id is
    /// kept: a retried task is the same task instance.
    pub fn next_attempt(&self) -> Option<Message> {
        let task = self.as_task()?;
        let mut next = task.clone();
        next.retry_count = task.retry_count.saturating_add(1);
        Some(Message {
            header: self.header.clone(),
            payload: Payload::Task(next),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> Message {
        let mut params = Map::new();
        params.insert("task_description".to_string(), json!("find flights to Goa"));
        Message::task(
            CorrelationId::from("corr-1"),
            "main_agent",
            "flight_agent",
            TaskPayload::new("execute_task", params),
        )
    }

    #[test]
    fn message_type_uses_screaming_case_on_the_wire() {
        let raw = serde_json::to_value(MessageType::ClarificationRequest).unwrap();
        assert_eq!(raw, json!("CLARIFICATION_REQUEST"));
    }

    #[test]
    fn payload_is_serialized_without_a_tag() {
        let value = serde_json::to_value(sample_task()).unwrap();
        assert_eq!(value["header"]["message_type"], "TASK");
        assert_eq!(value["payload"]["task_name"], "execute_task");
        assert_eq!(value["payload"]["retry_count"], 0);
    }

    #[test]
    fn payload_variant_follows_message_type() {
        // An EVENT and a RESULT both carry `data`; the header decides.
        let raw = json!({
            "header": {
                "message_id": Uuid::new_v4(),
                "correlation_id": "c",
                "timestamp": Utc::now(),
                "message_type": "EVENT",
                "source_agent": "flight_agent"
            },
            "payload": {"event_name": "task_claimed", "data": {"status": "x"}}
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert!(matches!(message.payload, Payload::Event(_)));
        assert_eq!(message.header.task_id, None);
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let raw = json!({
            "header": {
                "message_id": Uuid::new_v4(),
                "correlation_id": "c",
                "timestamp": Utc::now(),
                "message_type": "TASK",
                "source_agent": "main_agent"
            },
            "payload": {"status": "SUCCESS", "data": null}
        });
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }

    #[test]
    fn reply_propagates_correlation_and_task() {
        let task = sample_task();
        let reply = task.reply(
            "flight_agent",
            Payload::Result(ResultPayload::success(json!({"response": "ok"}))),
        );

        assert_eq!(reply.header.correlation_id, task.header.correlation_id);
        assert_eq!(reply.header.task_id, task.header.task_id);
        assert_eq!(reply.header.message_type, MessageType::Result);
        assert_eq!(reply.header.target_agent.as_deref(), Some("main_agent"));
        assert_ne!(reply.header.message_id, task.header.message_id);
    }

    #[test]
    fn next_attempt_increments_and_keeps_identity() {
        let task = sample_task();
        let retried = task.next_attempt().unwrap().next_attempt().unwrap();

        assert_eq!(retried.as_task().unwrap().retry_count, 2);
        assert_eq!(retried.header.message_id, task.header.message_id);
    }

    #[test]
    fn new_forces_header_type_from_payload() {
        let header = Header::new(CorrelationId::generate(), MessageType::Task, "x");
        let message = Message::new(
            header,
            Payload::Error(ErrorPayload {
                error_code: "E1".to_string(),
                error_message: "boom".to_string(),
            }),
        );
        assert_eq!(message.header.message_type, MessageType::Error);
    }

    #[test]
    fn json_round_trip_preserves_message() {
        let task = sample_task();
        let decoded = Message::from_json(&task.to_json().unwrap()).unwrap();
        assert_eq!(decoded, task);
    }
}
