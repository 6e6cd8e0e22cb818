// Task lifecycle events
//
// Published best-effort on `events:<agent>` so operators and other
// processes can follow a worker without touching its queues.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::messages::{CorrelationId, EventPayload, Message};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchEvent {
    TaskClaimed { message_id: Uuid, task_name: String },
    TaskCompleted { message_id: Uuid, task_name: String },
    TaskRetried { message_id: Uuid, retry_count: u32, error: String },
    TaskDeadLettered { message_id: Uuid, retry_count: u32, error: String },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::TaskClaimed { .. } => "task_claimed",
            DispatchEvent::TaskCompleted { .. } => "task_completed",
            DispatchEvent::TaskRetried { .. } => "task_retried",
            DispatchEvent::TaskDeadLettered { .. } => "task_dead_lettered",
        }
    }

    fn data(&self) -> Map<String, Value> {
        let value = match self {
            DispatchEvent::TaskClaimed { message_id, task_name }
            | DispatchEvent::TaskCompleted { message_id, task_name } => {
                json!({ "message_id": message_id, "task_name": task_name })
            }
            DispatchEvent::TaskRetried { message_id, retry_count, error }
            | DispatchEvent::TaskDeadLettered { message_id, retry_count, error } => {
                json!({ "message_id": message_id, "retry_count": retry_count, "error": error })
            }
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Wrap as an EVENT message within the task's correlation
    pub fn to_message(&self, correlation_id: CorrelationId, agent: &str) -> Message {
        Message::event(
            correlation_id,
            agent,
            EventPayload {
                event_name: self.name().to_string(),
                data: self.data(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::messages::{MessageType, Payload};

    #[test]
    fn test_event_message_shape() {
        let id = Uuid::new_v4();
        let event = DispatchEvent::TaskRetried {
            message_id: id,
            retry_count: 2,
            error: "timeout".to_string(),
        };

        let message = event.to_message(CorrelationId::from("corr-1"), "flight_agent");

        assert_eq!(message.header.message_type, MessageType::Event);
        assert_eq!(message.header.correlation_id.as_str(), "corr-1");
        match message.payload {
            Payload::Event(payload) => {
                assert_eq!(payload.event_name, "task_retried");
                assert_eq!(payload.data["retry_count"], json!(2));
                assert_eq!(payload.data["message_id"], json!(id));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
