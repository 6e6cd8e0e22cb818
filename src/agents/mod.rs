// Agent system modules
//
// This module contains the task-dispatch layer: the message envelope,
// the worker claim loop with its retry/dead-letter lifecycle, the
// fan-out/fan-in coordinator and the sink that stores user-facing replies.

pub mod coordinator;
pub mod errors;
pub mod events;
pub mod messages;
pub mod prompts;
pub mod response_sink;
pub mod state;
pub mod types;
pub mod worker;

// Re-export main types
pub use coordinator::Coordinator;
pub use errors::{AgentError, AgentResult};
pub use messages::{CorrelationId, Message};
pub use response_sink::ResponseSink;
pub use state::TaskState;
pub use types::{CollectionReport, DelegationReceipt, RetryPolicy};
pub use worker::{Capability, CapabilityError, WorkerAgent};
