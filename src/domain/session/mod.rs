// Session domain module
// Conversation history and scratch state, with a binary-safe value type

#![allow(clippy::module_inception)]

pub mod session;
pub mod value;

pub use session::{Session, SessionEvent, SessionKey};
pub use value::SessionValue;
