// Repository interfaces (ports)
// Adapters live in crate::infrastructure::repositories

pub mod session_repository;
pub mod state_repository;

pub use session_repository::{SessionError, SessionRepository};
pub use state_repository::{PlanEdit, StateError, StateRepository};
