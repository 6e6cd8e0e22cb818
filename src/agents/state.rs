// Task lifecycle state machine
//
// PENDING (main queue) -> CLAIMED (processing queue) -> ACKED | RETRYING | DEAD.
// RETRYING leads back to PENDING.

use serde::{Deserialize, Serialize};

use super::errors::{AgentError, AgentResult};
use super::types::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Claimed,
    Acked,
    Retrying,
    Dead,
}

impl TaskState {
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Claimed)
                | (TaskState::Claimed, TaskState::Acked)
                | (TaskState::Claimed, TaskState::Retrying)
                | (TaskState::Claimed, TaskState::Dead)
                | (TaskState::Retrying, TaskState::Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Acked | TaskState::Dead)
    }

    /// Checked transition
    pub fn transition(self, next: TaskState) -> AgentResult<TaskState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AgentError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Where a claimed task goes after its handler failed, given its retry
    /// count after the increment
    pub fn after_failure(retry_count: u32, policy: &RetryPolicy) -> TaskState {
        if policy.should_retry(retry_count) {
            TaskState::Retrying
        } else {
            TaskState::Dead
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Claimed => write!(f, "CLAIMED"),
            TaskState::Acked => write!(f, "ACKED"),
            TaskState::Retrying => write!(f, "RETRYING"),
            TaskState::Dead => write!(f, "DEAD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let state = TaskState::Pending;
        let state = state.transition(TaskState::Claimed).unwrap();
        let state = state.transition(TaskState::Acked).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_retry_loops_back_to_pending() {
        let state = TaskState::Claimed.transition(TaskState::Retrying).unwrap();
        assert_eq!(state.transition(TaskState::Pending).unwrap(), TaskState::Pending);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [TaskState::Pending, TaskState::Claimed, TaskState::Retrying] {
            assert!(!TaskState::Acked.can_transition_to(next));
            assert!(!TaskState::Dead.can_transition_to(next));
        }
        let err = TaskState::Dead.transition(TaskState::Pending).unwrap_err();
        assert!(err.to_string().contains("DEAD"));
    }

    #[test]
    fn test_pending_cannot_skip_claim() {
        assert!(TaskState::Pending.transition(TaskState::Acked).is_err());
    }

    #[test]
    fn test_failure_routing_uses_incremented_count() {
        let policy = RetryPolicy::default();
        // a first failure carries retry_count 0 and becomes attempt 1
        assert_eq!(TaskState::after_failure(1, &policy), TaskState::Retrying);
        assert_eq!(TaskState::after_failure(2, &policy), TaskState::Retrying);
        assert_eq!(TaskState::after_failure(3, &policy), TaskState::Dead);
    }
}
