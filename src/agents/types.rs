use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::messages::CorrelationId;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How many failed attempts a task may accumulate before it is dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// `retry_count` is the count after this failure was recorded
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Identifiers of one delegated sub-task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationReceipt {
    pub correlation_id: CorrelationId,
    pub task_id: Uuid,
    pub message_id: Uuid,
    pub target: String,
    pub reply_channel: String,
}

/// Outcome of a fan-in: what arrived, and who never answered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub results: BTreeMap<String, Value>,
    pub missing: BTreeSet<String>,
}

impl CollectionReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_allows_three_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries_dead_letters_first_failure() {
        assert!(!RetryPolicy::new(0).should_retry(1));
    }

    #[test]
    fn test_report_completeness() {
        let mut report = CollectionReport::default();
        assert!(report.is_complete());
        report.missing.insert("hotel_agent".to_string());
        assert!(!report.is_complete());
    }
}
