//! Job definition and retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job identifier (`bamz_worker.jobs.id`).
pub type JobId = i64;

/// Job data payload.
pub type JobData = serde_json::Value;

/// Attempts before a job is left in the table for inspection.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

/// Longest retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// A job to enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub task: String,
    pub payload: JobData,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(task: impl Into<String>, payload: JobData) -> Self {
        Self {
            task: task.into(),
            payload,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// A job claimed by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task: String,
    pub payload: JobData,
    /// Attempts so far, including the current one
    pub attempts: u32,
    pub max_attempts: u32,
}

impl Job {
    /// Delay before the next attempt: `2^attempts` seconds, capped at an hour.
    pub fn backoff_delay(&self) -> Duration {
        let secs = 2u64.saturating_pow(self.attempts.min(32));
        Duration::from_secs(secs).min(MAX_BACKOFF)
    }

    /// Whether another attempt will be made after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(attempts: u32) -> Job {
        Job {
            id: 1,
            task: "add-plugin".to_string(),
            payload: json!({}),
            attempts,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(job(1).backoff_delay(), Duration::from_secs(2));
        assert_eq!(job(2).backoff_delay(), Duration::from_secs(4));
        assert_eq!(job(5).backoff_delay(), Duration::from_secs(32));
        assert_eq!(job(12).backoff_delay(), MAX_BACKOFF);
        assert_eq!(job(25).backoff_delay(), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_until_max_attempts() {
        assert!(job(1).can_retry());
        assert!(!job(DEFAULT_MAX_ATTEMPTS).can_retry());
    }

    #[test]
    fn test_new_job_defaults() {
        let new = NewJob::new("drop-database", json!({"database": "shop1"}));
        assert_eq!(new.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(new.with_max_attempts(0).max_attempts, 1);
    }
}
