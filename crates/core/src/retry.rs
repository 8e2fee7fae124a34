// SPDX-License-Identifier: MIT

//! Retry policy for classified-retryable step failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-step retry configuration. After `max_retries` exhausted, a retryable
/// classification becomes permanent (see the Error Classifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub backoff: Duration,
    /// Error substrings this policy will retry; empty = retry any classified-retryable error.
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff: Duration::from_millis(100), retryable_errors: Vec::new() }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given (zero-indexed) attempt number.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    pub fn matches(&self, error_message: &str) -> bool {
        self.retryable_errors.is_empty()
            || self.retryable_errors.iter().any(|pat| error_message.contains(pat.as_str()))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        duration.as_millis().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_after_max_retries() {
        let policy = RetryPolicy { max_retries: 2, ..RetryPolicy::default() };
        assert!(!policy.exhausted(0));
        assert!(!policy.exhausted(1));
        assert!(policy.exhausted(2));
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy { backoff: Duration::from_millis(25), ..RetryPolicy::default() };
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(25));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(50));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(100));
    }

    #[test]
    fn matches_filters_by_substring() {
        let policy = RetryPolicy { retryable_errors: vec!["timeout".into()], ..RetryPolicy::default() };
        assert!(policy.matches("request timeout after 5s"));
        assert!(!policy.matches("permission denied"));
    }
}
