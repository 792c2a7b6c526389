//! Retry policy for watch and fetch steps.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ClientError;

/// Status codes retried by default: no status (network failure) and the
/// gateway/availability family.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 4] = [0, 502, 503, 504];

/// Retry policy configuration.
///
/// Delays are fixed: every retry waits `retry_interval`.
///
/// Serialized as `{"retries", "retryInterval" (ms), "retryStatusCodes"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (0 = no retries).
    pub retries: u32,
    /// Delay before each retry.
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    /// Status codes worth retrying. Timeouts are retried regardless.
    pub retry_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_interval: Duration::from_millis(1000),
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with the default status codes and the given budget.
    pub fn fixed(retries: u32, retry_interval: Duration) -> Self {
        Self {
            retries,
            retry_interval,
            ..Default::default()
        }
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = codes.into_iter().collect();
        self
    }

    /// Total attempts a single step may make (first try plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether `error` may go away if the same call is sent again.
    ///
    /// A timeout carries no error payload and is always recoverable. Anything
    /// with a status is recoverable iff the status is in the configured set.
    pub fn recoverable(&self, error: &ClientError) -> bool {
        match error {
            ClientError::Timeout => true,
            ClientError::Server { status, .. } => self.retry_status_codes.contains(status),
            ClientError::Configuration(_) | ClientError::Decode(_) | ClientError::Dropped => false,
        }
    }

    /// Check if more retries are allowed after `attempts` retries.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.retries
    }
}

mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Outcome of feeding a failure into [`RetryState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the same call again after the delay.
    RetryAfter(Duration),
    /// The failure is final.
    GiveUp,
}

/// Retry bookkeeping owned by exactly one job run.
///
/// The attempt count is reset whenever the run makes progress (a successful
/// watch), never on elapsed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Record a failed attempt and decide whether to try again.
    pub fn record_failure(&mut self, error: &ClientError) -> RetryDecision {
        if self.policy.should_retry(self.attempts) && self.policy.recoverable(error) {
            self.attempts += 1;
            RetryDecision::RetryAfter(self.policy.retry_interval)
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_match_service_conventions() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.retry_interval, Duration::from_millis(1000));
        assert_eq!(
            policy.retry_status_codes,
            BTreeSet::from([0, 502, 503, 504])
        );
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn classifies_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.recoverable(&ClientError::Timeout));
        assert!(policy.recoverable(&ClientError::network()));
        assert!(policy.recoverable(&ClientError::server(503, None)));
        assert!(!policy.recoverable(&ClientError::server(404, None)));
        assert!(!policy.recoverable(&ClientError::server(500, None)));
        assert!(!policy.recoverable(&ClientError::configuration("no headers")));
        assert!(!policy.recoverable(&ClientError::decode("missing id")));
        assert!(!policy.recoverable(&ClientError::Dropped));
    }

    #[test]
    fn timeout_is_recoverable_with_empty_status_set() {
        let policy = RetryPolicy::default().with_status_codes([]);
        assert!(policy.recoverable(&ClientError::Timeout));
        assert!(!policy.recoverable(&ClientError::network()));
    }

    #[test]
    fn should_retry_respects_budget() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn state_resets_on_progress() {
        let mut state = RetryState::new(RetryPolicy::fixed(1, Duration::from_millis(5)));

        assert_eq!(
            state.record_failure(&ClientError::Timeout),
            RetryDecision::RetryAfter(Duration::from_millis(5))
        );
        assert_eq!(state.record_failure(&ClientError::Timeout), RetryDecision::GiveUp);

        state.reset();
        assert_eq!(state.attempts(), 0);
        assert!(matches!(
            state.record_failure(&ClientError::Timeout),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn unrecoverable_error_does_not_consume_budget() {
        let mut state = RetryState::new(RetryPolicy::default());
        assert_eq!(
            state.record_failure(&ClientError::server(404, None)),
            RetryDecision::GiveUp
        );
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"retries": 5}"#).unwrap();
        assert_eq!(policy.retries, 5);
        assert_eq!(policy.retry_interval, Duration::from_millis(1000));
        assert!(policy.retry_status_codes.contains(&503));
    }

    #[test]
    fn policy_uses_camel_case_and_millis() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"retries": 2, "retryInterval": 250, "retryStatusCodes": [503]}"#,
        )
        .unwrap();
        assert_eq!(policy.retries, 2);
        assert_eq!(policy.retry_interval, Duration::from_millis(250));
        assert_eq!(policy.retry_status_codes, BTreeSet::from([503]));

        assert_eq!(
            serde_json::to_value(&policy).unwrap(),
            serde_json::json!({"retries": 2, "retryInterval": 250, "retryStatusCodes": [503]})
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: timeouts are recoverable whatever status set is configured.
        #[test]
        fn timeout_always_recoverable(codes in prop::collection::btree_set(0u16..600, 0..8)) {
            let policy = RetryPolicy::default().with_status_codes(codes);
            prop_assert!(policy.recoverable(&ClientError::Timeout));
        }

        /// Property: a server error is recoverable iff its status is configured.
        #[test]
        fn server_error_recoverable_iff_listed(
            codes in prop::collection::btree_set(0u16..600, 0..8),
            status in 0u16..600,
        ) {
            let policy = RetryPolicy::default().with_status_codes(codes.clone());
            prop_assert_eq!(
                policy.recoverable(&ClientError::server(status, None)),
                codes.contains(&status)
            );
        }

        /// Property: a step never makes more than `retries + 1` attempts.
        #[test]
        fn attempts_are_bounded(retries in 0u32..10, failures in 1usize..30) {
            let mut state = RetryState::new(RetryPolicy::fixed(retries, Duration::ZERO));
            let mut attempts = 1u32;
            for _ in 0..failures {
                match state.record_failure(&ClientError::Timeout) {
                    RetryDecision::RetryAfter(_) => attempts += 1,
                    RetryDecision::GiveUp => break,
                }
            }
            prop_assert!(attempts <= retries + 1);
        }
    }
}
