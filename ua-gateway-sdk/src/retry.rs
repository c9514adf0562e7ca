use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy for publisher connections: exponential backoff with an
/// optional attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of consecutive attempts (None = unlimited)
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Initial retry interval in milliseconds
    #[serde(default = "RetryPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Maximum retry interval cap in milliseconds
    #[serde(default = "RetryPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Randomization factor in range [0.0, 1.0]. Example: 0.2 means ±20% jitter
    #[serde(default = "RetryPolicy::default_randomization_factor")]
    pub randomization_factor: f64,

    /// Multiplicative factor for each retry step
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,

    /// Optional maximum total elapsed time in milliseconds (None = no time limit)
    #[serde(default = "RetryPolicy::default_max_elapsed_time_ms")]
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
            max_elapsed_time_ms: Self::default_max_elapsed_time_ms(),
        }
    }
}

impl RetryPolicy {
    fn default_max_attempts() -> Option<u32> {
        None // publishers keep trying for the life of the process
    }

    fn default_initial_interval_ms() -> u64 {
        1_000
    }

    fn default_max_interval_ms() -> u64 {
        30_000
    }

    fn default_randomization_factor() -> f64 {
        0.2
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    fn default_max_elapsed_time_ms() -> Option<u64> {
        None
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Default::default()
        }
    }

    /// True once `attempt` consecutive failures exhaust the policy.
    #[inline]
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Build an ExponentialBackoff from RetryPolicy.
///
/// `max_elapsed_time` bounds the total retry time; callers check
/// `max_attempts` themselves through [`RetryPolicy::exhausted`].
pub fn build_exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    let initial = Duration::from_millis(policy.initial_interval_ms.max(1));
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: Duration::from_millis(policy.max_interval_ms.max(policy.initial_interval_ms)),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: policy.max_elapsed_time_ms.map(Duration::from_millis),
        ..ExponentialBackoff::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_backoff_respects_bounds() {
        let policy = RetryPolicy {
            initial_interval_ms: 100,
            max_interval_ms: 400,
            randomization_factor: 0.0,
            ..Default::default()
        };
        let mut bo = build_exponential_backoff(&policy);
        let delays = (0..5)
            .filter_map(|_| bo.next_backoff())
            .map(|d| d.as_millis())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![100, 200, 400, 400, 400]);
    }

    #[test]
    fn test_attempt_cap() {
        assert!(!RetryPolicy::default().exhausted(1_000));
        let p = RetryPolicy::with_max_attempts(3);
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));
    }
}
