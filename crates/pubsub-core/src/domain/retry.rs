//! Retry policy configuration and validation
//!
//! Applications describe retries with [`RetryPolicyConfig`], where every field
//! is optional and backoffs are signed so that misconfiguration can be
//! detected. Registration turns it into a validated [`RetryPolicy`], which the
//! broker reads when scheduling redeliveries.
//!
//! # Example
//!
//! ```
//! use pubsub_core::domain::RetryPolicyConfig;
//!
//! let policy = RetryPolicyConfig::new()
//!     .max_retries(10)
//!     .min_backoff(chrono::Duration::seconds(1))
//!     .resolve()
//!     .expect("valid policy");
//!
//! assert_eq!(policy.max_retries(), 10);
//! assert_eq!(policy.max_backoff(), std::time::Duration::from_secs(600));
//! ```

use crate::error::ConfigError;
use std::time::Duration;

/// Redeliveries allowed when the application does not say otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 100;

/// Minimum backoff when the application does not say otherwise.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(10);

/// Maximum backoff when the application does not say otherwise.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// Validated retry parameters for one subscription.
///
/// Immutable once built; the broker reads it to decide whether and when a
/// failed delivery is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Number of redeliveries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Lower bound for the delay between attempts.
    #[must_use]
    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Upper bound for the delay between attempts.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Whether a message whose attempt `failed_attempt` (1-based) just failed
    /// may be delivered again.
    ///
    /// Always false at `u32::MAX`, since no later attempt number exists.
    #[must_use]
    pub fn should_redeliver(&self, failed_attempt: u32) -> bool {
        failed_attempt < u32::MAX && failed_attempt <= self.max_retries
    }

    /// Clamp a broker-computed delay into `[min_backoff, max_backoff]`.
    #[must_use]
    pub fn clamp_backoff(&self, delay: Duration) -> Duration {
        delay.max(self.min_backoff).min(self.max_backoff)
    }
}

/// Application-facing retry configuration.
///
/// Omitted fields take the defaults. A zero backoff is treated as omitted.
/// Negative backoffs and `min > max` are rejected by [`resolve`](Self::resolve).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicyConfig {
    max_retries: Option<u32>,
    min_backoff: Option<chrono::Duration>,
    max_backoff: Option<chrono::Duration>,
}

impl RetryPolicyConfig {
    /// Create a config with every field omitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of redeliveries after the first attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the minimum backoff.
    pub fn min_backoff(mut self, backoff: chrono::Duration) -> Self {
        self.min_backoff = Some(backoff);
        self
    }

    /// Set the maximum backoff.
    pub fn max_backoff(mut self, backoff: chrono::Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<RetryPolicy, ConfigError> {
        let min_backoff = resolve_backoff("MinBackoff", self.min_backoff, DEFAULT_MIN_BACKOFF)?;
        let max_backoff = resolve_backoff("MaxBackoff", self.max_backoff, DEFAULT_MAX_BACKOFF)?;

        if min_backoff > max_backoff {
            return Err(ConfigError::InvertedBackoff {
                min: min_backoff,
                max: max_backoff,
            });
        }

        Ok(RetryPolicy {
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            min_backoff,
            max_backoff,
        })
    }
}

fn resolve_backoff(
    field: &'static str,
    value: Option<chrono::Duration>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(d) if d < chrono::Duration::zero() => Err(ConfigError::NegativeBackoff { field }),
        Some(d) if d == chrono::Duration::zero() => Ok(default),
        Some(d) => d
            .to_std()
            .map_err(|_| ConfigError::NegativeBackoff { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicyConfig::new().resolve().unwrap();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.max_retries(), 100);
        assert_eq!(policy.min_backoff(), Duration::from_secs(10));
        assert_eq!(policy.max_backoff(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let policy = RetryPolicyConfig::new().max_retries(3).resolve().unwrap();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.min_backoff(), DEFAULT_MIN_BACKOFF);
        assert_eq!(policy.max_backoff(), DEFAULT_MAX_BACKOFF);
    }

    #[test]
    fn test_explicit_zero_retries() {
        let policy = RetryPolicyConfig::new().max_retries(0).resolve().unwrap();
        assert_eq!(policy.max_retries(), 0);
        assert!(!policy.should_redeliver(1));
    }

    #[test]
    fn test_zero_backoff_means_default() {
        let policy = RetryPolicyConfig::new()
            .min_backoff(chrono::Duration::zero())
            .resolve()
            .unwrap();
        assert_eq!(policy.min_backoff(), DEFAULT_MIN_BACKOFF);
    }

    #[test]
    fn test_negative_min_backoff() {
        let err = RetryPolicyConfig::new()
            .min_backoff(chrono::Duration::seconds(-1))
            .resolve()
            .unwrap_err();
        assert_eq!(err, ConfigError::NegativeBackoff { field: "MinBackoff" });
    }

    #[test]
    fn test_negative_max_backoff() {
        let err = RetryPolicyConfig::new()
            .max_backoff(chrono::Duration::milliseconds(-5))
            .resolve()
            .unwrap_err();
        assert_eq!(err, ConfigError::NegativeBackoff { field: "MaxBackoff" });
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let err = RetryPolicyConfig::new()
            .min_backoff(chrono::Duration::minutes(20))
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvertedBackoff { .. }));
    }

    #[test]
    fn test_should_redeliver() {
        let policy = RetryPolicyConfig::new().max_retries(2).resolve().unwrap();
        assert!(policy.should_redeliver(1));
        assert!(policy.should_redeliver(2));
        assert!(!policy.should_redeliver(3));
    }

    #[test]
    fn test_should_redeliver_unbounded_policy_at_last_attempt() {
        let policy = RetryPolicyConfig::new().max_retries(u32::MAX).resolve().unwrap();
        assert!(policy.should_redeliver(u32::MAX - 1));
        assert!(!policy.should_redeliver(u32::MAX));
    }

    #[test]
    fn test_clamp_backoff() {
        let policy = RetryPolicyConfig::new()
            .min_backoff(chrono::Duration::seconds(1))
            .max_backoff(chrono::Duration::seconds(5))
            .resolve()
            .unwrap();
        assert_eq!(policy.clamp_backoff(Duration::from_millis(10)), Duration::from_secs(1));
        assert_eq!(policy.clamp_backoff(Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(policy.clamp_backoff(Duration::from_secs(60)), Duration::from_secs(5));
    }
}
