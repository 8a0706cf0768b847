//! Retry policy and backoff
//!
//! Backoff is a pure function of the attempt number so that the store, the
//! executor and the recovery sweep all agree on when a post comes due again.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::types::Platform;

/// Exponent cap for [`RetryPolicy::backoff`]. The store's SQL backoff uses
/// the same cap.
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a transient failure becomes terminal
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// `min(base * 2^attempt, max_delay)`, with the exponent capped at
    /// [`MAX_BACKOFF_EXPONENT`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Global policy plus optional per-platform overrides.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    default: RetryPolicy,
    overrides: HashMap<Platform, RetryPolicy>,
}

impl RetryPolicies {
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            default: policy,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let default = RetryPolicy::new(
            config.max_attempts,
            Duration::from_secs(config.base_delay_secs),
            Duration::from_secs(config.max_delay_secs),
        );

        let overrides = config
            .platforms
            .iter()
            .map(|(platform, over)| {
                let policy = RetryPolicy::new(
                    over.max_attempts.unwrap_or(default.max_attempts),
                    over.base_delay_secs
                        .map(Duration::from_secs)
                        .unwrap_or(default.base_delay),
                    over.max_delay_secs
                        .map(Duration::from_secs)
                        .unwrap_or(default.max_delay),
                );
                (*platform, policy)
            })
            .collect();

        Self { default, overrides }
    }

    pub fn with_override(mut self, platform: Platform, policy: RetryPolicy) -> Self {
        self.overrides.insert(platform, policy);
        self
    }

    pub fn default_policy(&self) -> RetryPolicy {
        self.default
    }

    pub fn for_platform(&self, platform: Platform) -> RetryPolicy {
        self.overrides.get(&platform).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryOverride;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(300))
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(10));
        assert_eq!(p.backoff(1), Duration::from_secs(20));
        assert_eq!(p.backoff(2), Duration::from_secs(40));
        assert_eq!(p.backoff(3), Duration::from_secs(80));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.backoff(5), Duration::from_secs(300));
        assert_eq!(p.backoff(31), Duration::from_secs(300));
        assert_eq!(p.backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_never_decreases() {
        let p = policy();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = p.backoff(attempt);
            assert!(delay >= previous);
            assert!(delay <= p.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_overrides_fall_back_field_by_field() {
        let mut config = RetryConfig::default();
        config.platforms.insert(
            Platform::Tiktok,
            RetryOverride {
                max_attempts: Some(2),
                ..Default::default()
            },
        );

        let policies = RetryPolicies::from_config(&config);
        let tiktok = policies.for_platform(Platform::Tiktok);
        assert_eq!(tiktok.max_attempts, 2);
        assert_eq!(tiktok.base_delay, Duration::from_secs(config.base_delay_secs));

        let facebook = policies.for_platform(Platform::Facebook);
        assert_eq!(facebook.max_attempts, config.max_attempts);
    }
}
