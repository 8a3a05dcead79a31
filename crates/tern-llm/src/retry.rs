use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tern_core::errors::ProviderError;

/// Retry policy for transient provider failures.
///
/// - Exponential backoff from `base_delay`, capped at `max_delay`
/// - Jitter of `delay * (1 ± jitter_factor)`
/// - A `retry_after` hint from the provider wins over the computed delay
///
/// The policy only decides; the caller owns the loop, because only the
/// caller knows whether a round has already committed output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `attempt` is zero-based: the first failed attempt is 0.
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }

    /// Delay before the retry that follows failed `attempt`.
    pub fn delay_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.max_delay);
        }

        let exp_ms = self.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let capped = exp_ms.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Serde helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn exponential_backoff() {
        let policy = no_jitter(100, 30_000);
        assert_eq!(policy.delay_for(0, None).as_millis(), 100);
        assert_eq!(policy.delay_for(1, None).as_millis(), 200);
        assert_eq!(policy.delay_for(2, None).as_millis(), 400);
    }

    #[test]
    fn capped_at_max() {
        let policy = no_jitter(1000, 5000);
        assert_eq!(policy.delay_for(10, None).as_millis(), 5000);
        assert_eq!(policy.delay_for(u32::MAX, None).as_millis(), 5000);
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..Default::default()
        };
        for _ in 0..50 {
            let ms = policy.delay_for(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "out of band: {ms}");
        }
    }

    #[test]
    fn suggested_delay_wins_but_is_capped() {
        let policy = no_jitter(100, 10_000);
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(60))), Duration::from_secs(10));
    }

    #[test]
    fn retries_only_transient_within_budget() {
        let policy = RetryPolicy::default();
        let transient = ProviderError::Timeout(Duration::from_secs(1));
        let fatal = ProviderError::AuthenticationFailed("bad".into());

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&fatal, 0));
        assert!(!RetryPolicy::none().should_retry(&transient, 0));
    }

    #[test]
    fn serializes_durations_as_ms() {
        let json = serde_json::to_value(no_jitter(250, 4000)).unwrap();
        assert_eq!(json["base_delay"], 250);
        assert_eq!(json["max_delay"], 4000);
        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back.base_delay, Duration::from_millis(250));
    }
}
