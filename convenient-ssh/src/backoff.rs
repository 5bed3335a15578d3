//! Retry pacing
//!
//! A recipe's resilience block names a backoff strategy and a base delay as
//! a duration string ("500ms", "5s"). The policy caps attempts per host and
//! spaces them out between connection teardowns.

use convenient_recipe::RecipeResilience;
use std::time::Duration;
use tracing::warn;

/// Default attempt cap when neither the flag nor the recipe set one.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default base delay between attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Constant,
    /// Delay doubles after each failed attempt
    #[default]
    Exponential,
}

impl BackoffStrategy {
    /// Parse a strategy identifier; unknown values fall back to exponential.
    pub fn parse(value: &str) -> BackoffStrategy {
        match value.trim().to_ascii_lowercase().as_str() {
            "constant" => BackoffStrategy::Constant,
            "" | "exponential" => BackoffStrategy::Exponential,
            other => {
                warn!("unknown backoff strategy {other:?}, using exponential");
                BackoffStrategy::Exponential
            }
        }
    }

    /// Delay before the retry following failed attempt number `attempt`
    /// (1-based).
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Exponential => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                base.saturating_mul(factor)
            }
        }
    }
}

/// Per-host retry discipline for one session run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempt cap, always at least 1
    pub max_attempts: u32,
    /// Delay growth
    pub strategy: BackoffStrategy,
    /// Base delay between attempts
    pub base: Duration,
    /// Pause between consecutive commands on one host
    pub pause: Duration,
}

impl RetryPolicy {
    /// Build the policy from a recipe's resilience block and the `--retries`
    /// flag. The flag is authoritative when the user passed it explicitly;
    /// otherwise the recipe value applies when set, otherwise
    /// [`DEFAULT_RETRIES`].
    pub fn from_recipe(resilience: &RecipeResilience, retries_flag: Option<u32>) -> RetryPolicy {
        let max_attempts = match retries_flag {
            Some(value) => value.max(1),
            None if resilience.retries > 0 => resilience.retries,
            None => DEFAULT_RETRIES,
        };

        RetryPolicy {
            max_attempts,
            strategy: BackoffStrategy::parse(&resilience.retry_backoff_strategy),
            base: parse_duration(&resilience.retry_backoff_multiplier)
                .unwrap_or(DEFAULT_BACKOFF_BASE),
            pause: parse_duration(&resilience.wait_duration).unwrap_or(Duration::ZERO),
        }
    }

    /// Delay before the retry following failed attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.strategy.delay(self.base, attempt)
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match humantime::parse_duration(value) {
        Ok(duration) => Some(duration),
        Err(err) => {
            warn!("unparseable duration {value:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resilience(retries: u32, strategy: &str, base: &str) -> RecipeResilience {
        RecipeResilience {
            wait_duration: String::new(),
            retries,
            retry_backoff_strategy: strategy.to_string(),
            retry_backoff_multiplier: base.to_string(),
            fail_batch: false,
        }
    }

    #[test]
    fn flag_is_authoritative_when_passed() {
        let policy = RetryPolicy::from_recipe(&resilience(5, "", ""), Some(2));
        assert_eq!(policy.max_attempts, 2);
    }

    #[test]
    fn explicit_zero_still_attempts_once() {
        let policy = RetryPolicy::from_recipe(&resilience(5, "", ""), Some(0));
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn recipe_applies_when_flag_absent() {
        let policy = RetryPolicy::from_recipe(&resilience(5, "", ""), None);
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn default_when_neither_is_set() {
        let policy = RetryPolicy::from_recipe(&resilience(0, "", ""), None);
        assert_eq!(policy.max_attempts, DEFAULT_RETRIES);
        assert_eq!(policy.base, DEFAULT_BACKOFF_BASE);
    }

    #[test]
    fn exponential_doubles_per_attempt() {
        let strategy = BackoffStrategy::Exponential;
        let base = Duration::from_millis(100);
        assert_eq!(strategy.delay(base, 1), Duration::from_millis(100));
        assert_eq!(strategy.delay(base, 2), Duration::from_millis(200));
        assert_eq!(strategy.delay(base, 3), Duration::from_millis(400));
    }

    #[test]
    fn constant_never_grows() {
        let strategy = BackoffStrategy::Constant;
        let base = Duration::from_secs(5);
        assert_eq!(strategy.delay(base, 1), base);
        assert_eq!(strategy.delay(base, 4), base);
    }

    #[test]
    fn strategy_parsing_is_case_insensitive() {
        assert_eq!(BackoffStrategy::parse("Constant"), BackoffStrategy::Constant);
        assert_eq!(
            BackoffStrategy::parse("EXPONENTIAL"),
            BackoffStrategy::Exponential
        );
        assert_eq!(BackoffStrategy::parse(""), BackoffStrategy::Exponential);
        assert_eq!(BackoffStrategy::parse("bogus"), BackoffStrategy::Exponential);
    }

    #[test]
    fn durations_parse_from_recipe_strings() {
        let policy = RetryPolicy::from_recipe(&resilience(0, "constant", "5s"), None);
        assert_eq!(policy.base, Duration::from_secs(5));
        assert_eq!(policy.strategy, BackoffStrategy::Constant);

        let policy = RetryPolicy::from_recipe(&resilience(0, "", "not-a-duration"), None);
        assert_eq!(policy.base, DEFAULT_BACKOFF_BASE);
    }
}
