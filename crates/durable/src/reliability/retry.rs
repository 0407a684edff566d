//! Retry policy and the retry decision for a failed step attempt

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::step::StepError;

/// Bounded retry configuration for a step
///
/// `max_attempts` counts the initial attempt, so a policy built with
/// [`RetryPolicy::with_retries`]`(3)` runs a step at most four times.
///
/// # Example
///
/// ```
/// use timeglow_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::with_retries(3)
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(30));
///
/// assert_eq!(policy.max_attempts, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, initial attempt included
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means +/-10%
    pub jitter: f64,

    /// Error types that end the step immediately even when flagged retryable
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

/// What the engine does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run the next attempt
    Retry { delay: Duration },
    /// Stop retrying; the step has failed terminally
    GiveUp,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 5 attempts, 1s initial, 30s cap, 2x, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// Exponential backoff allowing `retries` retries after the first attempt
    pub fn with_retries(retries: u32) -> Self {
        Self::exponential().with_max_attempts(retries.saturating_add(1))
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Fixed delay between attempts
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor, clamped to 0.0-1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Number of retries this policy allows after the initial attempt
    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Delay to wait before running `attempt` (1-based). Attempt 1 never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter_range = capped * self.jitter;
        let jittered = if jitter_range > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether an error type is eligible for retry under this policy
    pub fn should_retry(&self, error_type: Option<&str>) -> bool {
        match error_type {
            Some(error_type) => !self.non_retryable_errors.iter().any(|e| e == error_type),
            None => true,
        }
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Decide what follows a failed `attempt`.
    ///
    /// Pure in the error's kind and the attempt count; only the jittered
    /// delay is random.
    pub fn decide(&self, attempt: u32, error: &StepError) -> RetryDecision {
        if !error.retryable || !self.should_retry(error.error_type.as_deref()) {
            return RetryDecision::GiveUp;
        }
        if !self.has_attempts_remaining(attempt) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for_attempt(attempt + 1),
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
