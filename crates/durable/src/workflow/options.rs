//! Per-step execution options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Retry and timeout settings for one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOptions {
    pub retry_policy: RetryPolicy,

    /// Time limit for a single attempt (None = unbounded)
    #[serde(with = "option_duration_millis", default)]
    pub attempt_timeout: Option<Duration>,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            attempt_timeout: None,
        }
    }
}

impl StepOptions {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            attempt_timeout: None,
        }
    }

    /// A single attempt with no time limit
    pub fn once() -> Self {
        Self::new(RetryPolicy::no_retry())
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
