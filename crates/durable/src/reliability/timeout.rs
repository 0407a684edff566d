//! Per-attempt timeout enforcement

use std::future::Future;
use std::time::Duration;

use crate::step::StepError;

/// Error type recorded when an attempt exceeds its time limit
pub const TIMEOUT_ERROR_TYPE: &str = "TIMEOUT";

/// Run one step attempt under `limit`.
///
/// Exceeding the limit drops the attempt's future and yields a retryable
/// `TIMEOUT` error, so the policy decides whether another attempt follows.
pub async fn run_with_timeout<F, T>(limit: Option<Duration>, attempt: F) -> Result<T, StepError>
where
    F: Future<Output = Result<T, StepError>>,
{
    let Some(limit) = limit else {
        return attempt.await;
    };

    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(StepError::retryable(format!(
            "attempt exceeded time limit of {}ms",
            limit.as_millis()
        ))
        .with_type(TIMEOUT_ERROR_TYPE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out_as_retryable() {
        let result: Result<(), StepError> = run_with_timeout(Some(Duration::from_secs(1)), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.retryable);
        assert_eq!(err.error_type.as_deref(), Some(TIMEOUT_ERROR_TYPE));
    }

    #[tokio::test]
    async fn test_fast_attempt_passes_through() {
        let result = run_with_timeout(Some(Duration::from_secs(1)), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_no_limit_keeps_attempt_error() {
        let result: Result<(), StepError> =
            run_with_timeout(None, async { Err(StepError::terminal("bad")) }).await;
        assert!(!result.unwrap_err().retryable);
    }
}
