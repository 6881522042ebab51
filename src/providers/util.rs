use crate::core::error::{RateError, RateResult};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Longest `Retry-After` the retry loop is willing to sleep through.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// Only errors for which [`RateError::is_retryable`] holds are retried. A
/// rate-limited response waits for its `Retry-After` hint when that is longer
/// than `delay_ms`, and gives up at once if the hint exceeds a minute.
///
/// # Returns
/// Either the successful result or the error of the last attempt
pub async fn with_retry<F, Fut, T>(mut operation: F, retries: usize, delay_ms: u64) -> RateResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RateResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries || !err.is_retryable() {
                    return Err(err);
                }
                let delay = match &err {
                    RateError::RateLimited {
                        retry_after_secs: Some(secs),
                    } if *secs > MAX_RETRY_AFTER_SECS => return Err(err),
                    RateError::RateLimited {
                        retry_after_secs: Some(secs),
                    } => Duration::from_millis(delay_ms).max(Duration::from_secs(*secs)),
                    _ => Duration::from_millis(delay_ms),
                };
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, retries, err, delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
