//! Retry with capped exponential backoff for module handlers.

use std::future::Future;
use std::time::Duration;

use offload_core::messages::{metadata_keys, Metadata};
use serde_json::Value;
use tracing::debug;

use super::module::ModuleError;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Default policy with `max_retries` taken from request metadata when
    /// present.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mut policy = Self::default();
        if let Some(retries) = metadata
            .get(metadata_keys::MAX_RETRIES)
            .and_then(Value::as_u64)
        {
            policy.max_retries = u32::try_from(retries).unwrap_or(u32::MAX);
        }
        policy
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up. The last error is returned as-is.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ModuleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModuleError>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retry < policy.max_retries && err.is_retryable() => {
                let delay = policy.delay_for(retry);
                debug!(attempt = retry + 1, delay = ?delay, error = %err, "retrying");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    type Attempt = std::future::Ready<Result<u32, ModuleError>>;

    /// Operation that fails `failures` times before succeeding.
    fn flaky(failures: u32, status: Option<u16>) -> (Arc<AtomicU32>, impl FnMut() -> Attempt) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let result = if n < failures {
                let err = ModuleError::new("flaky");
                Err(match status {
                    Some(code) => err.with_status(code),
                    None => err,
                })
            } else {
                Ok(n)
            };
            std::future::ready(result)
        };
        (calls, op)
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn policy_reads_max_retries_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert(metadata_keys::MAX_RETRIES.to_string(), json!(7));
        assert_eq!(RetryPolicy::from_metadata(&metadata).max_retries, 7);
        assert_eq!(RetryPolicy::from_metadata(&Metadata::new()).max_retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let (calls, op) = flaky(2, Some(503));
        let value = retry_with_backoff(&RetryPolicy::default(), op).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let (calls, op) = flaky(10, None);
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        assert!(retry_with_backoff(&policy, op).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let (calls, op) = flaky(10, Some(404));
        let err = retry_with_backoff(&RetryPolicy::default(), op).await.unwrap_err();
        assert_eq!(err.status, Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts() {
        let (_calls, op) = flaky(2, Some(500));
        let start = tokio::time::Instant::now();
        retry_with_backoff(&RetryPolicy::default(), op).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
