//! Bounded retry with exponential backoff for store calls.
//!
//! Every external index call goes through here: each attempt carries a
//! timeout, transient failures back off and retry up to a bounded attempt
//! count, and permanent failures return immediately.

use std::future::Future;
use std::time::Duration;

use index_store::StoreError;
use tokio::time::{sleep, timeout};

/// Retry bounds applied to a single logical store operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; doubled per retry, capped at 16x.
    pub base_delay: Duration,
    /// Per-attempt timeout. An elapsed timeout counts as transient.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or exhausts the policy.
pub async fn with_retries<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut last_error: Option<StoreError> = None;

    for attempt in 0..policy.max_attempts.max(1) {
        if attempt > 0 {
            let delay = policy.base_delay * (1 << (attempt - 1).min(4));
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient store error"
            );
            sleep(delay).await;
        }

        let result = match timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "{operation} timed out after {}ms",
                policy.call_timeout.as_millis()
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }

    let exhausted = last_error
        .unwrap_or_else(|| StoreError::Transient(format!("{operation} failed without attempts")));
    tracing::error!(operation, error = %exhausted, "retries exhausted");
    Err(exhausted)
}
