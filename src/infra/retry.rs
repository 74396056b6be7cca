//! Retry with exponential backoff for idempotent calls (pinning uploads, ledger reads).
//!
//! Never wrap ledger writes in this: a retried submit can mint twice.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubles after each one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            base_delay: Duration::ZERO,
        }
    }
}

pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, operation: &str, mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = policy.base_delay;
    let mut remaining = policy.retries;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 0 => {
                tracing::warn!(
                    operation,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    remaining,
                    "call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                remaining -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> = with_retry(fast(3), "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(format!("attempt {} failed", n))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_all_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), &str> = with_retry(fast(3), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .await;
        assert_eq!(result, Err("down"));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn no_retry_policy_calls_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _: Result<(), &str> = with_retry(RetryPolicy::none(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
