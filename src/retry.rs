//! Exponential backoff retry helper shared by LLM and Supabase REST calls.
//!
//! Base 2, max 3 attempts total; only transient failures are retried —
//! network errors and 5xx provider responses. 4xx responses, `RateLimited`,
//! `Config`, and `Parse` errors are never retried.

use std::time::Duration;

use tracing::warn;

use crate::error::{DprError, Result};

pub const MAX_ATTEMPTS: u32 = 3;

fn is_retryable(err: &DprError) -> bool {
    match err {
        DprError::Network(_) => true,
        DprError::Provider { code, .. } => code.starts_with('5'),
        _ => false,
    }
}

/// Calls `f` up to [`MAX_ATTEMPTS`] times, sleeping `2^(attempt-1)` seconds
/// between retryable failures. `label` is logged with each retry for
/// structured context.
pub async fn with_backoff<F, Fut, T>(label: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < MAX_ATTEMPTS && is_retryable(&e) => {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!(label, attempt, error = %e, delay_secs = delay.as_secs(), "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_network_style_errors_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DprError::Provider { code: "503".to_string(), message: "down".to_string() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn succeeds_after_a_retry() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(DprError::Provider { code: "500".to_string(), message: "transient".to_string() })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_retries_4xx() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DprError::Provider { code: "404".to_string(), message: "missing".to_string() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_retries_rate_limited() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DprError::RateLimited(3))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
