// src/ingest/retry.rs
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

use crate::error::MalformedResponse;

/// Exponential backoff: after failed attempt `n` wait `base * 2^n`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.min(20))
    }
}

/// Run `op` until it succeeds or `max_attempts` tries have failed.
/// The last error is returned with the attempt count attached.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if MalformedResponse::is_cause_of(&e) => {
                return Err(e.context(format!("{what} returned malformed data")));
            }
            Err(e) if attempt < max => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    target: "ingest",
                    error = %e,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "{what} failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(anyhow!("{what} failed after {attempt} attempts: {e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(2));
        assert_eq!(p.delay_after(2), Duration::from_secs(4));
        assert_eq!(p.delay_after(9), Duration::from_secs(512));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(&RetryPolicy::default(), "lookup", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Err(anyhow!("boom {n}"))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_backoff(&RetryPolicy::default(), "lookup", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("down"))
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert!(res.unwrap_err().to_string().contains("after 10 attempts"));
    }

    #[tokio::test]
    async fn malformed_data_is_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_backoff(&RetryPolicy::default(), "listing request", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::Error::new(MalformedResponse {
                what: "listing".into(),
                reason: "expected value at line 1 column 1".into(),
            })
            .context("GET /browse"))
        })
        .await;
        let err = res.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(MalformedResponse::is_cause_of(&err));
    }
}
