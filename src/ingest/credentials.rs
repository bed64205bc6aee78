// src/ingest/credentials.rs
//! Shared bearer token for the upstream site and its refresh loop.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::retry::{with_backoff, RetryPolicy};
use crate::shutdown;

/// Exchanges stored client credentials for a fresh bearer token.
#[async_trait::async_trait]
pub trait TokenGrant: Send + Sync {
    async fn request_token(&self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub acquired_at: DateTime<Utc>,
}

pub struct CredentialManager {
    grant: Arc<dyn TokenGrant>,
    token: RwLock<Option<AccessToken>>,
    retry: RetryPolicy,
}

impl CredentialManager {
    pub fn new(grant: Arc<dyn TokenGrant>) -> Self {
        Self {
            grant,
            token: RwLock::new(None),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current token value. Errors only before the first successful refresh.
    pub fn bearer(&self) -> Result<String> {
        let guard = self.token.read().expect("token rwlock poisoned");
        guard
            .as_ref()
            .map(|t| t.value.clone())
            .ok_or_else(|| anyhow!("no access token acquired yet"))
    }

    pub fn current(&self) -> Option<AccessToken> {
        self.token.read().expect("token rwlock poisoned").clone()
    }

    /// Request a new token and swap it in. On failure the old token stays.
    pub async fn refresh(&self) -> Result<()> {
        let value = with_backoff(&self.retry, "token request", || self.grant.request_token()).await;
        let value = match value {
            Ok(v) => v,
            Err(e) => {
                counter!("token_refresh_errors_total").increment(1);
                return Err(e);
            }
        };
        let fresh = AccessToken {
            value,
            acquired_at: Utc::now(),
        };
        *self.token.write().expect("token rwlock poisoned") = Some(fresh);
        counter!("token_refresh_total").increment(1);
        tracing::info!(target: "credentials", "access token refreshed");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RefreshCfg {
    /// Cadence while refreshes succeed (token lifetime minus a margin).
    pub every: Duration,
    /// Delay before trying again after a refresh gave up.
    pub retry_after: Duration,
}

impl Default for RefreshCfg {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(59 * 60),
            retry_after: Duration::from_secs(60),
        }
    }
}

/// Refresh the token on a fixed cadence until `shutdown` flips to true.
/// Failed refreshes are logged and retried sooner; they never end the loop.
pub fn spawn_refresh_loop(
    creds: Arc<CredentialManager>,
    cfg: RefreshCfg,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut wait = cfg.every;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }
            match creds.refresh().await {
                Ok(()) => wait = cfg.every,
                Err(e) => {
                    tracing::error!(target: "credentials", error = %e, "token refresh failed, keeping previous token");
                    wait = cfg.retry_after;
                }
            }
        }
        tracing::debug!(target: "credentials", "refresh loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl TokenGrant for Counting {
        async fn request_token(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("invalid_client"))
            } else {
                Ok(format!("token-{n}"))
            }
        }
    }

    #[tokio::test]
    async fn bearer_errors_before_first_refresh() {
        let grant = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let creds = CredentialManager::new(grant);
        assert!(creds.bearer().is_err());
        creds.refresh().await.unwrap();
        assert_eq!(creds.bearer().unwrap(), "token-0");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_token() {
        let grant = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let creds = CredentialManager::new(grant);
        creds.refresh().await.unwrap();

        let failing = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let creds = CredentialManager {
            grant: failing.clone(),
            token: RwLock::new(creds.current()),
            retry: RetryPolicy::default(),
        };
        assert!(creds.refresh().await.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 10);
        assert_eq!(creds.bearer().unwrap(), "token-0");
    }
}
