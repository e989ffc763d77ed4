//! Short-lived sandbox bearer tokens.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::BuildError;

/// Tokens with less remaining lifetime than this are refreshed before use.
pub const MIN_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn outlives(&self, now: OffsetDateTime, min_remaining: Duration) -> bool {
        now + min_remaining < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no token cached for sandbox {0}")]
pub struct MissingToken(pub String);

/// Sandbox id to token map. Records are replaced whole, so readers never
/// observe a token paired with another token's expiry; concurrent writers
/// race and the last one wins.
#[derive(Debug, Default)]
pub struct TokenCache {
    records: RwLock<HashMap<String, Arc<TokenRecord>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache for callers that do not inject their own.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<TokenCache>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::new())).clone()
    }

    pub fn record(&self, sandbox_id: &str) -> Option<Arc<TokenRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sandbox_id)
            .cloned()
    }

    pub fn get(&self, sandbox_id: &str) -> Result<String, MissingToken> {
        self.record(sandbox_id)
            .map(|record| record.token.clone())
            .ok_or_else(|| MissingToken(sandbox_id.to_string()))
    }

    pub fn store(&self, sandbox_id: &str, token: impl Into<String>, expires_at: OffsetDateTime) {
        let record = Arc::new(TokenRecord::new(token, expires_at));
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sandbox_id.to_string(), record);
    }

    pub fn is_fresh(&self, sandbox_id: &str, min_remaining: Duration) -> bool {
        let now = OffsetDateTime::now_utc();
        self.record(sandbox_id)
            .is_some_and(|record| record.outlives(now, min_remaining))
    }

    /// Cached token when it still has [`MIN_TOKEN_LIFETIME`] ahead of it;
    /// otherwise `refresh` runs and its result replaces the record.
    pub async fn ensure_valid<F, Fut>(
        &self,
        sandbox_id: &str,
        refresh: F,
    ) -> Result<String, BuildError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenRecord, BuildError>>,
    {
        if self.is_fresh(sandbox_id, MIN_TOKEN_LIFETIME) {
            return self.get(sandbox_id).map_err(|err| BuildError::TokenUnavailable {
                sandbox_id: sandbox_id.to_string(),
                reason: err.to_string(),
            });
        }
        self.refresh_with(sandbox_id, refresh).await
    }

    /// Runs `refresh` unconditionally and stores its result, rejecting
    /// tokens that are already expired.
    pub async fn refresh_with<F, Fut>(
        &self,
        sandbox_id: &str,
        refresh: F,
    ) -> Result<String, BuildError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenRecord, BuildError>>,
    {
        let refreshed = refresh().await.map_err(|err| match err {
            BuildError::TokenUnavailable { .. } => err,
            other => BuildError::TokenUnavailable {
                sandbox_id: sandbox_id.to_string(),
                reason: other.to_string(),
            },
        })?;
        if refreshed.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(BuildError::TokenUnavailable {
                sandbox_id: sandbox_id.to_string(),
                reason: "refreshed token is already expired".into(),
            });
        }
        tracing::debug!(
            sandbox_id,
            expires_at = %refreshed.expires_at,
            "sandbox_token_refreshed"
        );
        let token = refreshed.token.clone();
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sandbox_id.to_string(), Arc::new(refreshed));
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use time::Duration as TimeDuration;

    use super::*;

    fn counting_refresh<'a>(
        calls: &'a AtomicUsize,
        token: &'static str,
        lifetime: TimeDuration,
    ) -> impl Future<Output = Result<TokenRecord, BuildError>> + 'a {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenRecord::new(token, OffsetDateTime::now_utc() + lifetime))
        }
    }

    #[tokio::test]
    async fn refreshes_when_missing() -> anyhow::Result<()> {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);
        let token = cache
            .ensure_valid("sbx-1", || {
                counting_refresh(&calls, "fresh", TimeDuration::hours(2))
            })
            .await?;
        assert_eq!(token, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("sbx-1")?, "fresh");
        Ok(())
    }

    #[tokio::test]
    async fn refreshes_when_close_to_expiry() -> anyhow::Result<()> {
        let cache = TokenCache::new();
        cache.store(
            "sbx-1",
            "stale",
            OffsetDateTime::now_utc() + TimeDuration::minutes(30),
        );
        let calls = AtomicUsize::new(0);
        let token = cache
            .ensure_valid("sbx-1", || {
                counting_refresh(&calls, "new", TimeDuration::hours(3))
            })
            .await?;
        assert_eq!(token, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn keeps_tokens_with_enough_lifetime() -> anyhow::Result<()> {
        let cache = TokenCache::new();
        cache.store(
            "sbx-1",
            "long-lived",
            OffsetDateTime::now_utc() + TimeDuration::hours(2),
        );
        let calls = AtomicUsize::new(0);
        let token = cache
            .ensure_valid("sbx-1", || {
                counting_refresh(&calls, "unused", TimeDuration::hours(3))
            })
            .await?;
        assert_eq!(token, "long-lived");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_refresh_result_is_rejected() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);
        let err = cache
            .ensure_valid("sbx-1", || {
                counting_refresh(&calls, "old", TimeDuration::minutes(-5))
            })
            .await
            .expect_err("expired token must not be accepted");
        assert_eq!(err.code(), "SBX200");
        assert!(cache.get("sbx-1").is_err());
    }

    #[test]
    fn last_write_wins() -> anyhow::Result<()> {
        let cache = TokenCache::new();
        let later = OffsetDateTime::now_utc() + TimeDuration::hours(1);
        cache.store("s", "a", later);
        cache.store("s", "b", later);
        assert_eq!(cache.get("s")?, "b");
        assert_eq!(
            cache.get("unknown"),
            Err(MissingToken("unknown".to_string()))
        );
        Ok(())
    }

    #[test]
    fn shared_cache_is_a_single_instance() {
        assert!(Arc::ptr_eq(&TokenCache::shared(), &TokenCache::shared()));
    }
}
