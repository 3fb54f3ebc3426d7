//! Process-wide OAuth bearer token cache, `spec.md` §4.5.
//!
//! Grounded in the teacher's single shared, lock-guarded cache cell
//! pattern (`ProviderCache`) and in `kalkiboru111-hive`'s
//! `Arc<RwLock<Option<MpesaToken>>>` token cache for this exact Daraja
//! OAuth flow.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

const EXPIRY_BUFFER_SECS: i64 = 30;
const MIN_TTL_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// A single cached bearer token, shared across all Daraja requests.
#[derive(Default)]
pub struct TokenCache {
    inner: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        TokenCache {
            inner: RwLock::new(None),
        }
    }

    /// Returns the cached token if it has not yet expired.
    pub async fn get(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard.as_ref().and_then(|t| {
            if t.expires_at > Utc::now() {
                Some(t.access_token.clone())
            } else {
                None
            }
        })
    }

    /// Stores a freshly obtained token. `expires_in_secs` is Daraja's
    /// `expires_in` field; the cached TTL is floored at 60s and given a
    /// 30s safety buffer before the real expiry.
    pub async fn set(&self, access_token: String, expires_in_secs: i64) {
        let ttl = (expires_in_secs - EXPIRY_BUFFER_SECS).max(MIN_TTL_SECS);
        let mut guard = self.inner.write().await;
        *guard = Some(CachedToken {
            access_token,
            expires_at: Utc::now() + Duration::seconds(ttl),
        });
    }

    /// Drops the cached token, forcing the next request to refresh.
    /// Called on a 401 from Daraja.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_token_is_returned() {
        let cache = TokenCache::new();
        cache.set("abc123".into(), 3600).await;
        assert_eq!(cache.get().await, Some("abc123".to_string()));
    }

    #[tokio::test]
    async fn invalidate_clears_the_cache() {
        let cache = TokenCache::new();
        cache.set("abc123".into(), 3600).await;
        cache.invalidate().await;
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn short_expiry_is_floored_at_sixty_seconds() {
        let cache = TokenCache::new();
        cache.set("abc123".into(), 10).await;
        // 10 - 30 would be negative; floored to 60s, so still valid now.
        assert_eq!(cache.get().await, Some("abc123".to_string()));
    }
}
