use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::kv::ExpiringKv;
use crate::token::{peek_expiry, unix_now};

/// TTL used when a token's own expiry cannot be read: 30 days.
pub const DEFAULT_REVOCATION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Revoked-token registry on top of an [`ExpiringKv`].
///
/// Fails open: when the backend is unavailable, `revoke` reports `false` and
/// `is_revoked` reports `false`. An outage of the revocation backend never
/// locks anyone out; revoked tokens stay usable until they expire naturally.
pub struct RevocationStore {
    kv: Arc<dyn ExpiringKv>,
}

impl RevocationStore {
    pub fn new(kv: Arc<dyn ExpiringKv>) -> Self {
        RevocationStore { kv }
    }

    fn key(token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("revoked:{}", hex)
    }

    /// Revoke `token` for `ttl`, or for its remaining lifetime when `None`.
    ///
    /// Returns whether the revocation is now in effect.
    pub async fn revoke(&self, token: &str, ttl: Option<Duration>) -> bool {
        if !self.kv.is_available().await {
            warn!("revocation backend unavailable; token stays valid until expiry");
            return false;
        }

        let ttl = match ttl {
            Some(ttl) => ttl,
            None => match peek_expiry(token) {
                Some(exp) => {
                    let remaining = exp - unix_now();
                    if remaining <= 0 {
                        // Already dead; nothing to remember.
                        return true;
                    }
                    Duration::from_secs(remaining as u64)
                }
                None => DEFAULT_REVOCATION_TTL,
            },
        };

        match self.kv.set_with_ttl(&Self::key(token), ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "revocation write failed");
                false
            }
        }
    }

    pub async fn is_revoked(&self, token: &str) -> bool {
        if !self.kv.is_available().await {
            return false;
        }
        match self.kv.exists(&Self::key(token)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "revocation lookup failed; treating token as not revoked");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::token::{Claims, TokenCodec};

    fn store() -> (Arc<MemoryKv>, RevocationStore) {
        let kv = Arc::new(MemoryKv::new());
        (kv.clone(), RevocationStore::new(kv))
    }

    #[tokio::test]
    async fn revoked_until_ttl() {
        let (_, store) = store();
        assert!(store.revoke("tok", Some(Duration::from_millis(50))).await);
        assert!(store.is_revoked("tok").await);
        assert!(!store.is_revoked("other").await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.is_revoked("tok").await);
    }

    #[tokio::test]
    async fn unavailable_backend_fails_open() {
        let (kv, store) = store();
        assert!(store.revoke("tok", None).await);

        kv.set_available(false);
        assert!(!store.is_revoked("tok").await);
        assert!(!store.revoke("tok2", None).await);

        kv.set_available(true);
        assert!(store.is_revoked("tok").await);
        assert!(!store.is_revoked("tok2").await);
    }

    #[tokio::test]
    async fn default_ttl_follows_token_expiry() {
        let (_, store) = store();
        let codec = TokenCodec::new("k");
        let short = codec.sign(&Claims::new("u", "driver", 2));
        assert!(store.revoke(&short, None).await);
        assert!(store.is_revoked(&short).await);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(!store.is_revoked(&short).await);
    }

    #[tokio::test]
    async fn expired_token_is_not_stored_and_outage_still_reports_false() {
        let (kv, store) = store();
        let codec = TokenCodec::new("k");
        let mut claims = Claims::new("u", "driver", 60);
        claims.exp = unix_now() - 10;
        let dead = codec.sign(&claims);

        kv.set_available(false);
        assert!(!store.revoke(&dead, None).await);

        kv.set_available(true);
        assert!(store.revoke(&dead, None).await);
        assert!(!store.is_revoked(&dead).await);
    }

    #[test]
    fn keys_do_not_embed_the_token() {
        let key = RevocationStore::key("secret-token");
        assert!(key.starts_with("revoked:"));
        assert!(!key.contains("secret-token"));
        assert_eq!(key.len(), "revoked:".len() + 64);
    }
}
