use std::sync::Arc;

use tracing::warn;

use crate::error::{AuthError, VerifyError};
use crate::policy::RoutePolicy;
use crate::principal::Principal;
use crate::revocation::RevocationStore;
use crate::verifier::IdentityVerifier;

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Public route; nobody was verified.
    Public,
    /// A verified, unrevoked principal that satisfies the route's roles.
    Granted(Principal),
    /// Verification failed on a non-privileged route; the sandbox principal
    /// stands in.
    Demo(Principal),
}

impl Access {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Access::Public => None,
            Access::Granted(p) | Access::Demo(p) => Some(p),
        }
    }
}

/// Extract the token from an `Authorization` header value. The scheme match
/// is case-insensitive; empty tokens count as absent.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Per-request access decisions.
///
/// Privileged routes fail closed. Driver-facing routes fail open to the
/// sandbox principal when `demo_fallback` is on. Revocation and role checks
/// apply only to real principals.
pub struct AccessEnforcer {
    verifier: Arc<IdentityVerifier>,
    revocations: Arc<RevocationStore>,
    demo_fallback: bool,
}

impl AccessEnforcer {
    pub fn new(verifier: Arc<IdentityVerifier>, revocations: Arc<RevocationStore>) -> Self {
        AccessEnforcer {
            verifier,
            revocations,
            demo_fallback: true,
        }
    }

    /// Turn the sandbox substitution off, making every route fail closed.
    pub fn with_demo_fallback(mut self, enabled: bool) -> Self {
        self.demo_fallback = enabled;
        self
    }

    pub fn revocations(&self) -> &RevocationStore {
        &self.revocations
    }

    pub async fn authorize(
        &self,
        token: Option<&str>,
        policy: &RoutePolicy,
    ) -> Result<Access, AuthError> {
        if policy.public {
            return Ok(Access::Public);
        }

        let verified = match token {
            Some(t) => self.verifier.verify(t).await.map(|p| (t, p)),
            None => Err(VerifyError::Malformed("missing bearer token".into())),
        };

        let (token, principal) = match verified {
            Ok(ok) => ok,
            Err(e) if policy.is_privileged() || !self.demo_fallback => {
                return Err(e.into());
            }
            Err(e) => {
                warn!(reason = %e, "verification failed on driver route; using sandbox principal");
                return Ok(Access::Demo(Principal::demo()));
            }
        };

        if self.revocations.is_revoked(token).await {
            return Err(AuthError::Unauthorized("token revoked".into()));
        }

        if !policy.admits(principal.role) {
            return Err(AuthError::Forbidden(format!(
                "role '{}' may not use this route",
                principal.role
            )));
        }

        Ok(Access::Granted(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::principal::{Role, DEMO_SUBJECT};
    use crate::token::{Claims, TokenCodec};

    struct Fixture {
        kv: Arc<MemoryKv>,
        enforcer: AccessEnforcer,
        codec: TokenCodec,
    }

    fn fixture() -> Fixture {
        let codec = TokenCodec::new("enforcer-secret");
        let kv = Arc::new(MemoryKv::new());
        let enforcer = AccessEnforcer::new(
            Arc::new(IdentityVerifier::new(codec.clone())),
            Arc::new(RevocationStore::new(kv.clone())),
        );
        Fixture { kv, enforcer, codec }
    }

    fn admin_route() -> RoutePolicy {
        RoutePolicy::roles(&[Role::Admin, Role::Dispatcher])
    }

    fn driver_route() -> RoutePolicy {
        RoutePolicy::roles(&[Role::Driver])
    }

    #[tokio::test]
    async fn public_route_skips_verification() {
        let f = fixture();
        let access = f
            .enforcer
            .authorize(Some("garbage"), &RoutePolicy::public())
            .await
            .unwrap();
        assert_eq!(access, Access::Public);
    }

    #[tokio::test]
    async fn privileged_route_rejects_bad_token_without_fallback() {
        let f = fixture();
        let mut claims = Claims::new("adm-1", "admin", 60);
        claims.exp = claims.iat - 5;
        let expired = f.codec.sign(&claims);

        let err = f
            .enforcer
            .authorize(Some(&expired), &admin_route())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Expired);
        assert_eq!(err.status_code(), 401);

        let err = f.enforcer.authorize(None, &admin_route()).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn driver_route_without_token_gets_sandbox_principal() {
        let f = fixture();
        let access = f.enforcer.authorize(None, &driver_route()).await.unwrap();
        match access {
            Access::Demo(p) => {
                assert_eq!(p.subject_id, DEMO_SUBJECT);
                assert_eq!(p.role, Role::Driver);
                assert!(p.demo);
            }
            other => panic!("expected demo access, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn demo_fallback_can_be_disabled() {
        let f = fixture();
        let enforcer = f.enforcer.with_demo_fallback(false);
        assert!(enforcer.authorize(None, &driver_route()).await.is_err());
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_on_any_route() {
        let f = fixture();
        let token = f.codec.sign(&Claims::new("drv-1", "driver", 600));
        assert!(f.enforcer.revocations().revoke(&token, None).await);

        for policy in [driver_route(), RoutePolicy::authenticated()] {
            let err = f
                .enforcer
                .authorize(Some(&token), &policy)
                .await
                .unwrap_err();
            assert_eq!(err, AuthError::Unauthorized("token revoked".into()));
        }
    }

    #[tokio::test]
    async fn revocation_outage_does_not_lock_users_out() {
        let f = fixture();
        let token = f.codec.sign(&Claims::new("drv-1", "driver", 600));
        assert!(f.enforcer.revocations().revoke(&token, None).await);
        f.kv.set_available(false);
        assert!(matches!(
            f.enforcer.authorize(Some(&token), &driver_route()).await,
            Ok(Access::Granted(_))
        ));
    }

    #[tokio::test]
    async fn wrong_role_is_forbidden() {
        let f = fixture();
        let token = f.codec.sign(&Claims::new("drv-1", "driver", 600));
        let err = f
            .enforcer
            .authorize(Some(&token), &admin_route())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn matching_role_is_granted() {
        let f = fixture();
        let token = f.codec.sign(&Claims::new("dsp-1", "dispatcher", 600));
        let access = f
            .enforcer
            .authorize(Some(&token), &admin_route())
            .await
            .unwrap();
        let p = access.principal().unwrap();
        assert_eq!(p.role, Role::Dispatcher);
        assert!(!p.demo);
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }
}
