use std::sync::Arc;

use tracing::debug;

use crate::enrichment::{DecryptedPayload, IdentityEnricher};
use crate::error::VerifyError;
use crate::principal::{Principal, Role};
use crate::token::{Claims, TokenCodec};

/// Turns a raw bearer token into a [`Principal`].
///
/// Local signature/expiry verification is authoritative. Enrichment is
/// best-effort: whatever goes wrong there, `verify` still answers from the
/// signed payload alone.
pub struct IdentityVerifier {
    codec: TokenCodec,
    enricher: Option<Arc<dyn IdentityEnricher>>,
}

impl IdentityVerifier {
    pub fn new(codec: TokenCodec) -> Self {
        IdentityVerifier {
            codec,
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn IdentityEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn verify(&self, raw_token: &str) -> Result<Principal, VerifyError> {
        let claims = self.codec.verify(raw_token)?;
        let signed_role = Role::parse(&claims.role)
            .ok_or_else(|| VerifyError::Malformed(format!("unknown role '{}'", claims.role)))?;

        let decrypted = match &self.enricher {
            Some(enricher) => match enricher.decrypt(raw_token).await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(subject = %claims.sub, error = %e, "identity enrichment degraded");
                    DecryptedPayload::default()
                }
            },
            None => DecryptedPayload::default(),
        };

        Ok(merge(&claims, signed_role, decrypted))
    }
}

/// Field-by-field merge; decrypted values win when present.
fn merge(claims: &Claims, signed_role: Role, decrypted: DecryptedPayload) -> Principal {
    let subject_id = decrypted.user_id.unwrap_or_else(|| claims.sub.clone());
    let role = decrypted
        .role
        .as_deref()
        .and_then(Role::parse)
        .unwrap_or(signed_role);
    let is_admin = decrypted
        .is_admin
        .or(claims.is_admin)
        .unwrap_or(role == Role::Admin);

    let driver_id = match role {
        Role::Driver => Some(
            decrypted
                .driver_id
                .or_else(|| claims.driver_id.clone())
                .unwrap_or_else(|| subject_id.clone()),
        ),
        _ => None,
    };
    let admin_id = match role {
        Role::Admin => Some(
            decrypted
                .admin_id
                .or_else(|| claims.admin_id.clone())
                .unwrap_or_else(|| subject_id.clone()),
        ),
        _ => None,
    };

    Principal {
        subject_id,
        role,
        driver_id,
        admin_id,
        is_admin,
        phone: decrypted.phone.or_else(|| claims.phone.clone()),
        username: decrypted.username.or_else(|| claims.username.clone()),
        demo: false,
    }
}
