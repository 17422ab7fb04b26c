//! Compact HS256 bearer tokens.
//!
//! Layout is the usual `header.payload.signature`, each part base64url
//! without padding, signed with HMAC-SHA256 over `header.payload`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::VerifyError;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Locally signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl Claims {
    /// Claims for `sub` with `role`, valid for `ttl_secs` from now.
    pub fn new(sub: impl Into<String>, role: impl Into<String>, ttl_secs: i64) -> Self {
        let iat = unix_now();
        Claims {
            sub: sub.into(),
            role: role.into(),
            exp: iat + ttl_secs,
            iat,
            driver_id: None,
            admin_id: None,
            phone: None,
            username: None,
            is_admin: None,
        }
    }
}

/// Signs and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        TokenCodec {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC-SHA256 accepts keys of any size")
    }

    pub fn sign(&self, claims: &Claims) -> String {
        let header = URL_SAFE_NO_PAD.encode(HEADER);
        // Claims is plain data; serialization cannot fail.
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
        let signing_input = format!("{}.{}", header, payload);

        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature)
    }

    /// Verify signature, then expiry against `now` (unix seconds).
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, VerifyError> {
        let (signing_input, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| VerifyError::Malformed("expected three segments".into()))?;
        let (header, payload) = signing_input
            .split_once('.')
            .ok_or_else(|| VerifyError::Malformed("expected three segments".into()))?;
        if payload.contains('.') {
            return Err(VerifyError::Malformed("expected three segments".into()));
        }

        let header: serde_json::Value = decode_segment(header, "header")?;
        if header.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
            return Err(VerifyError::Malformed("unsupported alg".into()));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| VerifyError::Malformed(format!("signature encoding: {}", e)))?;
        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| VerifyError::Malformed("signature mismatch".into()))?;

        let claims: Claims = decode_segment(payload, "payload")?;
        if claims.exp <= now {
            return Err(VerifyError::Expired);
        }
        Ok(claims)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        self.verify_at(token, unix_now())
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, VerifyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerifyError::Malformed(format!("{} encoding: {}", what, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::Malformed(format!("{} json: {}", what, e)))
}

/// Read `exp` without checking the signature. Used only to size revocation
/// entries, never to make an access decision.
pub(crate) fn peek_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("exp").and_then(|v| v.as_i64())
}
