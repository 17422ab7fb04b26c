//! Identity enrichment: exchanging a bearer token for a decrypted identity
//! payload at an external service.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime, bounded by both the agent's global timeout and
//! a `tokio::time::timeout` around the blocking task.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EnrichmentError;

/// Fields an enrichment service may return. Every field is optional; present
/// fields override the locally signed ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptedPayload {
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub admin_id: Option<String>,
    pub driver_id: Option<String>,
    pub is_admin: Option<bool>,
}

impl DecryptedPayload {
    /// Parse a response body. The user id is taken from the first of
    /// `userId`, `user_id`, `id`, `sub` that is present; string and numeric
    /// ids are both accepted.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EnrichmentError> {
        let obj = value
            .as_object()
            .ok_or_else(|| EnrichmentError::BadBody("expected a JSON object".into()))?;

        let user_id = ["userId", "user_id", "id", "sub"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(id_string));

        Ok(DecryptedPayload {
            user_id,
            role: str_field(obj, "role"),
            phone: str_field(obj, "phone"),
            username: str_field(obj, "username"),
            admin_id: obj.get("adminId").and_then(id_string),
            driver_id: obj.get("driverId").and_then(id_string),
            is_admin: obj.get("isAdmin").and_then(|v| v.as_bool()),
        })
    }
}

fn id_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Resolves a token into a decrypted identity payload.
#[async_trait]
pub trait IdentityEnricher: Send + Sync {
    async fn decrypt(&self, token: &str) -> Result<DecryptedPayload, EnrichmentError>;
}

/// Enricher that POSTs `{"token": ...}` to a decrypt endpoint.
pub struct HttpEnricher {
    url: String,
    timeout: Duration,
}

impl HttpEnricher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        HttpEnricher {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl IdentityEnricher for HttpEnricher {
    async fn decrypt(&self, token: &str) -> Result<DecryptedPayload, EnrichmentError> {
        let url = self.url.clone();
        let body = serde_json::json!({ "token": token });
        let timeout = self.timeout;

        let task = tokio::task::spawn_blocking(move || {
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .build()
                .into();

            let response = agent
                .post(&url)
                .send_json(&body)
                .map_err(|e| EnrichmentError::Request(e.to_string()))?;

            let value: serde_json::Value = response
                .into_body()
                .read_json()
                .map_err(|e| EnrichmentError::BadBody(e.to_string()))?;

            DecryptedPayload::from_json(&value)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EnrichmentError::Request(format!("task join error: {}", join))),
            Err(_) => Err(EnrichmentError::Timeout(timeout)),
        }
    }
}
