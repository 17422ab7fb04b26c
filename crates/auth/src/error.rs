/// Local token verification failures. These are authoritative.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("token expired")]
    Expired,

    /// Bad structure, bad encoding, bad signature, or an unknown role.
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Failures of the identity enrichment call. Never surfaced past the verifier.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("enrichment timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("enrichment request failed: {0}")]
    Request(String),

    #[error("enrichment response was not a usable payload: {0}")]
    BadBody(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key/value backend unavailable")]
    Unavailable,

    #[error("key/value backend error: {0}")]
    Backend(String),
}

/// Per-request authorization outcome errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl AuthError {
    /// The HTTP status this rejection maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Forbidden(_) => 403,
            _ => 401,
        }
    }
}

impl From<VerifyError> for AuthError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::Expired => AuthError::Expired,
            VerifyError::Malformed(reason) => AuthError::Malformed(reason),
        }
    }
}
