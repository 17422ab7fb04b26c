//! Authentication and authorization for lastmile.
//!
//! - [`IdentityVerifier`] checks a bearer token locally and enriches it via an
//!   optional decryption service.
//! - [`RevocationStore`] remembers revoked tokens in an expiring key/value
//!   backend and fails open when that backend is down.
//! - [`AccessEnforcer`] combines both with a per-route [`RoutePolicy`].

mod enforcer;
mod enrichment;
mod error;
mod kv;
mod policy;
mod principal;
mod revocation;
mod token;
mod verifier;

pub use enforcer::{bearer_token, Access, AccessEnforcer};
pub use enrichment::{DecryptedPayload, HttpEnricher, IdentityEnricher};
pub use error::{AuthError, EnrichmentError, KvError, VerifyError};
pub use kv::{ExpiringKv, MemoryKv};
pub use policy::{PolicyTable, RoutePolicy};
pub use principal::{Principal, Role, DEMO_SUBJECT};
pub use revocation::{RevocationStore, DEFAULT_REVOCATION_TTL};
pub use token::{unix_now, Claims, TokenCodec};
pub use verifier::IdentityVerifier;
