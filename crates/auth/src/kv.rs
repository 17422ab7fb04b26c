//! Expiring key/value backend seam for the revocation store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::KvError;

/// A volatile key/value service with native per-key expiry.
///
/// Callers check `is_available` before each operation; implementations may
/// still fail mid-operation.
#[async_trait]
pub trait ExpiringKv: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Store `key`; it disappears on its own after `ttl`.
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;
}

/// In-process backend with lazy expiry and an availability switch.
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Instant>>,
    available: AtomicBool,
}

impl Default for MemoryKv {
    fn default() -> Self {
        MemoryKv {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away or coming back. Entries survive an
    /// outage, as they would on a restarted replica with persistence.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), KvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable)
        }
    }
}

#[async_trait]
impl ExpiringKv for MemoryKv {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, deadline| *deadline > now);
        entries.insert(key.to_string(), now + ttl);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(deadline) if *deadline > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
