use std::sync::Arc;

use lastmile_storage::{now_rfc3339, NewPositionSample, PositionRecord, PositionStore};
use serde::Deserialize;

use crate::error::LedgerError;

/// A position sample as received from a driver client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInput {
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    /// Client timestamp; the server receive time is used when absent.
    #[serde(default, alias = "ts")]
    pub observed_at: Option<String>,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

impl PositionInput {
    fn validate(&self) -> Result<(), LedgerError> {
        if self.driver_id.trim().is_empty() {
            return Err(LedgerError::InvalidSample("driverId is required".into()));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(LedgerError::InvalidSample(format!("lat out of range: {}", self.lat)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(LedgerError::InvalidSample(format!("lng out of range: {}", self.lng)));
        }
        for (name, v) in [("speed", self.speed), ("heading", self.heading)] {
            if v.is_some_and(|v| !v.is_finite()) {
                return Err(LedgerError::InvalidSample(format!("{} must be finite", name)));
            }
        }
        Ok(())
    }
}

/// A stored sample plus whether it was an idempotent replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sample: PositionRecord,
    pub duplicate: bool,
}

/// Append-only record of position samples per delivery.
///
/// Persistence is not best-effort here: storage failures come back as
/// [`LedgerError::Persistence`]. Deciding whether to hide that from a client
/// is the caller's business.
pub struct PositionLedger {
    store: Arc<dyn PositionStore>,
}

impl PositionLedger {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        PositionLedger { store }
    }

    pub async fn record(
        &self,
        delivery_id: &str,
        input: PositionInput,
    ) -> Result<Recorded, LedgerError> {
        if delivery_id.trim().is_empty() {
            return Err(LedgerError::InvalidSample("deliveryId is required".into()));
        }
        input.validate()?;

        let write = self
            .store
            .insert_or_get(NewPositionSample {
                delivery_id: delivery_id.to_string(),
                driver_id: input.driver_id,
                lat: input.lat,
                lng: input.lng,
                speed: input.speed,
                heading: input.heading,
                observed_at: input.observed_at.unwrap_or_else(now_rfc3339),
                idempotency_key: input.idempotency_key,
            })
            .await?;

        Ok(Recorded {
            sample: write.record,
            duplicate: write.duplicate,
        })
    }

    /// Last `n` samples by arrival, newest first.
    pub async fn most_recent(
        &self,
        delivery_id: &str,
        n: usize,
    ) -> Result<Vec<PositionRecord>, LedgerError> {
        Ok(self.store.most_recent(delivery_id, n).await?)
    }

    pub async fn latest(&self, delivery_id: &str) -> Result<Option<PositionRecord>, LedgerError> {
        Ok(self.most_recent(delivery_id, 1).await?.into_iter().next())
    }
}
