use std::sync::Arc;

use lastmile_storage::now_rfc3339;
use tracing::error;

use crate::bus::{LivePosition, LivePositionBus};
use crate::error::LedgerError;
use crate::ledger::{PositionInput, PositionLedger};

/// Result of one accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub position: LivePosition,
    /// An idempotent replay of an earlier submission; not republished.
    pub duplicate: bool,
    pub published: bool,
}

/// Ingestion path: persist, then publish.
pub struct Tracker {
    ledger: Arc<PositionLedger>,
    bus: Arc<LivePositionBus>,
}

impl Tracker {
    pub fn new(ledger: Arc<PositionLedger>, bus: Arc<LivePositionBus>) -> Self {
        Tracker { ledger, bus }
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn bus(&self) -> &Arc<LivePositionBus> {
        &self.bus
    }

    /// Record a sample and fan it out.
    ///
    /// When persistence fails the sample is still published (marked
    /// `persisted: false`) so live observers keep moving, and the
    /// persistence error is returned.
    pub async fn submit(
        &self,
        delivery_id: &str,
        input: PositionInput,
    ) -> Result<Submission, LedgerError> {
        match self.ledger.record(delivery_id, input.clone()).await {
            Ok(recorded) => {
                let position = LivePosition::from(&recorded.sample);
                let published = if recorded.duplicate {
                    false
                } else {
                    self.bus.publish(delivery_id, &position).await
                };
                Ok(Submission {
                    position,
                    duplicate: recorded.duplicate,
                    published,
                })
            }
            Err(LedgerError::Persistence(e)) => {
                error!(delivery_id, driver_id = %input.driver_id, error = %e, persisted = false,
                    "position persistence lost");
                let position = LivePosition {
                    id: None,
                    delivery_id: delivery_id.to_string(),
                    driver_id: input.driver_id,
                    lat: input.lat,
                    lng: input.lng,
                    speed: input.speed,
                    heading: input.heading,
                    observed_at: input.observed_at.unwrap_or_else(now_rfc3339),
                    persisted: false,
                };
                self.bus.publish(delivery_id, &position).await;
                Err(LedgerError::Persistence(e))
            }
            Err(e) => Err(e),
        }
    }
}
