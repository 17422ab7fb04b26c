//! Live position fan-out with snapshot-on-subscribe and heartbeats.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use lastmile_storage::{now_rfc3339, PositionRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::ledger::PositionLedger;
use crate::pubsub::{PubSub, Subscription};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

pub fn delivery_channel(delivery_id: &str) -> String {
    format!("delivery:{}", delivery_id)
}

/// The wire form of a position on the bus and on subscriber streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePosition {
    /// Stored id; absent when persistence failed.
    pub id: Option<i64>,
    pub delivery_id: String,
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub observed_at: String,
    pub persisted: bool,
}

impl From<&PositionRecord> for LivePosition {
    fn from(r: &PositionRecord) -> Self {
        LivePosition {
            id: Some(r.id),
            delivery_id: r.delivery_id.clone(),
            driver_id: r.driver_id.clone(),
            lat: r.lat,
            lng: r.lng,
            speed: r.speed,
            heading: r.heading,
            observed_at: r.observed_at.clone(),
            persisted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Position(LivePosition),
    /// Emitted on a fixed interval so idle streams are distinguishable from
    /// dead ones. Carries the server time (RFC 3339).
    Heartbeat(String),
}

pub type PositionStream = Pin<Box<dyn Stream<Item = BusEvent> + Send>>;

/// Counts live subscriber streams; decremented when a stream is dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Step {
    Heartbeat,
    Message(Result<String, RecvError>),
}

/// One logical channel per delivery on a [`PubSub`] transport.
pub struct LivePositionBus {
    transport: Arc<dyn PubSub>,
    ledger: Arc<PositionLedger>,
    heartbeat: Duration,
    active: Arc<AtomicUsize>,
}

impl LivePositionBus {
    pub fn new(transport: Arc<dyn PubSub>, ledger: Arc<PositionLedger>) -> Self {
        LivePositionBus {
            transport,
            ledger,
            heartbeat: DEFAULT_HEARTBEAT,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Number of subscriber streams not yet dropped.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Best-effort publish. Returns whether the transport accepted it.
    pub async fn publish(&self, delivery_id: &str, position: &LivePosition) -> bool {
        let payload = match serde_json::to_string(position) {
            Ok(p) => p,
            Err(e) => {
                warn!(delivery_id, error = %e, "position not serializable; skipped publish");
                return false;
            }
        };
        match self
            .transport
            .publish(&delivery_channel(delivery_id), payload)
            .await
        {
            Ok(receivers) => {
                debug!(delivery_id, receivers, "position published");
                true
            }
            Err(e) => {
                warn!(delivery_id, error = %e, "position publish degraded");
                false
            }
        }
    }

    /// Open a subscriber stream: the latest stored sample (if any), then
    /// every published sample in order, interleaved with heartbeats.
    ///
    /// Never fails. Without a transport the stream carries the snapshot and
    /// heartbeats only. Dropping the stream releases the transport
    /// subscription and the heartbeat timer.
    pub async fn subscribe(&self, delivery_id: &str) -> PositionStream {
        let guard = ActiveGuard::new(&self.active);

        // Subscribe before reading the snapshot so nothing published in
        // between is lost.
        let subscription = match self.transport.subscribe(&delivery_channel(delivery_id)).await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(delivery_id, error = %e, "live transport unavailable; heartbeat-only stream");
                None
            }
        };

        let snapshot = match self.ledger.latest(delivery_id).await {
            Ok(latest) => latest.as_ref().map(LivePosition::from),
            Err(e) => {
                warn!(delivery_id, error = %e, "snapshot read failed");
                None
            }
        };

        let period = self.heartbeat;
        let delivery_id = delivery_id.to_string();

        Box::pin(async_stream::stream! {
            let _guard = guard;
            let mut subscription: Option<Subscription> = subscription;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let snapshot_id = snapshot.as_ref().and_then(|s| s.id);
            if let Some(s) = snapshot {
                yield BusEvent::Position(s);
            }

            loop {
                let step = tokio::select! {
                    _ = ticker.tick() => Step::Heartbeat,
                    msg = next_message(&mut subscription) => Step::Message(msg),
                };

                match step {
                    Step::Heartbeat => yield BusEvent::Heartbeat(now_rfc3339()),
                    Step::Message(Ok(payload)) => {
                        match serde_json::from_str::<LivePosition>(&payload) {
                            // Already delivered as the snapshot.
                            Ok(p) if p.id.is_some() && p.id == snapshot_id => {}
                            Ok(p) => yield BusEvent::Position(p),
                            Err(e) => warn!(%delivery_id, error = %e, "undecodable bus payload"),
                        }
                    }
                    Step::Message(Err(RecvError::Lagged(missed))) => {
                        warn!(%delivery_id, missed, "subscriber lagged; skipped samples");
                    }
                    Step::Message(Err(RecvError::Closed)) => {
                        warn!(%delivery_id, "live channel closed; continuing with heartbeats");
                        subscription = None;
                    }
                }
            }
        })
    }
}

async fn next_message(subscription: &mut Option<Subscription>) -> Result<String, RecvError> {
    match subscription {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
