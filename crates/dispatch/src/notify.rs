//! Driver-facing notifications over the pub/sub transport.

use std::sync::Arc;

use async_trait::async_trait;
use lastmile_storage::now_rfc3339;
use lastmile_tracking::PubSub;
use serde::Serialize;
use tracing::debug;

use crate::error::NotifyError;

pub fn driver_channel(driver_id: &str) -> String {
    format!("driver:{}", driver_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    #[serde(rename_all = "camelCase")]
    Assignment {
        order_id: String,
        tracking_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DeliveryCompleted { order_id: String },
    #[serde(rename_all = "camelCase")]
    RouteUpdated { stop_count: usize, provider: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, driver_id: &str, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Publishes notifications on `driver:<id>`. Nobody listening is not an
/// error.
pub struct PubSubNotifier {
    transport: Arc<dyn PubSub>,
}

impl PubSubNotifier {
    pub fn new(transport: Arc<dyn PubSub>) -> Self {
        PubSubNotifier { transport }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    driver_id: &'a str,
    #[serde(flatten)]
    event: &'a NotificationEvent,
    sent_at: String,
}

#[async_trait]
impl Notifier for PubSubNotifier {
    async fn notify(&self, driver_id: &str, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&Envelope {
            driver_id,
            event,
            sent_at: now_rfc3339(),
        })
        .map_err(|e| NotifyError::Unavailable(e.to_string()))?;

        let receivers = self
            .transport
            .publish(&driver_channel(driver_id), payload)
            .await
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;
        debug!(driver_id, receivers, "driver notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lastmile_tracking::BroadcastHub;

    use super::*;

    #[tokio::test]
    async fn assignment_reaches_driver_channel() {
        let hub = Arc::new(BroadcastHub::new());
        let mut sub = hub.subscribe(&driver_channel("d1")).await.unwrap();
        let notifier = PubSubNotifier::new(hub.clone());

        notifier
            .notify(
                "d1",
                &NotificationEvent::Assignment {
                    order_id: "ord-1".into(),
                    tracking_url: None,
                },
            )
            .await
            .unwrap();

        let msg: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "assignment");
        assert_eq!(msg["orderId"], "ord-1");
        assert_eq!(msg["driverId"], "d1");
    }

    #[tokio::test]
    async fn outage_is_reported() {
        let hub = Arc::new(BroadcastHub::new());
        hub.set_available(false);
        let notifier = PubSubNotifier::new(hub);
        let err = notifier
            .notify("d1", &NotificationEvent::DeliveryCompleted { order_id: "o".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Unavailable(_)));
    }
}
