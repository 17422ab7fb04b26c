//! Pub/sub transport seam and the in-process broadcast hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::TransportError;

/// Per-channel buffer. A subscriber that falls further behind than this skips
/// ahead and is told how many messages it missed.
const CHANNEL_CAPACITY: usize = 256;

/// A channel-oriented fan-out transport. Payloads are serialized JSON.
///
/// Publish order on one channel is preserved for every subscriber of that
/// channel. Nothing is promised across channels.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Returns the number of subscribers the message was handed to.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, TransportError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError>;
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    // Field order matters: the receiver must be gone before `release` runs so
    // the hub sees the true receiver count.
    rx: broadcast::Receiver<String>,
    _release: Release,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<String>, on_drop: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            rx,
            _release: Release(Some(Box::new(on_drop))),
        }
    }

    pub async fn recv(&mut self) -> Result<String, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

struct Release(Option<Box<dyn FnOnce() + Send>>);

impl Drop for Release {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

type Channels = HashMap<String, broadcast::Sender<String>>;

/// In-process transport: one `tokio::sync::broadcast` channel per name.
///
/// Channels are created on first subscribe and removed when their last
/// subscriber leaves. The availability switch simulates a transport outage;
/// unsubscribing works regardless of it.
pub struct BroadcastHub {
    channels: Arc<Mutex<Channels>>,
    available: AtomicBool,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        BroadcastHub {
            channels: Arc::new(Mutex::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.channels)
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable)
        }
    }
}

fn lock(channels: &Mutex<Channels>) -> std::sync::MutexGuard<'_, Channels> {
    // A panic while holding the lock cannot leave the map half-updated.
    channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PubSub for BroadcastHub {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, TransportError> {
        self.check()?;
        let channels = lock(&self.channels);
        match channels.get(channel) {
            // `send` only fails when there are no receivers.
            Some(tx) => Ok(tx.send(payload).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        self.check()?;
        let rx = lock(&self.channels)
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let channels = Arc::clone(&self.channels);
        let name = channel.to_string();
        Ok(Subscription::new(rx, move || {
            let mut channels = lock(&channels);
            if channels
                .get(&name)
                .is_some_and(|tx| tx.receiver_count() == 0)
            {
                channels.remove(&name);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_preserves_order() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe("delivery:1").await.unwrap();
        let mut b = hub.subscribe("delivery:1").await.unwrap();

        for i in 0..3 {
            assert_eq!(hub.publish("delivery:1", i.to_string()).await.unwrap(), 2);
        }
        for sub in [&mut a, &mut b] {
            for i in 0..3 {
                assert_eq!(sub.recv().await.unwrap(), i.to_string());
            }
        }
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = BroadcastHub::new();
        let mut one = hub.subscribe("delivery:1").await.unwrap();
        let _two = hub.subscribe("delivery:2").await.unwrap();
        hub.publish("delivery:2", "x".into()).await.unwrap();
        hub.publish("delivery:1", "y".into()).await.unwrap();
        assert_eq!(one.recv().await.unwrap(), "y");
    }

    #[tokio::test]
    async fn last_drop_removes_channel() {
        let hub = BroadcastHub::new();
        let a = hub.subscribe("c").await.unwrap();
        let b = hub.subscribe("c").await.unwrap();
        assert_eq!(hub.subscriber_count("c"), 2);
        drop(a);
        assert_eq!(hub.subscriber_count("c"), 1);
        assert_eq!(hub.channel_count(), 1);
        drop(b);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_works_during_outage() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe("c").await.unwrap();
        hub.set_available(false);
        assert!(matches!(
            hub.publish("c", "x".into()).await,
            Err(TransportError::Unavailable)
        ));
        drop(sub);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.publish("nobody", "x".into()).await.unwrap(), 0);
    }
}
