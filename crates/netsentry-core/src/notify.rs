// ── Notification channel ──
//
// Fire-and-forget fan-out to whoever is subscribed right now. Nothing is
// persisted or replayed; publishing with no subscribers is not an error.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

const NOTIFICATION_CHANNEL_SIZE: usize = 256;

pub mod topics {
    pub const DEVICE_DISCOVERED: &str = "device.discovered";
    pub const DEVICE_IDENTIFIED: &str = "device.identified";
    pub const DEVICE_ROLE_CHANGED: &str = "device.role_changed";
    pub const DEVICE_OFFLINE: &str = "device.offline";
    pub const DEVICE_ONLINE: &str = "device.online";
    pub const TRAFFIC_COLLECTED: &str = "traffic.collected";
    pub const WIRELESS_COLLECTED: &str = "wireless.collected";
    pub const ANOMALY_DETECTED: &str = "anomaly.detected";
    pub const JOB_FAILED: &str = "scheduler.job_failed";
}

/// Best-effort publisher.
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value);
}

/// Serialize `payload` and publish it, dropping values that fail to
/// serialize.
pub(crate) fn publish_json<T: Serialize>(notifier: &dyn Notifier, topic: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => notifier.publish(topic, value),
        Err(e) => trace!(topic, error = %e, "notification payload not serializable"),
    }
}

/// A published message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// `Notifier` backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Arc<Notification>>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Notification>> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: &str, payload: serde_json::Value) {
        // An error only means nobody is listening.
        let _ = self.tx.send(Arc::new(Notification {
            topic: topic.to_owned(),
            payload,
        }));
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn publish(&self, _topic: &str, _payload: serde_json::Value) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        BroadcastNotifier::new().publish(topics::DEVICE_OFFLINE, serde_json::json!({}));
    }

    #[test]
    fn subscribers_only_see_later_messages() {
        let notifier = BroadcastNotifier::new();
        notifier.publish("early", serde_json::json!(1));
        let mut rx = notifier.subscribe();
        notifier.publish("late", serde_json::json!(2));
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.topic, "late");
        assert!(rx.try_recv().is_err());
    }
}
