//! Event emission seam.
//!
//! Layers publish [`GuardEvent`]s through [`EventPublisher`]. The transport is
//! external; [`BroadcastPublisher`] is the in-process adapter over a tokio
//! broadcast channel.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::GuardEvent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("no active subscribers for {event_type}")]
    NoSubscribers { event_type: String },
    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &GuardEvent) -> Result<(), PublishError>;
}

/// Publish and log on failure. Protective state is never rolled back because
/// a broadcast did not go out.
pub(crate) fn publish_or_warn(publisher: &dyn EventPublisher, event: &GuardEvent) -> Option<String> {
    match publisher.publish(event) {
        Ok(()) => None,
        Err(e) => {
            warn!(
                event_type = ?event.event_type,
                scope = %event.scope,
                error = %e,
                "guard event broadcast failed"
            );
            Some(e.to_string())
        }
    }
}

pub struct BroadcastPublisher {
    tx: broadcast::Sender<GuardEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<GuardEvent> {
        self.tx.clone()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &GuardEvent) -> Result<(), PublishError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers {
                event_type: format!("{:?}", event.event_type),
            })
    }
}

/// Keeps every published event in memory. Used for dry runs.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<GuardEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &GuardEvent) -> Result<(), PublishError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GuardEventType;
    use chrono::Utc;
    use grd_audit::Severity;

    fn ev() -> GuardEvent {
        GuardEvent::new(
            GuardEventType::EmergencyKill,
            Utc::now(),
            "GLOBAL",
            Severity::Critical,
            "HALT ALL TRADING",
        )
    }

    #[test]
    fn broadcast_without_subscribers_is_an_error() {
        let bus = BroadcastPublisher::new(8);
        assert!(matches!(
            bus.publish(&ev()),
            Err(PublishError::NoSubscribers { .. })
        ));
    }

    #[test]
    fn broadcast_reaches_subscriber() {
        let bus = BroadcastPublisher::new(8);
        let mut rx = bus.subscribe();
        bus.publish(&ev()).unwrap();
        let got = rx.try_recv().unwrap();
        assert_eq!(got.event_type, GuardEventType::EmergencyKill);
    }

    #[test]
    fn recording_publisher_keeps_order() {
        let rec = RecordingPublisher::new();
        rec.publish(&ev()).unwrap();
        rec.publish(&ev().with_loss_pct(0.2)).unwrap();
        let all = rec.events();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].loss_pct, Some(0.2));
    }
}
