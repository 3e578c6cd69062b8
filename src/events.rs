//! Event fan-out to observers (dashboards, log sinks)
//!
//! Broadcasting is fire-and-forget from the orchestrator's point of view: a
//! failed broadcast is logged by the caller and never affects healing.

use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::ServiceEvent;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("event channel closed")]
    Closed,

    #[error("broadcast transport failed: {0}")]
    Transport(String),
}

/// Sink for service status events
pub trait EventBroadcaster: Send + Sync {
    /// Deliver `event` to every current subscriber, returning how many received it.
    fn broadcast(&self, event: &ServiceEvent) -> Result<usize, BroadcastError>;
}

// ============================================================================
// Channel broadcaster
// ============================================================================

/// tokio broadcast channel. Slow subscribers lag and skip old events.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<ServiceEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventBroadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: &ServiceEvent) -> Result<usize, BroadcastError> {
        // No subscribers yet is not an error
        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }
        self.sender
            .send(event.clone())
            .map_err(|_| BroadcastError::Closed)
    }
}

// ============================================================================
// Recording broadcaster
// ============================================================================

/// Keeps every event in memory. Used by tests and the simulate mode.
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<ServiceEvent>>,
    fail: Mutex<bool>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages of events for one service, oldest first
    pub fn messages_for(&self, service: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.data.name == service)
            .map(|e| e.message)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Make every subsequent broadcast fail
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

impl EventBroadcaster for RecordingBroadcaster {
    fn broadcast(&self, event: &ServiceEvent) -> Result<usize, BroadcastError> {
        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(BroadcastError::Transport("recording broadcaster set to fail".to_string()));
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ManagedService, ServiceCategory, ServiceConfig, ServiceView};
    use chrono::Utc;

    fn event(message: &str) -> ServiceEvent {
        let config = ServiceConfig::new("Redis", ServiceCategory::Infrastructure, 6379);
        let svc = ManagedService::from_config("redis", &config);
        ServiceEvent::service_status(ServiceView::from_service(&svc, Utc::now()), message)
    }

    #[test]
    fn channel_without_subscribers_is_ok() {
        let b = ChannelBroadcaster::new(8);
        assert_eq!(b.broadcast(&event("discovered")).unwrap(), 0);
    }

    #[tokio::test]
    async fn channel_delivers_to_subscribers() {
        let b = ChannelBroadcaster::new(8);
        let mut rx1 = b.subscribe();
        let mut rx2 = b.subscribe();
        assert_eq!(b.subscriber_count(), 2);

        assert_eq!(b.broadcast(&event("restarted")).unwrap(), 2);
        assert_eq!(rx1.recv().await.unwrap().message, "restarted");
        assert_eq!(rx2.recv().await.unwrap().data.name, "redis");
    }

    #[test]
    fn recording_broadcaster() {
        let b = RecordingBroadcaster::new();
        b.broadcast(&event("a")).unwrap();
        b.broadcast(&event("b")).unwrap();
        assert_eq!(b.messages_for("redis"), vec!["a", "b"]);
        assert!(b.messages_for("postgres").is_empty());

        b.set_failing(true);
        assert!(b.broadcast(&event("c")).is_err());
        assert_eq!(b.events().len(), 2);

        b.clear();
        assert!(b.events().is_empty());
    }
}
