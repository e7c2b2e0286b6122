//! Event emission system.
//!
//! Events are pushed from the daemon to UI subscribers as JSON-RPC
//! notifications. Each subscriber has an independent buffer; a subscriber
//! that falls behind skips the events it missed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use streetpass_types::now_ms;
use tokio::sync::broadcast;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "NearbyChanged", "DaemonStarted").
    pub event_type: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// An event stamped with the current time.
    pub fn now(event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: now_ms(),
            payload,
        }
    }
}

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "session", "nearby", "interaction", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Exact event type names.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let event_category = categorize_event(&event.event_type);
            if !categories.iter().any(|c| c == event_category) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| *t == event.event_type) {
                return false;
            }
        }

        true
    }
}

/// Categorize an event type into a category.
fn categorize_event(event_type: &str) -> &'static str {
    match event_type {
        s if s.starts_with("Session") || s.starts_with("Identity") || s.starts_with("Profile") => {
            "session"
        }
        s if s.starts_with("Nearby") || s.starts_with("Encounter") => "nearby",
        s if s.starts_with("Interaction") => "interaction",
        _ => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> Event {
        Event {
            event_type: event_type.to_string(),
            timestamp: 1000,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(Event::now("DaemonStarted", serde_json::json!({"version": "0.1.0"})));

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, "DaemonStarted");
        assert!(event.timestamp > 0);
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_event_filter_categories() {
        let filter = EventFilter {
            categories: Some(vec!["nearby".to_string()]),
            event_types: None,
        };
        assert!(filter.matches(&event("NearbyChanged")));
        assert!(filter.matches(&event("EncounterRecorded")));
        assert!(!filter.matches(&event("InteractionReceived")));
    }

    #[test]
    fn test_event_filter_types() {
        let filter = EventFilter {
            categories: None,
            event_types: Some(vec!["SessionStateChanged".to_string()]),
        };
        assert!(filter.matches(&event("SessionStateChanged")));
        assert!(!filter.matches(&event("NearbyChanged")));
        assert!(EventFilter::default().matches(&event("Anything")));
    }

    #[test]
    fn test_categorize_event() {
        assert_eq!(categorize_event("SessionStateChanged"), "session");
        assert_eq!(categorize_event("IdentityChanged"), "session");
        assert_eq!(categorize_event("NearbyChanged"), "nearby");
        assert_eq!(categorize_event("EncounterRecorded"), "nearby");
        assert_eq!(categorize_event("InteractionReceived"), "interaction");
        assert_eq!(categorize_event("DaemonStarted"), "system");
    }
}
