//! Event bus for run observability
//!
//! Provides pub/sub messaging using Tokio broadcast channels with
//! optional persistence to RocksDB for event replay.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::RunEvent;
use crate::state::SharedRunStore;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Failed to persist event: {0}")]
    PersistFailed(String),
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels and optional persistence
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<RunEvent>,

    /// Optional run store for event persistence
    store: Option<SharedRunStore>,

    /// Whether to persist events
    persist_events: bool,
}

impl EventBus {
    /// Create a new event bus without persistence
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store: None,
            persist_events: false,
        }
    }

    /// Create an event bus with persistence enabled
    pub fn with_persistence(store: SharedRunStore) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store: Some(store),
            persist_events: true,
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Enable or disable event persistence
    pub fn set_persist_events(&mut self, persist: bool) {
        self.persist_events = persist;
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: RunEvent) -> EventBusResult<()> {
        let event_type = event.event_type();

        // Persist if enabled
        if self.persist_events {
            if let Some(store) = &self.store {
                let event_id = RunEvent::new_id();
                let timestamp_nanos = event.timestamp().timestamp_nanos_opt().unwrap_or(0);

                if let Err(e) = store.put_event(event.run_id(), timestamp_nanos, &event_id, &event)
                {
                    warn!(event_type, "Failed to persist event: {}", e);
                    return Err(EventBusError::PersistFailed(e.to_string()));
                }
                debug!(event_type, event_id, "Event persisted");
            }
        }

        // Broadcast to subscribers (ignore if no receivers)
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                Ok(())
            }
            Err(_) => {
                // No receivers is OK - we still persisted
                debug!(event_type, "Event published (no receivers)");
                Ok(())
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    /// Filter by run ID
    pub run_id: Option<String>,
    /// Filter by round number
    pub round: Option<u32>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self {
            run_id: None,
            round: None,
            event_types: None,
        }
    }

    /// Filter by run ID
    pub fn run(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    /// Filter by round number
    pub fn round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &RunEvent) -> bool {
        // Check run filter
        if let Some(ref rid) = self.run_id {
            if event.run_id() != rid {
                return false;
            }
        }

        // Check round filter
        if let Some(round) = self.round {
            if event.round() != Some(round) {
                return false;
            }
        }

        // Check event type filter
        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type().to_string()) {
                return false;
            }
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<RunEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<RunEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<RunEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
