//! Shared context handed to every component at construction.

use tokio::sync::broadcast;

use crate::observability::{EventBus, ResilienceEvent};

/// Explicitly constructed state shared by the components of one client.
///
/// Cloning is cheap; clones publish onto the same event bus.
#[derive(Debug, Clone, Default)]
pub struct Context {
    events: EventBus,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose event bus buffers `capacity` events per subscriber.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            events: EventBus::new(capacity),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ResilienceEvent) {
        self.events.emit(event);
    }
}
