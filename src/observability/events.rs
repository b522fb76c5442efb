//! Typed notifications published by every component.
//!
//! Payloads are plain data (ids, statuses, counters) so subscribers never
//! hold references into component state.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::health::{HealthCheckResult, HealthStatus};
use crate::load_balancer::Policy;
use crate::pool::{ConnectionId, RemovalReason};
use crate::resilience::circuit_breaker::CircuitState;

const DEFAULT_CAPACITY: usize = 1024;

/// Every observable notification an embedder can subscribe to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    TargetAdded {
        id: String,
    },
    TargetRemoved {
        id: String,
    },
    HealthChanged {
        id: String,
        previous: HealthStatus,
        current: HealthStatus,
    },
    CheckCompleted {
        id: String,
        result: HealthCheckResult,
    },
    InstanceAdded {
        id: String,
        target: String,
    },
    InstanceRemoved {
        id: String,
        target: String,
    },
    InstanceSelected {
        id: String,
        target: String,
        policy: Policy,
    },
    NoneAvailable {
        candidates: usize,
    },
    CircuitStateChanged {
        target: String,
        from: CircuitState,
        to: CircuitState,
    },
    ConnectionCreated {
        id: ConnectionId,
        target: String,
    },
    ConnectionRemoved {
        id: ConnectionId,
        target: String,
        reason: RemovalReason,
    },
    ConnectionUnhealthy {
        id: ConnectionId,
        target: String,
        error: String,
    },
    ConnectionsCleaned {
        removed: usize,
        remaining: usize,
    },
    PoolInitialized {
        connections: usize,
    },
    PoolClosed,
}

/// Broadcast fan-out of [`ResilienceEvent`]s.
///
/// Publishing never fails: with no subscribers the event is dropped, and a
/// lagging subscriber loses the oldest events rather than slowing emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResilienceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ResilienceEvent) {
        tracing::trace!(?event, "event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
