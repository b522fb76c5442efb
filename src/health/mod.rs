//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Self-rescheduling loop (or on-demand check_target)
//!     → probe.rs (pluggable probe, bounded by timeout)
//!     → state.rs (optional damping of the raw result)
//!     → stored result + HealthChanged / CheckCompleted events
//!     → HealthListener callbacks (e.g. the load balancer registry)
//! ```
//!
//! # Design Decisions
//! - Probe, damping and checker are composed, not layered by inheritance
//! - State transitions require consecutive successes/failures when damped
//! - Probe failures are recorded, never returned to callers

pub mod active;
pub mod probe;
pub mod state;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

pub use active::HealthChecker;
pub use probe::{FnProbe, HealthProbe, HttpProbe, TcpConnectProbe};
pub use state::{Damping, DampingState, HealthStatus};

/// Something the checker probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckTarget {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub service_name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl HealthCheckTarget {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            service_name: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// `address:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Outcome of one health check, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    #[serde(rename = "response_time_ms", serialize_with = "as_millis")]
    pub response_time: Duration,
    pub error: Option<String>,
    pub timestamp: SystemTime,
    pub metadata: Map<String, Value>,
}

impl HealthCheckResult {
    /// Seed result for a freshly registered target.
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            response_time: Duration::ZERO,
            error: None,
            timestamp: SystemTime::now(),
            metadata: Map::new(),
        }
    }

    pub fn consecutive_failures(&self) -> Option<u64> {
        self.metadata.get("consecutive_failures").and_then(Value::as_u64)
    }

    pub fn consecutive_successes(&self) -> Option<u64> {
        self.metadata.get("consecutive_successes").and_then(Value::as_u64)
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Synchronous observer of reported status flips.
pub trait HealthListener: Send + Sync {
    fn on_health_changed(&self, id: &str, previous: HealthStatus, current: HealthStatus);
}
