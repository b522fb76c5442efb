//! Connection pooling.
//!
//! # Data Flow
//! ```text
//! initialize()
//!     → warmup: N connects in parallel (each bounded by warmup_timeout)
//!     → start health-check and cleanup loops
//!
//! get_connection(target?)
//!     → take matching / policy-selected idle connection
//!     → else connect if size < max
//!     → else wait for a release (Notify) until connection_timeout
//!     → PooledConnection lease
//!
//! release_connection(lease) / lease drop
//!     → healthy: back to the available list
//!     → unhealthy: removed and closed
//! ```
//!
//! # Design Decisions
//! - The pool never exceeds max_connections, in-flight connects included
//! - Idle eviction never shrinks the pool below min_connections
//! - Leased connections are never evicted; they are judged at release

pub mod connection;
pub mod manager;

pub use connection::PooledConnection;
pub use manager::ConnectionPool;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::TransportError;

/// Unique identifier for a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

/// Why a connection left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Unhealthy,
    Expired,
    Idle,
    Closed,
}

/// How an idle connection is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    /// Head of the available list (least recently returned).
    #[default]
    RoundRobin,
    /// Fewest times leased.
    LeastRequests,
}

/// Creates, probes and closes transport connections for a pool.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    fn connect<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<Self::Connection, TransportError>>;

    /// Lightweight liveness call.
    fn ping<'a>(&'a self, conn: &'a Self::Connection) -> BoxFuture<'a, Result<(), TransportError>>;

    fn close<'a>(&'a self, conn: &'a Self::Connection) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// Bookkeeping for one tracked connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub target: String,
    pub is_healthy: bool,
    pub is_idle: bool,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub request_count: u64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub leased: usize,
    pub pending: usize,
    pub unhealthy: usize,
    pub closed: bool,
}
