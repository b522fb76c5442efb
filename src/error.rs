//! Crate-wide error types.
//!
//! Probe outcomes never travel through these types to a caller; they are
//! absorbed into health and circuit state. What does come back to a caller
//! is anything that prevented a call from being issued at all.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the resilience layer.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// A health-check target id is not registered.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// A `address:port` or instance id is not registered with the balancer.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The breaker for the target forbids any attempt right now.
    #[error("circuit open for {target}, retry after {retry_after:?}")]
    CircuitOpen { target: String, retry_after: Duration },

    /// No connection freed up before the wait deadline.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Service discovery knows no such logical service.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Selection produced no usable instance.
    #[error("no instance available")]
    NoInstanceAvailable,

    /// Unknown strategy or provider name.
    #[error("unsupported policy: {0}")]
    UnsupportedPolicy(String),

    /// The transport collaborator failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why a single health probe failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("health check timed out after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Failure reported by a [`Transport`](crate::transport::Transport) or
/// [`Connector`](crate::pool::Connector).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("call to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("call to {target} failed: {reason}")]
    Call { target: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
