//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single backend instance of a service
//! - Track request/error counts and response time (for strategies)
//! - Track reported health state

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::config::InstanceConfig;
use crate::health::HealthStatus;

/// Upper bound on an instance weight; larger values are clamped.
pub const MAX_WEIGHT: u32 = 1_000;

/// A single registered backend instance.
///
/// Identity fields are immutable; health and statistics are atomics so the
/// strategy and the health checker can update them through shared `Arc`s.
#[derive(Debug)]
pub struct ServiceInstance {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub weight: Option<u32>,
    /// Pre-computed `address:port`.
    target: String,
    health: AtomicU8,
    /// f64 milliseconds stored as bits.
    response_time: AtomicU64,
    request_count: AtomicU64,
    error_count: AtomicU64,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let target = format!("{}:{}", address, port);
        Self {
            id: id.into(),
            address,
            port,
            weight: None,
            target,
            health: AtomicU8::new(HealthStatus::Unknown as u8),
            response_time: AtomicU64::new(0f64.to_bits()),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// `address:port` as handed to the transport.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Weight used by weighted round robin (default 1, at most [`MAX_WEIGHT`]).
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1).min(MAX_WEIGHT)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::from(self.health.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.health().is_healthy()
    }

    pub(crate) fn set_health(&self, status: HealthStatus) -> HealthStatus {
        HealthStatus::from(self.health.swap(status as u8, Ordering::AcqRel))
    }

    /// Latest (or smoothed, for fastest-response) response time in ms.
    pub fn response_time(&self) -> f64 {
        f64::from_bits(self.response_time.load(Ordering::Relaxed))
    }

    pub(crate) fn set_response_time(&self, ms: f64) {
        self.response_time.store(ms.to_bits(), Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_request(&self, is_error: bool) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            target: self.target.clone(),
            weight: self.weight,
            health: self.health(),
            response_time_ms: self.response_time(),
            request_count: self.request_count(),
            error_count: self.error_count(),
        }
    }
}

impl From<&InstanceConfig> for ServiceInstance {
    fn from(config: &InstanceConfig) -> Self {
        let instance = ServiceInstance::new(config.resolved_id(), config.address.clone(), config.port);
        match config.weight {
            Some(weight) => instance.with_weight(weight),
            None => instance,
        }
    }
}

/// Serializable copy of an instance's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub target: String,
    pub weight: Option<u32>,
    pub health: HealthStatus,
    pub response_time_ms: f64,
    pub request_count: u64,
    pub error_count: u64,
}
