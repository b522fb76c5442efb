//! Health state and threshold damping.
//!
//! # State Transitions (with damping)
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! Unknown → either: first probe result passes straight through
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Counters always track the raw probe stream, even while a result is
//!   being swallowed

use serde::{Deserialize, Serialize};

use crate::config::HealthCheckConfig;

/// Health of a target or instance.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive same-direction probe counters for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DampingState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl DampingState {
    /// Record a raw probe outcome.
    pub fn observe(&mut self, healthy: bool) {
        if healthy {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
        }
    }
}

/// Threshold filter applied between raw probe results and reported status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Damping {
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Damping {
    pub fn from_config(config: &HealthCheckConfig) -> Option<Self> {
        config.damping.then_some(Self {
            unhealthy_threshold: config.unhealthy_threshold,
            healthy_threshold: config.healthy_threshold,
        })
    }

    /// Status to report given the previously reported one, the raw probe
    /// status and the already-updated counters.
    pub fn filter(&self, previous: HealthStatus, raw: HealthStatus, state: &DampingState) -> HealthStatus {
        match (previous, raw) {
            (HealthStatus::Healthy, HealthStatus::Unhealthy)
                if state.consecutive_failures < self.unhealthy_threshold =>
            {
                HealthStatus::Healthy
            }
            (HealthStatus::Unhealthy, HealthStatus::Healthy)
                if state.consecutive_successes < self.healthy_threshold =>
            {
                HealthStatus::Unhealthy
            }
            _ => raw,
        }
    }
}
