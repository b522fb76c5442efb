//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! select_instance(allow-list)
//!     → balancer.rs (registry snapshot, allow-list, circuit breaker peek)
//!     → Strategy picks among healthy candidates:
//!         - round_robin.rs (rotate)
//!         - weighted_round_robin.rs (rotate over weight-expanded queue)
//!         - least_requests.rs (fewest cumulative requests)
//!         - fastest_response.rs (lowest EWMA response time)
//!         - random.rs (uniform)
//!     → balancer.rs (acquire breaker permission, emit selection event)
//!     → Return "address:port" or None
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from their own rotation counter
//! - Strategy can be swapped at runtime without blocking selection
//! - Unhealthy and unknown instances are never selected

pub mod balancer;
pub mod fastest_response;
pub mod instance;
pub mod least_requests;
pub mod random;
pub mod round_robin;
pub mod weighted_round_robin;

pub use balancer::LoadBalancer;
pub use instance::{InstanceSnapshot, ServiceInstance};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ResilienceError;

/// Selection policy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastRequests,
    FastestResponse,
    Random,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::RoundRobin => "round_robin",
            Policy::WeightedRoundRobin => "weighted_round_robin",
            Policy::LeastRequests => "least_requests",
            Policy::FastestResponse => "fastest_response",
            Policy::Random => "random",
        }
    }

    /// Build a fresh strategy for this policy.
    pub fn strategy(&self) -> Box<dyn Strategy> {
        match self {
            Policy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
            Policy::WeightedRoundRobin => Box::new(weighted_round_robin::WeightedRoundRobin::new()),
            Policy::LeastRequests => Box::new(least_requests::LeastRequests::new()),
            Policy::FastestResponse => Box::new(fastest_response::FastestResponse::new()),
            Policy::Random => Box::new(random::Random::new()),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Policy::RoundRobin),
            "weighted_round_robin" => Ok(Policy::WeightedRoundRobin),
            "least_requests" => Ok(Policy::LeastRequests),
            "fastest_response" => Ok(Policy::FastestResponse),
            "random" => Ok(Policy::Random),
            other => Err(ResilienceError::UnsupportedPolicy(other.to_string())),
        }
    }
}

/// Trait for load balancing algorithms.
pub trait Strategy: Send + Sync + fmt::Debug {
    fn policy(&self) -> Policy;

    /// Select an instance from the candidates.
    /// Returns None if no healthy instance is available.
    fn select_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>>;

    /// Feed back the outcome of a request sent to `instance`.
    fn update_stats(&self, instance: &ServiceInstance, response_time: Duration, is_error: bool) {
        instance.record_request(is_error);
        instance.set_response_time(response_time.as_secs_f64() * 1000.0);
    }
}

/// Healthy subset, preserving registry order.
pub(crate) fn healthy(instances: &[Arc<ServiceInstance>]) -> Vec<&Arc<ServiceInstance>> {
    instances.iter().filter(|i| i.is_healthy()).collect()
}
