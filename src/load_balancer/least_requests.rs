//! Least-requests selection strategy.

use std::sync::Arc;

use crate::load_balancer::{healthy, Policy, ServiceInstance, Strategy};

/// Selects the healthy instance with the fewest cumulative requests.
/// In case of a tie the first one is selected (stability).
#[derive(Debug, Default)]
pub struct LeastRequests;

impl LeastRequests {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastRequests {
    fn policy(&self) -> Policy {
        Policy::LeastRequests
    }

    fn select_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        healthy(instances)
            .into_iter()
            .min_by_key(|i| i.request_count())
            .cloned()
    }
}
