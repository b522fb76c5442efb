//! Weighted round-robin selection strategy.
//!
//! Each call expands the healthy instances into a queue where an instance
//! appears `weight` times, then rotates over that queue. The rebuild is O(n)
//! in total weight, which keeps ordering simple and predictable for small
//! fleets. Weight 0 takes an instance out of rotation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{healthy, Policy, ServiceInstance, Strategy};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counter: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for WeightedRoundRobin {
    fn policy(&self) -> Policy {
        Policy::WeightedRoundRobin
    }

    fn select_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        let queue: Vec<&Arc<ServiceInstance>> = healthy(instances)
            .into_iter()
            .flat_map(|i| std::iter::repeat(i).take(i.effective_weight() as usize))
            .collect();
        if queue.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % queue.len();
        Some(Arc::clone(queue[index]))
    }
}
