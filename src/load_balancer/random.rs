//! Uniform random selection strategy.

use rand::Rng;
use std::sync::Arc;

use crate::load_balancer::{healthy, Policy, ServiceInstance, Strategy};

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Random {
    fn policy(&self) -> Policy {
        Policy::Random
    }

    fn select_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        let healthy = healthy(instances);
        if healthy.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..healthy.len());
        Some(Arc::clone(healthy[index]))
    }
}
