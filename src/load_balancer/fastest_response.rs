//! Fastest-response selection strategy.
//!
//! Response time is smoothed with an exponentially weighted moving average:
//! `rt = rt * (1 - α) + sample * α`, α = 0.1, starting from 0.

use std::sync::Arc;
use std::time::Duration;

use crate::load_balancer::{healthy, Policy, ServiceInstance, Strategy};

const ALPHA: f64 = 0.1;

#[derive(Debug, Default)]
pub struct FastestResponse;

impl FastestResponse {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for FastestResponse {
    fn policy(&self) -> Policy {
        Policy::FastestResponse
    }

    fn select_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        healthy(instances)
            .into_iter()
            .min_by(|a, b| a.response_time().total_cmp(&b.response_time()))
            .cloned()
    }

    fn update_stats(&self, instance: &ServiceInstance, response_time: Duration, is_error: bool) {
        instance.record_request(is_error);
        let sample = response_time.as_secs_f64() * 1000.0;
        let smoothed = instance.response_time() * (1.0 - ALPHA) + sample * ALPHA;
        instance.set_response_time(smoothed);
    }
}
