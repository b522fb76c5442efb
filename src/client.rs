//! Balanced, retrying calls through a [`Transport`].
//!
//! # Data Flow
//! ```text
//! call(payload)
//!     → LoadBalancer::select (health + breaker filtered)
//!     → Transport::execute under timeout
//!     → LoadBalancer::record_request_result (strategy stats + breaker)
//!     → on transport failure: backoff, select again
//! ```

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::error::{ResilienceError, Result, TransportError};
use crate::load_balancer::LoadBalancer;
use crate::resilience::Backoff;
use crate::transport::Transport;

pub struct ResilientClient<T: Transport> {
    balancer: Arc<LoadBalancer>,
    transport: T,
    retries: RetryConfig,
    backoff: Backoff,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(balancer: Arc<LoadBalancer>, transport: T, retries: RetryConfig) -> Self {
        let backoff = Backoff::new(&retries);
        Self {
            balancer,
            transport,
            retries,
            backoff,
        }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Call whichever instance the balancer picks, retrying transport
    /// failures on a fresh selection.
    ///
    /// Returns `NoInstanceAvailable` when selection comes back empty before
    /// any attempt was made, otherwise the last transport error.
    pub async fn call(&self, payload: &Value, timeout: Duration) -> Result<Value> {
        let attempts = self.retries.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying call");
                tokio::time::sleep(delay).await;
            }

            let Some(instance) = self.balancer.select(None) else {
                break;
            };
            match self.execute(instance.target(), payload, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(addr = %instance.target(), attempt, error = %e, "Call failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map_or(ResilienceError::NoInstanceAvailable, ResilienceError::from))
    }

    /// Call one specific target (id or `address:port`), once.
    ///
    /// Refused with `CircuitOpen` before any network attempt when the
    /// target's breaker forbids it.
    pub async fn call_target(&self, target: &str, payload: &Value, timeout: Duration) -> Result<Value> {
        let instance = self
            .balancer
            .instance(target)
            .ok_or_else(|| ResilienceError::InstanceNotFound(target.to_string()))?;

        if let Some(breaker) = self.balancer.circuit_breaker(target) {
            if !breaker.can_execute() {
                let retry_after = breaker.retry_after();
                tracing::debug!(addr = %instance.target(), retry_after_ms = retry_after.as_millis() as u64, "Call refused by circuit breaker");
                return Err(ResilienceError::CircuitOpen {
                    target: instance.target().to_string(),
                    retry_after,
                });
            }
        }

        Ok(self.execute(instance.target(), payload, timeout).await?)
    }

    async fn execute(&self, target: &str, payload: &Value, timeout: Duration) -> std::result::Result<Value, TransportError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.transport.execute(target, payload, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                target: target.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        if let Err(e) = self
            .balancer
            .record_request_result(target, started.elapsed(), result.is_err())
        {
            // Instance was removed while the call was in flight.
            tracing::debug!(addr = %target, error = %e, "Result not recorded");
        }
        result
    }
}

impl<T: Transport> std::fmt::Debug for ResilientClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("balancer", &self.balancer)
            .field("retries", &self.retries)
            .finish()
    }
}
