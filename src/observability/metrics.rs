//! Metrics recording.
//!
//! Values are recorded through the `metrics` facade only. Installing a
//! recorder (and choosing an export format) is left to the embedder; with
//! none installed every call here is a no-op.
//!
//! # Metrics
//! - `resilience_instance_health` (gauge): 1=healthy, 0=otherwise, by target
//! - `resilience_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `resilience_selections_total` (counter): by policy and outcome
//! - `resilience_requests_total` (counter): reported results by target, outcome
//! - `resilience_pool_connections` (gauge): tracked pool connections

use crate::resilience::circuit_breaker::CircuitState;

pub fn record_instance_health(target: &str, healthy: bool) {
    metrics::gauge!("resilience_instance_health", "target" => target.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_circuit_state(target: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    metrics::gauge!("resilience_circuit_state", "target" => target.to_string()).set(value);
}

pub fn record_selection(policy: &'static str, selected: bool) {
    let outcome = if selected { "selected" } else { "none" };
    metrics::counter!("resilience_selections_total", "policy" => policy, "outcome" => outcome)
        .increment(1);
}

pub fn record_request_result(target: &str, is_error: bool) {
    let outcome = if is_error { "error" } else { "success" };
    metrics::counter!(
        "resilience_requests_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_pool_connections(total: usize) {
    metrics::gauge!("resilience_pool_connections").set(total as f64);
}
