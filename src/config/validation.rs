//! Configuration validation.
//!
//! Serde handles syntax; this pass checks value ranges and cross-field
//! constraints. Every problem is reported, not just the first.

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{
    CircuitBreakerConfig, HealthCheckConfig, PoolConfig, ResilienceConfig, RetryConfig,
};
use crate::load_balancer::instance::MAX_WEIGHT;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(hc) = &config.load_balancer.health_check {
        validate_health_check("load_balancer.health_check", hc, &mut errors);
    }
    if let Some(cb) = &config.load_balancer.circuit_breaker {
        validate_circuit_breaker("load_balancer.circuit_breaker", cb, &mut errors);
    }
    validate_pool(&config.pool, &mut errors);
    validate_retries(&config.retries, &mut errors);

    let mut names = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        let prefix = format!("services[{}]", i);
        if service.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", prefix), "must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                format!("duplicate service '{}'", service.name),
            ));
        }

        let mut ids = HashSet::new();
        for (j, instance) in service.instances.iter().enumerate() {
            let field = format!("{}.instances[{}]", prefix, j);
            if instance.address.is_empty() {
                errors.push(ValidationError::new(format!("{}.address", field), "must not be empty"));
            }
            if instance.port == 0 {
                errors.push(ValidationError::new(format!("{}.port", field), "must be non-zero"));
            }
            if instance.weight.is_some_and(|w| w > MAX_WEIGHT) {
                errors.push(ValidationError::new(
                    format!("{}.weight", field),
                    format!("must be <= {}", MAX_WEIGHT),
                ));
            }
            if !ids.insert(instance.resolved_id()) {
                errors.push(ValidationError::new(
                    field,
                    format!("duplicate instance '{}'", instance.resolved_id()),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_health_check(prefix: &str, hc: &HealthCheckConfig, errors: &mut Vec<ValidationError>) {
    if hc.interval_ms == 0 {
        errors.push(ValidationError::new(format!("{}.interval_ms", prefix), "must be > 0"));
    }
    if hc.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be > 0"));
    }
    if hc.unhealthy_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.unhealthy_threshold", prefix), "must be >= 1"));
    }
    if hc.healthy_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.healthy_threshold", prefix), "must be >= 1"));
    }
}

fn validate_circuit_breaker(prefix: &str, cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", prefix), "must be >= 1"));
    }
    if cb.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.recovery_timeout_ms", prefix), "must be > 0"));
    }
}

fn validate_pool(pool: &PoolConfig, errors: &mut Vec<ValidationError>) {
    if pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be >= 1"));
    }
    if pool.min_connections > pool.max_connections {
        errors.push(ValidationError::new(
            "pool.min_connections",
            format!("must not exceed max_connections ({})", pool.max_connections),
        ));
    }
    if pool.warmup_connections > pool.max_connections {
        errors.push(ValidationError::new(
            "pool.warmup_connections",
            format!("must not exceed max_connections ({})", pool.max_connections),
        ));
    }
    for (field, value) in [
        ("pool.connection_timeout_ms", pool.connection_timeout_ms),
        ("pool.health_check_interval_ms", pool.health_check_interval_ms),
        ("pool.health_check_timeout_ms", pool.health_check_timeout_ms),
        ("pool.warmup_timeout_ms", pool.warmup_timeout_ms),
        ("pool.cleanup_interval_ms", pool.cleanup_interval_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
}

fn validate_retries(retries: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new("retries.base_delay_ms", "must not exceed max_delay_ms"));
    }
}
