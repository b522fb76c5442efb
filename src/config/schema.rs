//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Durations are expressed in milliseconds, matching the knobs operators
//! already tune for RPC timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::load_balancer::Policy;
use crate::pool::PoolPolicy;

/// Root configuration for the resilience layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Logging settings.
    pub logging: LoggingConfig,

    /// Instance selection settings.
    pub load_balancer: LoadBalancerConfig,

    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Retry settings for the composed client.
    pub retries: RetryConfig,

    /// Statically discovered services.
    pub services: Vec<ServiceConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive (e.g. "info", "debug").
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Health checker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Delay between the end of one check cycle and the start of the next.
    pub interval_ms: u64,

    /// Per-probe timeout.
    pub timeout_ms: u64,

    /// Consecutive failures before a healthy target is reported unhealthy.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before an unhealthy target is reported healthy.
    pub healthy_threshold: u32,

    /// Apply threshold damping to raw probe results.
    pub damping: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            timeout_ms: 5_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            damping: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Attach a breaker to every registered instance.
    pub enabled: bool,

    /// Failures (while closed) that open the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call is admitted.
    pub recovery_timeout_ms: u64,

    /// A failure arriving later than this after the previous one restarts
    /// the failure count.
    pub monitoring_period_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            monitoring_period_ms: 10_000,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Selection strategy.
    pub policy: Policy,

    /// Probe instances with a health checker.
    pub health_check: Option<HealthCheckConfig>,

    /// Guard instances with circuit breakers.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            policy: Policy::RoundRobin,
            health_check: None,
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    pub max_connection_age_ms: u64,
    pub max_connection_idle_ms: u64,
    /// Maximum wait for a connection, including establishment.
    pub connection_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    pub balancing_policy: PoolPolicy,
    pub warmup_connections: usize,
    pub warmup_timeout_ms: u64,
    /// Interval of the eviction pass.
    pub cleanup_interval_ms: u64,
}

impl PoolConfig {
    pub fn max_connection_age(&self) -> Duration {
        Duration::from_millis(self.max_connection_age_ms)
    }

    pub fn max_connection_idle(&self) -> Duration {
        Duration::from_millis(self.max_connection_idle_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            max_connection_age_ms: 300_000,
            max_connection_idle_ms: 60_000,
            connection_timeout_ms: 5_000,
            health_check_interval_ms: 30_000,
            health_check_timeout_ms: 5_000,
            balancing_policy: PoolPolicy::RoundRobin,
            warmup_connections: 1,
            warmup_timeout_ms: 10_000,
            cleanup_interval_ms: 30_000,
        }
    }
}

/// Retry configuration for [`ResilientClient`](crate::client::ResilientClient).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,

    /// Backoff cap.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// How instances of a service are probed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeConfig {
    /// Successful TCP connect means healthy.
    #[default]
    Tcp,
    /// 2xx response on `path` means healthy.
    Http { path: String },
}

/// A statically discovered service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name.
    pub name: String,

    /// Probe used for the service's instances.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Known instances.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// A single instance of a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Instance id; defaults to `address:port`.
    pub id: Option<String>,

    pub address: String,

    pub port: u16,

    /// Weight for weighted round robin (default: 1).
    pub weight: Option<u32>,
}

impl InstanceConfig {
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn resolved_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.target())
    }
}
