//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → per-component sections handed to each constructor
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Unknown policy names fail at parse time, never later

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, HealthCheckConfig, InstanceConfig, LoadBalancerConfig, LogFormat,
    LoggingConfig, PoolConfig, ProbeConfig, ResilienceConfig, RetryConfig, ServiceConfig,
};
pub use validation::ValidationError;
