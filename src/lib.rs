//! Client-side resilience layer for RPC calls.
//!
//! Decides, for every outbound call, which backend instance to use, whether
//! the call should be attempted at all, and how transport connections are
//! created, reused and retired.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────────────┐
//!   call()       │  client ──▶ load_balancer ──▶ transport ──▶ backend   │
//!   ───────────▶ │               │   ▲                                  │
//!                │               │   │ health flips                     │
//!                │               ▼   │                                  │
//!                │     resilience::circuit_breaker   health::checker    │
//!                │                                                      │
//!   get_connection()                                                    │
//!   ───────────▶ │  pool (warmup, lease, health loop, cleanup loop)     │
//!                │                                                      │
//!                │  context: event bus   observability: logs + metrics  │
//!                └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod health;
pub mod load_balancer;
pub mod pool;
pub mod resilience;

// Composition and collaborators
pub mod client;
pub mod discovery;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use client::ResilientClient;
pub use config::ResilienceConfig;
pub use context::Context;
pub use error::{ProbeError, ResilienceError, Result, TransportError};
pub use health::{HealthCheckResult, HealthCheckTarget, HealthChecker, HealthStatus};
pub use load_balancer::{LoadBalancer, Policy, ServiceInstance};
pub use observability::ResilienceEvent;
pub use pool::{ConnectionPool, Connector, PooledConnection};
pub use resilience::{CircuitBreaker, CircuitState};
