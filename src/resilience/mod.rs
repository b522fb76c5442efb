//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an instance:
//!     → circuit_breaker.rs (may the call be attempted at all?)
//!     → Transport::execute (outside this crate)
//!     → circuit_breaker.rs (record outcome, open circuit past threshold)
//!     → On transport failure: backoff.rs (delay before next attempt)
//! ```
//!
//! # Design Decisions
//! - Breakers gate attempts; they never perform network calls
//! - Jittered backoff prevents synchronized retry storms

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
