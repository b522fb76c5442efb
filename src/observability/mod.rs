//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All components produce:
//!     → events.rs (typed notifications on the injected EventBus)
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (gauges and counters via the metrics facade)
//!
//! Consumers:
//!     → Embedders subscribing to the EventBus
//!     → Log aggregation (stdout)
//!     → Whatever metrics recorder the embedder installs
//! ```
//!
//! # Design Decisions
//! - Events are plain data; no subscriber can reach back into component state
//! - Emitting with no subscribers is free and never an error
//! - No exporter is bundled; export format is the embedder's choice

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventBus, ResilienceEvent};
