//! Lifecycle management for background work.
//!
//! # Data Flow
//! ```text
//! Component start()/initialize():
//!     → task.rs spawns a self-rescheduling loop holding a Weak owner
//!
//! Component stop()/close():
//!     → task.rs aborts the loop and awaits it
//!     → no event or eviction fires afterwards
//! ```
//!
//! # Design Decisions
//! - Loops hold weak references so dropping the owner ends them
//! - Cycles never overlap: sleep starts after the cycle settles

pub mod task;

pub use task::BackgroundTask;
