// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod app;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod signal;
pub mod store;

// ---- Re-exports for a stable public API ----
pub use crate::config::Config;
pub use crate::pipeline::{Delivery, Pipeline, RunReport};
pub use crate::reconcile::reconcile;
pub use crate::signal::{
    Decision, DecisionReason, ItemId, PersistedState, Signal, SignalMode, SourceResult,
};
