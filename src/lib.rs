// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod analyzer;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod prefilter;
pub mod queue;
pub mod scoring;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::coordinator::{Coordinator, CoordinatorCfg, ProcessingControl};
pub use crate::pipeline::{Pipeline, PipelineCfg, PipelineVerdict};
pub use crate::policy::{PolicyHandle, PolicySet};
pub use crate::store::{JobStore, MemoryStore};
