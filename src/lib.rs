// src/lib.rs
// Public library surface for the service binary, tools and integration tests.

pub mod config;
pub mod dedup;
pub mod error;
pub mod health;
pub mod model;
pub mod trust;

// Fetch → classify → route → render → deliver
pub mod analyze;
pub mod ingest;
pub mod notify;
pub mod digest;
pub mod pipeline;
pub mod render;
pub mod router;
pub mod store;

pub mod metrics;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::config::{HotReloadConfig, PipelineConfig};
pub use crate::error::{CycleErrors, FetchErrorKind, PipelineError};
pub use crate::model::{Item, ItemId, Source};
pub use crate::pipeline::{CycleReport, CycleState, Orchestrator, PipelineContext};
