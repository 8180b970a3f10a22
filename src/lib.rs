// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod job;
pub mod log;
pub mod metrics;
pub mod quality;
pub mod reliability;
pub mod schedule;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::dispatch::{sweep, DispatchMessage, JobKind, JobRegistry, SweepStats};
pub use crate::engine::EngineContext;
pub use crate::error::IngestError;
pub use crate::job::{run_with_retry, JobOutcome, RetryPolicy};
pub use crate::quality::{fuse, FusionResult, QualityTier, SourceValue};
pub use crate::schedule::{Cadence, CheckOutcome, DataSource, ScheduleRecord};
