pub mod batch;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;

pub use pipeline::{EtlPipeline, HealthReport, RunSummary};
