pub mod config;
pub mod core;
pub mod domain;
pub mod extractors;
pub mod loaders;
pub mod transformers;
pub mod utils;

pub use config::{Action, Cli, EtlConfig};
pub use core::{EtlPipeline, HealthReport, RunSummary};
pub use domain::model::{DataType, Record};
pub use utils::error::{EtlError, Result};
