pub mod cli;
pub mod etl_config;

pub use cli::{Action, Cli};
pub use etl_config::EtlConfig;
