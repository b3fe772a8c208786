use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::domain::model::DataType;
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Small products-only run, capped at 50 records.
    Test,
    /// Probe every configured component and report.
    Health,
    /// Run extract, transform, and load for each data type.
    Full,
}

#[derive(Debug, Parser)]
#[command(name = "catalog-etl")]
#[command(about = "Catalog ETL pipeline: extract, embed, and index product data")]
#[command(version)]
pub struct Cli {
    /// What to run.
    #[arg(short, long, value_enum, default_value = "test")]
    pub action: Action,

    /// Comma-separated data types (products, categories, providers).
    #[arg(short, long, default_value = "products", value_delimiter = ',')]
    pub data_types: Vec<String>,

    /// Cap on records per data type; unlimited when omitted.
    #[arg(short, long)]
    pub max_records: Option<usize>,

    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "etl.toml")]
    pub config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parsed_data_types(&self) -> Result<Vec<DataType>> {
        self.data_types
            .iter()
            .map(|raw| raw.trim().parse())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["catalog-etl"]);
        assert_eq!(cli.action, Action::Test);
        assert_eq!(cli.data_types, vec!["products"]);
        assert!(cli.max_records.is_none());
        assert!(!cli.verbose);
        assert_eq!(cli.parsed_data_types().unwrap(), vec![DataType::Products]);
    }

    #[test]
    fn test_comma_separated_data_types() {
        let cli = Cli::parse_from([
            "catalog-etl",
            "--action",
            "full",
            "--data-types",
            "products,categories",
            "--max-records",
            "10",
        ]);
        assert_eq!(cli.action, Action::Full);
        assert_eq!(
            cli.parsed_data_types().unwrap(),
            vec![DataType::Products, DataType::Categories]
        );
        assert_eq!(cli.max_records, Some(10));
    }

    #[test]
    fn test_unknown_data_type_is_an_error() {
        let cli = Cli::parse_from(["catalog-etl", "--data-types", "gadgets"]);
        assert!(cli.parsed_data_types().is_err());
    }
}
