use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: '{value}' ({reason})")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },

    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Data processing error: {message}")]
    Processing { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl EtlError {
    /// Configuration-class faults propagate as errors; everything else is
    /// folded into stage results.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EtlError::InvalidConfigValue { .. }
                | EtlError::MissingConfig { .. }
                | EtlError::UnknownDataType(_)
                | EtlError::Config { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
