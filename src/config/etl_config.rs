use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::domain::model::{DataType, ExtractionConfig, LoadConfig, TransformationConfig};
use crate::extractors::catalog_api::CatalogApiConfig;
use crate::extractors::file::FileSourceConfig;
use crate::extractors::protocol::ProtocolApiConfig;
use crate::loaders::vector_store::VectorStoreConfig;
use crate::transformers::embedding::EmbeddingConfig;
use crate::transformers::enricher::EnricherConfig;
use crate::transformers::normalizer::NormalizerConfig;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_positive_number, validate_url, Validate};

/// Full pipeline configuration, usually loaded from a TOML file with
/// `${ENV_VAR}` placeholders for secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub transformation: TransformationConfig,
    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub catalog_api: CatalogApiConfig,
    #[serde(default)]
    pub protocol_api: ProtocolApiConfig,
    #[serde(default)]
    pub file_source: FileSourceConfig,

    /// Settings for `FieldNormalizer` and `MetadataEnricher`. The
    /// orchestrator's default transform step runs embedding only; these
    /// sections feed stages callers compose themselves.
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub enricher: EnricherConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Per-type overrides for the destination collection name.
    #[serde(default)]
    pub collections: HashMap<String, String>,
}

impl EtlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content);
        toml::from_str(&processed).map_err(|e| EtlError::Config {
            message: format!("TOML parsing error: {e}"),
        })
    }

    /// Destination collection for a data type; defaults to
    /// `catalog_{data_type}`.
    pub fn collection_name(&self, data_type: DataType) -> String {
        self.collections
            .get(data_type.as_str())
            .cloned()
            .unwrap_or_else(|| format!("catalog_{}", data_type.as_str()))
    }

    /// True when at least one extraction source is switched on.
    pub fn any_source_enabled(&self) -> bool {
        self.catalog_api.enabled || self.protocol_api.enabled || self.file_source.enabled
    }
}

/// Replaces `${VAR}` with the environment value; unset variables keep the
/// placeholder so validation can point at them.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{var_name}}}"))
    })
    .to_string()
}

impl Validate for EtlConfig {
    fn validate(&self) -> Result<()> {
        if !self.any_source_enabled() {
            return Err(EtlError::Config {
                message: "no extraction source enabled (catalog_api, protocol_api, file_source)"
                    .to_string(),
            });
        }

        if self.catalog_api.enabled {
            validate_url("catalog_api.base_url", &self.catalog_api.base_url)?;
            if self.catalog_api.api_key.is_empty() {
                return Err(EtlError::MissingConfig {
                    field: "catalog_api.api_key".to_string(),
                });
            }
        }
        if self.protocol_api.enabled {
            validate_url("protocol_api.base_url", &self.protocol_api.base_url)?;
        }
        if self.file_source.enabled && self.file_source.formats.is_empty() {
            return Err(EtlError::InvalidConfigValue {
                field: "file_source.formats".to_string(),
                value: "[]".to_string(),
                reason: "at least one format is required".to_string(),
            });
        }

        validate_url("embedding.endpoint", &self.embedding.endpoint)?;
        validate_url("vector_store.url", &self.vector_store.url)?;

        validate_positive_number("extraction.batch_size", self.extraction.batch_size, 1)?;
        validate_positive_number("extraction.max_workers", self.extraction.max_workers, 1)?;
        validate_positive_number(
            "transformation.batch_size",
            self.transformation.batch_size,
            1,
        )?;
        validate_positive_number("load.batch_size", self.load.batch_size, 1)?;
        validate_positive_number("embedding.dimensions", self.embedding.dimensions, 1)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = EtlConfig::from_toml_str("").unwrap();
        assert_eq!(config.extraction.batch_size, 100);
        assert_eq!(config.transformation.batch_size, 50);
        assert_eq!(config.load.batch_size, 100);
        assert_eq!(config.embedding.dimensions, 768);
        assert!(!config.any_source_enabled());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[extraction]
batch_size = 25
max_workers = 2
timeout_seconds = 15
retry_attempts = 2
rate_limit_rps = 5
caching_enabled = false
cache_ttl_seconds = 60

[catalog_api]
enabled = true
base_url = "https://api.example.com"
api_key = "secret"

[embedding]
endpoint = "https://embeddings.example.com"
api_key = "ai-key"
dimensions = 3

[vector_store]
url = "http://localhost:6333"

[collections]
products = "shop_products"
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.extraction.batch_size, 25);
        assert!(config.catalog_api.enabled);
        assert_eq!(config.catalog_api.user_id, "guestUser");
        assert_eq!(config.embedding.dimensions, 3);
        assert_eq!(config.collection_name(DataType::Products), "shop_products");
        assert_eq!(
            config.collection_name(DataType::Categories),
            "catalog_categories"
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("CATALOG_TEST_KEY", "from-env");
        let toml_content = r#"
[catalog_api]
enabled = true
base_url = "https://api.example.com"
api_key = "${CATALOG_TEST_KEY}"
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.catalog_api.api_key, "from-env");
        std::env::remove_var("CATALOG_TEST_KEY");
    }

    #[test]
    fn test_unset_env_var_keeps_placeholder() {
        let toml_content = r#"
[catalog_api]
api_key = "${DEFINITELY_NOT_SET_12345}"
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.catalog_api.api_key, "${DEFINITELY_NOT_SET_12345}");
    }

    #[test]
    fn test_validation_requires_a_source() {
        let config = EtlConfig::from_toml_str("").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no extraction source enabled"));
    }

    #[test]
    fn test_validation_rejects_bad_url() {
        let toml_content = r#"
[catalog_api]
enabled = true
base_url = "not-a-url"
api_key = "k"
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"
[file_source]
enabled = true
data_dir = "./data"
"#,
            )
            .unwrap();
        let config = EtlConfig::from_file(temp_file.path()).unwrap();
        assert!(config.file_source.enabled);
        config.validate().unwrap();
    }
}
