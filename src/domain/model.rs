use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::utils::error::EtlError;

/// A single catalog record. Upstream sources disagree on shape, so records
/// stay open maps; transformers progressively add canonical fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Wraps a JSON value if it is an object; anything else is not a record.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Record identity: a non-empty string or numeric `id` field.
    pub fn id(&self) -> Option<String> {
        match self.fields.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id().is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Dot-nested lookup, e.g. `price.value`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// What to extract. Replaces per-source keyword arguments with one
/// explicit request; extractors read the fields they understand.
#[derive(Debug, Clone, Default)]
pub struct ExtractRequest {
    pub query: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub limit: Option<usize>,
    pub max_pages: Option<usize>,
    pub file_path: Option<PathBuf>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Products,
    Categories,
    Providers,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Products => "products",
            DataType::Categories => "categories",
            DataType::Providers => "providers",
        }
    }

    pub fn all() -> [DataType; 3] {
        [DataType::Products, DataType::Categories, DataType::Providers]
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "products" | "product" => Ok(DataType::Products),
            "categories" | "category" => Ok(DataType::Categories),
            "providers" | "provider" => Ok(DataType::Providers),
            other => Err(EtlError::UnknownDataType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub rate_limit_rps: u32,
    pub caching_enabled: bool,
    pub cache_ttl_seconds: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_workers: 4,
            timeout_seconds: 30,
            retry_attempts: 3,
            rate_limit_rps: 10,
            caching_enabled: true,
            cache_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub data: Vec<Record>,
    pub errors: Vec<String>,
    pub metadata: Map<String, Value>,
    pub extracted_at: DateTime<Utc>,
    pub source: String,
    pub total_records: usize,
}

impl ExtractionResult {
    /// A completed extraction. Success means at least one record survived;
    /// `errors` may still carry partial faults.
    pub fn ok(
        source: &str,
        data: Vec<Record>,
        errors: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        let total_records = data.len();
        Self {
            success: !data.is_empty(),
            data,
            errors,
            metadata,
            extracted_at: Utc::now(),
            source: source.to_string(),
            total_records,
        }
    }

    pub fn failed(source: &str, errors: Vec<String>, metadata: Map<String, Value>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            errors,
            metadata,
            extracted_at: Utc::now(),
            source: source.to_string(),
            total_records: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub validate_output: bool,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_workers: 4,
            timeout_seconds: 60,
            retry_attempts: 3,
            validate_output: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformationResult {
    pub success: bool,
    pub data: Vec<Record>,
    pub errors: Vec<String>,
    pub metadata: Map<String, Value>,
    pub transformed_at: DateTime<Utc>,
    pub transformer: String,
    pub input_records: usize,
    pub output_records: usize,
}

impl TransformationResult {
    pub fn completed(
        transformer: &str,
        input_records: usize,
        data: Vec<Record>,
        errors: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        let output_records = data.len();
        Self {
            success: !data.is_empty(),
            data,
            errors,
            metadata,
            transformed_at: Utc::now(),
            transformer: transformer.to_string(),
            input_records,
            output_records,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub create_collections: bool,
    pub validate_before_load: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_workers: 4,
            timeout_seconds: 120,
            retry_attempts: 3,
            create_collections: true,
            validate_before_load: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub success: bool,
    pub loaded_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
    pub metadata: Map<String, Value>,
    pub loaded_at: DateTime<Utc>,
    pub loader: String,
}

impl LoadResult {
    pub fn completed(
        loader: &str,
        loaded_count: usize,
        failed_count: usize,
        errors: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            success: loaded_count > 0,
            loaded_count,
            failed_count,
            errors,
            metadata,
            loaded_at: Utc::now(),
            loader: loader.to_string(),
        }
    }

    pub fn failed(loader: &str, failed_count: usize, errors: Vec<String>) -> Self {
        Self {
            success: false,
            loaded_count: 0,
            failed_count,
            errors,
            metadata: Map::new(),
            loaded_at: Utc::now(),
            loader: loader.to_string(),
        }
    }
}

/// Collection geometry the loader provisions when a collection is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub vector_size: usize,
    pub distance: String,
}

impl Default for CollectionSpec {
    fn default() -> Self {
        Self {
            vector_size: 768,
            distance: "Cosine".to_string(),
        }
    }
}
