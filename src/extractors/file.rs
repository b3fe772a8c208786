use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::rate_limit::RateLimiter;
use crate::core::retry::SourceStats;
use crate::domain::model::{DataType, ExtractRequest, ExtractionConfig, ExtractionResult, Record};
use crate::domain::ports::Extractor;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_path;

const SOURCE_NAME: &str = "file_system";

/// Filename substrings that route a file to a data type.
const FILE_PATTERNS: [(DataType, &[&str]); 3] = [
    (DataType::Products, &["product", "item", "catalog"]),
    (DataType::Categories, &["category", "categories", "taxonomy"]),
    (DataType::Providers, &["provider", "seller", "vendor", "merchant"]),
];

/// Wrapper keys probed when a JSON file holds an object instead of an array.
const WRAPPER_KEYS: [&str; 5] = ["data", "items", "products", "records", "results"];

fn default_formats() -> Vec<String> {
    vec!["json".to_string(), "jsonl".to_string(), "csv".to_string()]
}

fn default_delimiter() -> String {
    ",".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "FileSourceConfig::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: String,
}

impl FileSourceConfig {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("./data")
    }
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: Self::default_data_dir(),
            formats: default_formats(),
            csv_delimiter: default_delimiter(),
        }
    }
}

/// Extracts catalog data from local JSON / JSONL / CSV files. Useful for
/// importing existing dumps or test datasets.
pub struct FileExtractor {
    config: ExtractionConfig,
    files: FileSourceConfig,
    limiter: RateLimiter,
    stats: SourceStats,
}

impl FileExtractor {
    pub fn new(config: ExtractionConfig, files: FileSourceConfig) -> Result<Self> {
        validate_path("sources.files.data_dir", &files.data_dir.to_string_lossy())?;
        let limiter = RateLimiter::new(config.rate_limit_rps);
        Ok(Self {
            config,
            files,
            limiter,
            stats: SourceStats::new(),
        })
    }

    async fn extract_by_type(&self, data_type: DataType, request: &ExtractRequest) -> ExtractionResult {
        info!(source = SOURCE_NAME, %data_type, "extracting from files");

        let files = match &request.file_path {
            Some(path) => vec![path.clone()],
            None => self.find_files_by_type(data_type, request.pattern.as_deref()),
        };

        if files.is_empty() {
            let mut metadata = Map::new();
            metadata.insert(
                "search_path".to_string(),
                self.files.data_dir.to_string_lossy().into_owned().into(),
            );
            return ExtractionResult::failed(
                SOURCE_NAME,
                vec![format!("No files found for {}", data_type)],
                metadata,
            );
        }

        let mut data: Vec<Record> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut processed_files: Vec<Value> = Vec::new();

        for file in &files {
            match extract_from_file(file, &self.files.csv_delimiter) {
                Ok(records) => {
                    let extracted_at = Utc::now().to_rfc3339();
                    for mut record in records {
                        record.insert("source_file", file.to_string_lossy().into_owned().into());
                        record.insert("extracted_at", extracted_at.clone().into());
                        data.push(record);
                    }
                    processed_files.push(file.to_string_lossy().into_owned().into());
                }
                Err(e) => {
                    let message = format!("Error processing file {}: {}", file.display(), e);
                    warn!(source = SOURCE_NAME, file = %file.display(), error = %e, "file failed");
                    errors.push(message);
                }
            }
        }

        let mut valid = Vec::with_capacity(data.len());
        for (index, record) in data.into_iter().enumerate() {
            if record.is_valid() {
                valid.push(record);
            } else {
                errors.push(format!("Record {} missing required 'id' field", index));
            }
        }

        let mut metadata = Map::new();
        metadata.insert("files_processed".to_string(), Value::Array(processed_files));
        metadata.insert("data_type".to_string(), data_type.as_str().into());
        ExtractionResult::ok(SOURCE_NAME, valid, errors, metadata)
    }

    /// Recursive directory scan filtered by extension and filename pattern.
    fn find_files_by_type(&self, data_type: DataType, extra_pattern: Option<&str>) -> Vec<PathBuf> {
        if !self.files.data_dir.is_dir() {
            warn!(
                source = SOURCE_NAME,
                dir = %self.files.data_dir.display(),
                "data directory does not exist"
            );
            return Vec::new();
        }

        let mut patterns: Vec<String> = FILE_PATTERNS
            .iter()
            .find(|(dt, _)| *dt == data_type)
            .map(|(_, ps)| ps.iter().map(|p| p.to_string()).collect())
            .unwrap_or_default();
        if let Some(extra) = extra_pattern {
            patterns.push(extra.to_lowercase());
        }

        let mut files = Vec::new();
        collect_files(&self.files.data_dir, &mut files);
        files.retain(|path| {
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !self.files.formats.iter().any(|f| f.eq_ignore_ascii_case(&extension)) {
                return false;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            patterns.iter().any(|p| stem.contains(p.as_str()))
        });
        files.sort();
        files
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn stats(&self) -> &SourceStats {
        &self.stats
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn health_check(&self) -> bool {
        self.files.data_dir.is_dir()
    }

    async fn extract_products(&self, request: &ExtractRequest) -> ExtractionResult {
        self.extract_by_type(DataType::Products, request).await
    }

    async fn extract_categories(&self, request: &ExtractRequest) -> ExtractionResult {
        self.extract_by_type(DataType::Categories, request).await
    }

    async fn extract_providers(&self, request: &ExtractRequest) -> ExtractionResult {
        self.extract_by_type(DataType::Providers, request).await
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

fn extract_from_file(path: &Path, default_delimiter: &str) -> Result<Vec<Record>> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "json" => extract_from_json(path),
        "jsonl" => extract_from_jsonl(path),
        "csv" | "tsv" => extract_from_csv(path, default_delimiter),
        other => Err(EtlError::Processing {
            message: format!("Unsupported file format: {}", other),
        }),
    }
}

fn extract_from_json(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(ref obj) => {
            let wrapped = WRAPPER_KEYS
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_array).cloned());
            match wrapped {
                Some(items) => items,
                None => vec![value],
            }
        }
        _ => {
            warn!(file = %path.display(), "unexpected JSON structure");
            Vec::new()
        }
    };

    Ok(items.into_iter().filter_map(Record::from_value).collect())
}

fn extract_from_jsonl(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                if let Some(record) = Record::from_value(value) {
                    records.push(record);
                }
            }
            Err(e) => {
                warn!(
                    file = %path.display(),
                    line = line_number + 1,
                    error = %e,
                    "skipping invalid JSON line"
                );
            }
        }
    }
    Ok(records)
}

fn extract_from_csv(path: &Path, default_delimiter: &str) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)?;
    let delimiter = sniff_delimiter(&content)
        .unwrap_or_else(|| default_delimiter.bytes().next().unwrap_or(b','));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (row_number, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(file = %path.display(), row = row_number + 1, error = %e, "skipping bad row");
                continue;
            }
        };
        let mut fields = Map::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            if header.is_empty() {
                continue;
            }
            if let Some(converted) = convert_csv_value(value) {
                fields.insert(header.clone(), converted);
            }
        }
        if !fields.is_empty() {
            records.push(Record::from_map(fields));
        }
    }
    Ok(records)
}

/// Picks the most frequent candidate delimiter in the header line.
fn sniff_delimiter(content: &str) -> Option<u8> {
    let header = content.lines().next()?;
    [b',', b';', b'\t', b'|']
        .into_iter()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
}

/// CSV cell coercion. Deliberately loose so round-trips through text keep
/// their types: blanks and null-ish tokens vanish, boolean tokens become
/// booleans (`1`/`0` included), numeric-looking strings become numbers.
fn convert_csv_value(value: &str) -> Option<Value> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let lower = value.to_lowercase();
    if matches!(lower.as_str(), "null" | "none" | "n/a") {
        return None;
    }
    if matches!(lower.as_str(), "true" | "yes" | "1") {
        return Some(Value::Bool(true));
    }
    if matches!(lower.as_str(), "false" | "no" | "0") {
        return Some(Value::Bool(false));
    }
    if value.contains('.') {
        if let Ok(f) = value.parse::<f64>() {
            return serde_json::Number::from_f64(f).map(Value::Number);
        }
    } else if let Ok(i) = value.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    Some(Value::String(value.to_string()))
}
