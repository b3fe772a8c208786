use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::core::rate_limit::RateLimiter;
use crate::domain::model::{Record, TransformationConfig};
use crate::domain::ports::Transformer;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_url;

const TRANSFORMER_NAME: &str = "embedding_generator";

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "text-embedding-004".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_fields_to_embed() -> Vec<String> {
    vec!["name".to_string(), "description".to_string()]
}

fn default_max_text_length() -> usize {
    2000
}

fn default_rate_limit_rps() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_fields_to_embed")]
    pub fields_to_embed: Vec<String>,
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            dimensions: default_dimensions(),
            fields_to_embed: default_fields_to_embed(),
            max_text_length: default_max_text_length(),
            rate_limit_rps: default_rate_limit_rps(),
        }
    }
}

/// Attaches vector embeddings to records via an embedding API. Failures
/// stay local to the record: the record keeps flowing with
/// `embedding: null` and an `embedding_error` explaining why.
pub struct EmbeddingGenerator {
    config: TransformationConfig,
    settings: EmbeddingConfig,
    client: Client,
    limiter: RateLimiter,
}

impl EmbeddingGenerator {
    pub fn new(config: TransformationConfig, settings: EmbeddingConfig) -> Result<Self> {
        validate_url("embedding.endpoint", &settings.endpoint)?;
        if settings.api_key.is_empty() {
            warn!("no embedding API key configured, embedding requests will fail");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let limiter = RateLimiter::new(settings.rate_limit_rps);

        Ok(Self {
            config,
            settings,
            client,
            limiter,
        })
    }

    /// Walks the configured fields collecting embeddable text: string
    /// leaves, name/description of objects, and string list items.
    fn extract_embedding_text(&self, record: &Record) -> String {
        let mut parts: Vec<String> = Vec::new();
        for field in &self.settings.fields_to_embed {
            let value = if field.contains('.') {
                record.get_path(field)
            } else {
                record.get(field)
            };
            match value {
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    parts.push(s.trim().to_string());
                }
                Some(Value::Object(obj)) => {
                    for key in ["name", "description"] {
                        if let Some(s) = obj.get(key).and_then(Value::as_str) {
                            let s = s.trim();
                            if !s.is_empty() {
                                parts.push(s.to_string());
                            }
                        }
                    }
                }
                Some(Value::Array(items)) => {
                    parts.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty()),
                    );
                }
                _ => {}
            }
        }

        let combined = parts.join(" ");
        if combined.chars().count() <= self.settings.max_text_length {
            return combined;
        }
        let truncated: String = combined
            .chars()
            .take(self.settings.max_text_length)
            .collect();
        match truncated.rsplit_once(' ') {
            Some((head, _)) => head.to_string(),
            None => truncated,
        }
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f64>> {
        self.limiter.acquire().await;

        let url = format!(
            "{}/v1/models/{}:embedContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );
        let body = json!({
            "model": format!("models/{}", self.settings.model),
            "content": {"parts": [{"text": text}]},
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EtlError::Processing {
                message: format!(
                    "embedding request failed with status {}",
                    response.status().as_u16()
                ),
            });
        }

        let payload: Value = response.json().await?;
        let values = payload
            .get("embedding")
            .and_then(|e| e.get("values"))
            .and_then(Value::as_array)
            .ok_or_else(|| EtlError::Processing {
                message: "embedding response missing embedding.values".to_string(),
            })?;
        let embedding: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();

        if embedding.len() != self.settings.dimensions {
            return Err(EtlError::Processing {
                message: format!(
                    "invalid embedding dimensions: got {}, expected {}",
                    embedding.len(),
                    self.settings.dimensions
                ),
            });
        }
        Ok(embedding)
    }

    /// One dimension-checked probe embedding; used by health checks.
    pub async fn probe(&self) -> bool {
        self.generate_embedding("test connection").await.is_ok()
    }

    fn has_embeddable_content(&self, record: &Record) -> bool {
        self.settings.fields_to_embed.iter().any(|field| {
            let value = if field.contains('.') {
                record.get_path(field)
            } else {
                record.get(field)
            };
            match value {
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Object(o)) => !o.is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(Value::Number(_)) | Some(Value::Bool(_)) => true,
                _ => false,
            }
        })
    }
}

#[async_trait]
impl Transformer for EmbeddingGenerator {
    fn transformer_name(&self) -> &str {
        TRANSFORMER_NAME
    }

    fn config(&self) -> &TransformationConfig {
        &self.config
    }

    fn validate_input(&self, record: &Record) -> bool {
        !record.is_empty() && self.has_embeddable_content(record)
    }

    async fn transform_record(&self, record: &Record) -> Result<Record> {
        if !self.validate_input(record) {
            return Err(EtlError::Validation {
                message: "record has no embeddable content".to_string(),
            });
        }

        let mut out = record.clone();
        let text = self.extract_embedding_text(record);
        if text.is_empty() {
            warn!(
                record_id = %record.id().unwrap_or_default(),
                "no text content found for embedding"
            );
            out.insert("embedding".to_string(), Value::Null);
            out.insert(
                "embedding_error".to_string(),
                "No text content found".into(),
            );
            return Ok(out);
        }

        match self.generate_embedding(&text).await {
            Ok(embedding) => {
                out.insert("embedding_dimensions".to_string(), embedding.len().into());
                out.insert("embedding".to_string(), json!(embedding));
                out.insert(
                    "embedding_model".to_string(),
                    self.settings.model.clone().into(),
                );
                out.insert(
                    "embedding_generated_at".to_string(),
                    Utc::now().to_rfc3339().into(),
                );
                out.insert(
                    "embedding_text_length".to_string(),
                    text.chars().count().into(),
                );
            }
            Err(e) => {
                warn!(
                    record_id = %record.id().unwrap_or_default(),
                    error = %e,
                    "failed to generate embedding"
                );
                out.insert("embedding".to_string(), Value::Null);
                out.insert("embedding_error".to_string(), e.to_string().into());
            }
        }
        Ok(out)
    }

    /// Records without an embedding pass through so downstream stages can
    /// decide what to do with them; present-but-malformed embeddings are
    /// dropped.
    fn validate_output(&self, records: Vec<Record>) -> (Vec<Record>, Vec<String>) {
        let mut valid = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for (i, record) in records.into_iter().enumerate() {
            match record.get("embedding") {
                None | Some(Value::Null) => valid.push(record),
                Some(Value::Array(embedding)) => {
                    if embedding.len() != self.settings.dimensions {
                        errors.push(format!(
                            "Record {i}: invalid embedding dimensions {}, expected {}",
                            embedding.len(),
                            self.settings.dimensions
                        ));
                        continue;
                    }
                    let values_ok = embedding
                        .iter()
                        .all(|v| v.as_f64().is_some_and(|f| f.abs() <= 1.0));
                    if !values_ok {
                        errors.push(format!("Record {i}: invalid embedding values"));
                        continue;
                    }
                    valid.push(record);
                }
                Some(_) => errors.push(format!("Record {i}: embedding is not a list")),
            }
        }
        (valid, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn generator(endpoint: &str, dimensions: usize) -> EmbeddingGenerator {
        let settings = EmbeddingConfig {
            endpoint: endpoint.to_string(),
            api_key: "test-key".to_string(),
            dimensions,
            rate_limit_rps: 1000,
            ..EmbeddingConfig::default()
        };
        EmbeddingGenerator::new(TransformationConfig::default(), settings).unwrap()
    }

    fn record(name: &str, description: &str) -> Record {
        Record::from_value(json!({
            "id": format!("prod_{name}"),
            "name": name,
            "description": description,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_transform_record_attaches_embedding() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/models/text-embedding-004:embedContent")
                    .header("x-goog-api-key", "test-key");
                then.status(200)
                    .json_body(json!({"embedding": {"values": [0.1, 0.2, 0.3]}}));
            })
            .await;

        let g = generator(&server.base_url(), 3);
        let out = g
            .transform_record(&record("Jam", "Sweet organic jam"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(out.get("embedding"), Some(&json!([0.1, 0.2, 0.3])));
        assert_eq!(out.get("embedding_dimensions"), Some(&json!(3)));
        assert_eq!(out.get_str("embedding_model"), Some("text-embedding-004"));
        assert!(out.get("embedding_generated_at").is_some());
        assert!(out.get("embedding_error").is_none());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_marks_record_only() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/models/text-embedding-004:embedContent");
                then.status(200)
                    .json_body(json!({"embedding": {"values": [0.1, 0.2]}}));
            })
            .await;

        let g = generator(&server.base_url(), 3);
        let out = g.transform_record(&record("Jam", "jam")).await.unwrap();

        assert_eq!(out.get("embedding"), Some(&Value::Null));
        let error = out.get_str("embedding_error").unwrap();
        assert!(error.contains("invalid embedding dimensions"), "{error}");
        assert_eq!(out.get_str("name"), Some("Jam"));
    }

    #[tokio::test]
    async fn test_failed_sibling_does_not_affect_batch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/models/text-embedding-004:embedContent")
                    .json_body_partial(json!({"content": {"parts": [{"text": "Good good product"}]}}).to_string());
                then.status(200)
                    .json_body(json!({"embedding": {"values": [0.1, 0.2, 0.3]}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/models/text-embedding-004:embedContent")
                    .json_body_partial(json!({"content": {"parts": [{"text": "Bad bad product"}]}}).to_string());
                then.status(500).body("boom");
            })
            .await;

        let g = generator(&server.base_url(), 3);
        let result = g
            .transform_batch(vec![
                record("Good", "good product"),
                record("Bad", "bad product"),
            ])
            .await;

        assert_eq!(result.data.len(), 2);
        let good = result.data.iter().find(|r| r.get_str("name") == Some("Good")).unwrap();
        let bad = result.data.iter().find(|r| r.get_str("name") == Some("Bad")).unwrap();
        assert_eq!(good.get("embedding"), Some(&json!([0.1, 0.2, 0.3])));
        assert_eq!(bad.get("embedding"), Some(&Value::Null));
        assert!(bad.get_str("embedding_error").is_some());
    }

    #[tokio::test]
    async fn test_no_embeddable_content_is_an_input_error() {
        let server = MockServer::start_async().await;
        let g = generator(&server.base_url(), 3);
        let empty = Record::from_value(json!({"id": "x"})).unwrap();
        assert!(!g.validate_input(&empty));
        assert!(g.transform_record(&empty).await.is_err());
    }

    #[test]
    fn test_extract_embedding_text_walks_shapes() {
        let settings = EmbeddingConfig {
            fields_to_embed: vec![
                "name".to_string(),
                "category".to_string(),
                "tags".to_string(),
            ],
            ..EmbeddingConfig::default()
        };
        let g = EmbeddingGenerator::new(TransformationConfig::default(), settings).unwrap();
        let record = Record::from_value(json!({
            "name": "Organic Jam",
            "category": {"name": "Food & Beverages", "description": "Edibles"},
            "tags": ["organic", "fruit"],
        }))
        .unwrap();
        assert_eq!(
            g.extract_embedding_text(&record),
            "Organic Jam Food & Beverages Edibles organic fruit"
        );
    }

    #[test]
    fn test_extract_embedding_text_truncates_on_word_boundary() {
        let settings = EmbeddingConfig {
            max_text_length: 20,
            ..EmbeddingConfig::default()
        };
        let g = EmbeddingGenerator::new(TransformationConfig::default(), settings).unwrap();
        let record = Record::from_value(json!({
            "name": "alpha beta gamma delta epsilon",
            "description": "",
        }))
        .unwrap();
        let text = g.extract_embedding_text(&record);
        assert!(text.chars().count() <= 20);
        assert!(!text.ends_with(' '));
        assert_eq!(text, "alpha beta gamma");
    }

    #[test]
    fn test_validate_output_filters_malformed_embeddings() {
        let g = generator("http://localhost:1", 3);
        let ok = Record::from_value(json!({"id": "a", "embedding": [0.1, 0.2, 0.3]})).unwrap();
        let null = Record::from_value(json!({"id": "b", "embedding": null})).unwrap();
        let wrong_dims = Record::from_value(json!({"id": "c", "embedding": [0.1]})).unwrap();
        let out_of_range =
            Record::from_value(json!({"id": "d", "embedding": [0.1, 2.0, 0.3]})).unwrap();

        let (valid, errors) = g.validate_output(vec![ok, null, wrong_dims, out_of_range]);
        assert_eq!(valid.len(), 2);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("dimensions"));
        assert!(errors[1].contains("invalid embedding values"));
    }
}
