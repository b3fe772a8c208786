use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::model::{CollectionSpec, LoadConfig, LoadResult, Record};
use crate::domain::ports::Loader;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_url;

const LOADER_NAME: &str = "vector_store";

/// Indexing kicks in early so small loads still get indexed.
const CREATE_INDEXING_THRESHOLD: u64 = 50;
/// After a bulk load the threshold drops to index everything present.
const OPTIMIZE_INDEXING_THRESHOLD: u64 = 1;

fn default_url() -> String {
    "http://localhost:6333".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: String::new(),
        }
    }
}

/// Loads embedded records into a vector database over its HTTP API.
/// Points carry the full record as payload, minus the vector itself.
pub struct VectorStoreLoader {
    config: LoadConfig,
    settings: VectorStoreConfig,
    client: Client,
}

impl VectorStoreLoader {
    pub fn new(config: LoadConfig, settings: VectorStoreConfig) -> Result<Self> {
        validate_url("vector_store.url", &settings.url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            settings,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.settings.api_key.is_empty() {
            builder
        } else {
            builder.header("api-key", &self.settings.api_key)
        }
    }

    pub async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let response = self
            .request(
                self.client
                    .get(self.endpoint(&format!("/collections/{collection}"))),
            )
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn create_collection(&self, collection: &str, spec: &CollectionSpec) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": spec.vector_size,
                "distance": spec.distance,
            },
            "optimizers_config": {
                "default_segment_number": 1,
                "indexing_threshold": CREATE_INDEXING_THRESHOLD,
            },
        });
        let response = self
            .request(
                self.client
                    .put(self.endpoint(&format!("/collections/{collection}")))
                    .json(&body),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EtlError::Processing {
                message: format!(
                    "failed to create collection {collection}: status {}",
                    response.status().as_u16()
                ),
            });
        }
        info!(collection, vector_size = spec.vector_size, "created collection");
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str, spec: &CollectionSpec) -> Result<()> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }
        if !self.config.create_collections {
            return Err(EtlError::Processing {
                message: format!("collection {collection} does not exist"),
            });
        }
        self.create_collection(collection, spec).await
    }

    /// Converts a record into an upsert point. The point id is a stable
    /// hash of the record id so reloads overwrite instead of duplicating.
    fn record_to_point(&self, record: &Record, spec: &CollectionSpec) -> Result<Value> {
        let id = record.id().ok_or_else(|| EtlError::Validation {
            message: "record missing id".to_string(),
        })?;
        let embedding = match record.get("embedding") {
            Some(Value::Array(values)) => values,
            _ => {
                return Err(EtlError::Validation {
                    message: "record missing embedding vector".to_string(),
                })
            }
        };
        if embedding.len() != spec.vector_size {
            return Err(EtlError::Validation {
                message: format!(
                    "invalid embedding: expected {} dimensions, got {}",
                    spec.vector_size,
                    embedding.len()
                ),
            });
        }

        let mut payload = record.clone();
        payload.remove("embedding");
        payload.insert("indexed_at", Utc::now().to_rfc3339().into());
        payload.insert("vector_dimensions", embedding.len().into());
        payload.insert("original_id", id.clone().into());

        Ok(json!({
            "id": fnv1a_64(&id),
            "vector": embedding,
            "payload": payload.into_value(),
        }))
    }

    async fn upsert_points(&self, collection: &str, points: &[Value]) -> Result<()> {
        let response = self
            .request(
                self.client
                    .put(self.endpoint(&format!("/collections/{collection}/points")))
                    .query(&[("wait", "true")])
                    .json(&json!({"points": points})),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EtlError::Processing {
                message: format!(
                    "upsert to {collection} failed with status {}",
                    response.status().as_u16()
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Loader for VectorStoreLoader {
    fn loader_name(&self) -> &str {
        LOADER_NAME
    }

    fn config(&self) -> &LoadConfig {
        &self.config
    }

    async fn health_check(&self) -> bool {
        let request = self.request(self.client.get(self.endpoint("/healthz")));
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "vector store health check failed");
                false
            }
        }
    }

    async fn load_records(
        &self,
        records: &[Record],
        collection: &str,
        spec: &CollectionSpec,
    ) -> LoadResult {
        let mut points = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        let mut failed = 0usize;

        for (i, record) in records.iter().enumerate() {
            match self.record_to_point(record, spec) {
                Ok(point) => points.push(point),
                Err(e) => {
                    errors.push(format!("Record {i}: {e}"));
                    failed += 1;
                }
            }
        }

        if points.is_empty() {
            errors.push("No valid points to insert".to_string());
            return LoadResult::failed(LOADER_NAME, records.len(), errors);
        }

        if let Err(e) = self.ensure_collection(collection, spec).await {
            error!(collection, error = %e, "collection setup failed");
            errors.push(e.to_string());
            return LoadResult::failed(LOADER_NAME, records.len(), errors);
        }

        let mut loaded = 0usize;
        let mut batches = 0usize;
        let batch_size = self.config.batch_size.max(1);
        for batch in points.chunks(batch_size) {
            batches += 1;
            match self.upsert_points(collection, batch).await {
                Ok(()) => loaded += batch.len(),
                Err(e) => {
                    failed += batch.len();
                    errors.push(format!("Batch {batches}: {e}"));
                }
            }
        }
        info!(collection, loaded, failed, "load finished");

        let mut metadata = Map::new();
        metadata.insert("collection".to_string(), collection.into());
        metadata.insert("batches".to_string(), batches.into());
        LoadResult::completed(LOADER_NAME, loaded, failed, errors, metadata)
    }

    async fn optimize_collection(&self, collection: &str) -> Result<()> {
        let body = json!({
            "optimizers_config": {"indexing_threshold": OPTIMIZE_INDEXING_THRESHOLD},
        });
        let response = self
            .request(
                self.client
                    .patch(self.endpoint(&format!("/collections/{collection}")))
                    .json(&body),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EtlError::Processing {
                message: format!(
                    "optimize of {collection} failed with status {}",
                    response.status().as_u16()
                ),
            });
        }
        info!(collection, "collection optimization requested");
        Ok(())
    }
}

/// 64-bit FNV-1a. Deterministic across runs, unlike the default hasher.
fn fnv1a_64(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;

    fn loader(url: &str) -> VectorStoreLoader {
        VectorStoreLoader::new(
            LoadConfig {
                batch_size: 2,
                ..LoadConfig::default()
            },
            VectorStoreConfig {
                url: url.to_string(),
                api_key: String::new(),
            },
        )
        .unwrap()
    }

    fn spec() -> CollectionSpec {
        CollectionSpec {
            vector_size: 3,
            distance: "Cosine".to_string(),
        }
    }

    fn embedded_record(id: &str) -> Record {
        Record::from_value(json!({
            "id": id,
            "name": format!("Product {id}"),
            "embedding": [0.1, 0.2, 0.3],
        }))
        .unwrap()
    }

    #[test]
    fn test_fnv1a_is_stable() {
        assert_eq!(fnv1a_64("prod_1"), fnv1a_64("prod_1"));
        assert_ne!(fnv1a_64("prod_1"), fnv1a_64("prod_2"));
        // reference value for the empty string
        assert_eq!(fnv1a_64(""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn test_record_to_point_excludes_embedding_from_payload() {
        let l = loader("http://localhost:1");
        let point = l.record_to_point(&embedded_record("prod_1"), &spec()).unwrap();
        assert_eq!(point["vector"], json!([0.1, 0.2, 0.3]));
        assert!(point["payload"].get("embedding").is_none());
        assert_eq!(point["payload"]["original_id"], json!("prod_1"));
        assert_eq!(point["payload"]["vector_dimensions"], json!(3));
        assert_eq!(point["id"], json!(fnv1a_64("prod_1")));
    }

    #[test]
    fn test_record_to_point_rejects_missing_or_short_embedding() {
        let l = loader("http://localhost:1");
        let missing = Record::from_value(json!({"id": "a", "name": "x"})).unwrap();
        assert!(l.record_to_point(&missing, &spec()).is_err());
        let short = Record::from_value(json!({"id": "b", "embedding": [0.1]})).unwrap();
        let err = l.record_to_point(&short, &spec()).unwrap_err();
        assert!(err.to_string().contains("expected 3 dimensions"));
    }

    #[tokio::test]
    async fn test_load_records_creates_collection_and_upserts() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/catalog_products");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/catalog_products")
                    .json_body_partial(json!({"vectors": {"size": 3, "distance": "Cosine"}}).to_string());
                then.status(200).json_body(json!({"result": true}));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/catalog_products/points")
                    .query_param("wait", "true");
                then.status(200).json_body(json!({"result": {"status": "completed"}}));
            })
            .await;

        let l = loader(&server.base_url());
        let records = vec![
            embedded_record("p1"),
            embedded_record("p2"),
            embedded_record("p3"),
        ];
        let result = l.load_records(&records, "catalog_products", &spec()).await;

        exists.assert_async().await;
        create.assert_async().await;
        // batch_size 2: three points go out as two upserts
        upsert.assert_hits_async(2).await;
        assert!(result.success);
        assert_eq!(result.loaded_count, 3);
        assert_eq!(result.failed_count, 0);
    }

    #[tokio::test]
    async fn test_batch_failure_fails_only_that_batch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/catalog_products");
                then.status(200).json_body(json!({"result": {}}));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/catalog_products/points")
                    .body_contains("p1");
                then.status(200).json_body(json!({"result": {"status": "completed"}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/catalog_products/points")
                    .body_contains("p3");
                then.status(503).body("overloaded");
            })
            .await;

        let l = loader(&server.base_url());
        let records = vec![
            embedded_record("p1"),
            embedded_record("p2"),
            embedded_record("p3"),
        ];
        let result = l.load_records(&records, "catalog_products", &spec()).await;

        first.assert_async().await;
        assert!(result.success);
        assert_eq!(result.loaded_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("status 503"));
    }

    #[tokio::test]
    async fn test_invalid_records_counted_without_aborting() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/catalog_products");
                then.status(200).json_body(json!({"result": {}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/catalog_products/points");
                then.status(200).json_body(json!({"result": {"status": "completed"}}));
            })
            .await;

        let l = loader(&server.base_url());
        let no_embedding = Record::from_value(json!({"id": "bad", "name": "x"})).unwrap();
        let records = vec![embedded_record("p1"), no_embedding];
        let result = l.load_records(&records, "catalog_products", &spec()).await;

        assert!(result.success);
        assert_eq!(result.loaded_count, 1);
        assert_eq!(result.failed_count, 1);
        assert!(result.errors[0].starts_with("Record 1:"));
    }

    #[tokio::test]
    async fn test_all_invalid_is_a_failed_load() {
        let server = MockServer::start_async().await;
        let l = loader(&server.base_url());
        let records = vec![Record::from_value(json!({"id": "a"})).unwrap()];
        let result = l.load_records(&records, "catalog_products", &spec()).await;
        assert!(!result.success);
        assert_eq!(result.failed_count, 1);
        assert!(result.errors.iter().any(|e| e.contains("No valid points")));
    }

    #[tokio::test]
    async fn test_optimize_patches_indexing_threshold() {
        let server = MockServer::start_async().await;
        let patch = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/collections/catalog_products")
                    .json_body_partial(
                        json!({"optimizers_config": {"indexing_threshold": 1}}).to_string(),
                    );
                then.status(200).json_body(json!({"result": true}));
            })
            .await;

        let l = loader(&server.base_url());
        l.optimize_collection("catalog_products").await.unwrap();
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/healthz");
                then.status(200).body("ok");
            })
            .await;
        let l = loader(&server.base_url());
        assert!(l.health_check().await);

        let down = loader("http://127.0.0.1:1");
        assert!(!down.health_check().await);
    }
}
