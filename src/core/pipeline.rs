use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::EtlConfig;
use crate::domain::model::{
    CollectionSpec, DataType, ExtractRequest, ExtractionResult, LoadResult, Record,
    TransformationResult,
};
use crate::domain::ports::{Extractor, Loader, Transformer};
use crate::extractors::{CatalogApiExtractor, FileExtractor, ProtocolExtractor};
use crate::loaders::VectorStoreLoader;
use crate::transformers::EmbeddingGenerator;
use crate::utils::error::Result;

/// Page size used when translating `max_records` into pagination.
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub duration_seconds: f64,
    pub extracted: usize,
    pub transformed: usize,
    pub loaded: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub components: BTreeMap<String, bool>,
    pub overall: bool,
}

#[derive(Default)]
struct RunStats {
    extracted: usize,
    transformed: usize,
    loaded: usize,
    errors: Vec<String>,
}

/// Orchestrates extract, transform, and load per data type. Stage
/// failures are folded into the summary; a run always finishes.
pub struct EtlPipeline {
    config: EtlConfig,
}

impl EtlPipeline {
    pub fn new(config: EtlConfig) -> Self {
        Self { config }
    }

    pub async fn run_full_pipeline(
        &self,
        data_types: &[DataType],
        max_records: Option<usize>,
    ) -> RunSummary {
        let started = Instant::now();
        info!(?data_types, ?max_records, "starting pipeline run");

        let mut stats = RunStats::default();
        for &data_type in data_types {
            info!(data_type = %data_type, "processing data type");
            if let Err(e) = self.process_data_type(data_type, max_records, &mut stats).await {
                // configuration faults: record and move to the next type
                error!(data_type = %data_type, error = %e, "data type failed");
                stats.errors.push(e.to_string());
            }
        }

        let summary = RunSummary {
            success: stats.loaded > 0,
            duration_seconds: started.elapsed().as_secs_f64(),
            extracted: stats.extracted,
            transformed: stats.transformed,
            loaded: stats.loaded,
            errors: stats.errors,
        };
        info!(
            success = summary.success,
            extracted = summary.extracted,
            transformed = summary.transformed,
            loaded = summary.loaded,
            errors = summary.errors.len(),
            "pipeline run finished"
        );
        summary
    }

    /// Products only, capped at 50 records.
    pub async fn test_pipeline(&self) -> RunSummary {
        info!("running pipeline test with limited data");
        self.run_full_pipeline(&[DataType::Products], Some(50)).await
    }

    async fn process_data_type(
        &self,
        data_type: DataType,
        max_records: Option<usize>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let extracted = self.extract_data(data_type, max_records).await?;
        if !extracted.success {
            warn!(data_type = %data_type, errors = ?extracted.errors, "extraction failed");
            stats.errors.extend(extracted.errors);
            return Ok(());
        }
        stats.extracted += extracted.total_records;
        info!(
            data_type = %data_type,
            records = extracted.total_records,
            source = %extracted.source,
            "extraction finished"
        );

        let transformed = self.transform_data(extracted.data).await?;
        if !transformed.success {
            warn!(data_type = %data_type, errors = ?transformed.errors, "transformation failed");
            stats.errors.extend(transformed.errors);
            return Ok(());
        }
        stats.transformed += transformed.output_records;
        stats.errors.extend(transformed.errors.clone());
        info!(
            data_type = %data_type,
            records = transformed.output_records,
            "transformation finished"
        );

        let collection = self.config.collection_name(data_type);
        let loaded = self.load_data(transformed.data, &collection).await?;
        if !loaded.success {
            warn!(data_type = %data_type, errors = ?loaded.errors, "loading failed");
            stats.errors.extend(loaded.errors);
            return Ok(());
        }
        stats.loaded += loaded.loaded_count;
        stats.errors.extend(loaded.errors);
        info!(
            data_type = %data_type,
            records = loaded.loaded_count,
            collection,
            "loading finished"
        );
        Ok(())
    }

    /// Picks the first enabled and healthy source: catalog API, then the
    /// protocol gateway, then local files.
    async fn extract_data(
        &self,
        data_type: DataType,
        max_records: Option<usize>,
    ) -> Result<ExtractionResult> {
        let request = extract_request(max_records);

        if self.config.catalog_api.enabled {
            let extractor = CatalogApiExtractor::new(
                self.config.extraction.clone(),
                self.config.catalog_api.clone(),
            )?;
            if extractor.health_check().await {
                return Ok(truncate_result(
                    extractor.extract(data_type, &request).await,
                    max_records,
                ));
            }
            warn!("catalog API unhealthy, trying next source");
        }

        if self.config.protocol_api.enabled {
            let extractor = ProtocolExtractor::new(
                self.config.extraction.clone(),
                self.config.protocol_api.clone(),
            )?;
            if extractor.health_check().await {
                return Ok(truncate_result(
                    extractor.extract(data_type, &request).await,
                    max_records,
                ));
            }
            warn!("protocol gateway unhealthy, trying next source");
        }

        if self.config.file_source.enabled {
            let extractor = FileExtractor::new(
                self.config.extraction.clone(),
                self.config.file_source.clone(),
            )?;
            return Ok(truncate_result(
                extractor.extract(data_type, &request).await,
                max_records,
            ));
        }

        Ok(ExtractionResult::failed(
            "pipeline",
            vec!["No working extractors available".to_string()],
            Default::default(),
        ))
    }

    /// Single embedding stage; records keep their extracted shape and
    /// gain vectors.
    async fn transform_data(&self, records: Vec<Record>) -> Result<TransformationResult> {
        let transformer = EmbeddingGenerator::new(
            self.config.transformation.clone(),
            self.config.embedding.clone(),
        )?;
        Ok(transformer.transform_batch(records).await)
    }

    async fn load_data(&self, records: Vec<Record>, collection: &str) -> Result<LoadResult> {
        let loader = VectorStoreLoader::new(
            self.config.load.clone(),
            self.config.vector_store.clone(),
        )?;

        if !loader.health_check().await {
            return Ok(LoadResult::failed(
                loader.loader_name(),
                records.len(),
                vec!["Vector store health check failed".to_string()],
            ));
        }

        let spec = CollectionSpec {
            vector_size: self.config.embedding.dimensions,
            distance: "Cosine".to_string(),
        };
        let result = loader.load_records(&records, collection, &spec).await;

        if result.success && result.loaded_count > 0 {
            if let Err(e) = loader.optimize_collection(collection).await {
                warn!(collection, error = %e, "collection optimization failed");
            }
        }
        Ok(result)
    }

    /// Probes every configured component independently; one probe failing
    /// never prevents the others from running.
    pub async fn health_check(&self) -> HealthReport {
        info!("running pipeline health check");
        let mut components = BTreeMap::new();

        let catalog_healthy = match CatalogApiExtractor::new(
            self.config.extraction.clone(),
            self.config.catalog_api.clone(),
        ) {
            Ok(extractor) => extractor.health_check().await,
            Err(e) => {
                error!(error = %e, "catalog API health check failed");
                false
            }
        };
        components.insert("catalog_api".to_string(), catalog_healthy);

        let embedding_healthy = match EmbeddingGenerator::new(
            self.config.transformation.clone(),
            self.config.embedding.clone(),
        ) {
            Ok(generator) => generator.probe().await,
            Err(e) => {
                error!(error = %e, "embedding service health check failed");
                false
            }
        };
        components.insert("embedding_api".to_string(), embedding_healthy);

        let store_healthy = match VectorStoreLoader::new(
            self.config.load.clone(),
            self.config.vector_store.clone(),
        ) {
            Ok(loader) => loader.health_check().await,
            Err(e) => {
                error!(error = %e, "vector store health check failed");
                false
            }
        };
        components.insert("vector_store".to_string(), store_healthy);

        let overall = components.values().all(|healthy| *healthy);
        info!(?components, overall, "health check finished");
        HealthReport {
            components,
            overall,
        }
    }
}

fn extract_request(max_records: Option<usize>) -> ExtractRequest {
    let mut request = ExtractRequest::default();
    if let Some(max) = max_records {
        let limit = max.clamp(1, PAGE_LIMIT);
        request.limit = Some(limit);
        request.max_pages = Some(max.div_ceil(limit));
    }
    request
}

/// File sources ignore pagination, so the cap is applied to the result.
fn truncate_result(mut result: ExtractionResult, max_records: Option<usize>) -> ExtractionResult {
    if let Some(max) = max_records {
        if result.data.len() > max {
            result.data.truncate(max);
            result.total_records = result.data.len();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_extract_request_pagination_math() {
        let request = extract_request(Some(50));
        assert_eq!(request.limit, Some(50));
        assert_eq!(request.max_pages, Some(1));

        let request = extract_request(Some(250));
        assert_eq!(request.limit, Some(100));
        assert_eq!(request.max_pages, Some(3));

        let request = extract_request(None);
        assert_eq!(request.limit, None);
        assert_eq!(request.max_pages, None);
    }

    #[test]
    fn test_truncate_result_caps_records() {
        let data: Vec<Record> = (0..10)
            .map(|i| Record::from_value(json!({"id": format!("r{i}")})).unwrap())
            .collect();
        let result = ExtractionResult::ok("file", data, vec![], Map::new());
        let truncated = truncate_result(result, Some(4));
        assert_eq!(truncated.data.len(), 4);
        assert_eq!(truncated.total_records, 4);
    }

    #[tokio::test]
    async fn test_run_without_sources_reports_failure() {
        let pipeline = EtlPipeline::new(EtlConfig::default());
        let summary = pipeline.run_full_pipeline(&[DataType::Products], None).await;
        assert!(!summary.success);
        assert_eq!(summary.extracted, 0);
        assert!(summary
            .errors
            .iter()
            .any(|e| e.contains("No working extractors available")));
    }
}
