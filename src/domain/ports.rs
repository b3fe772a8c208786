use async_trait::async_trait;
use serde_json::Map;

use crate::core::batch::bounded_map;
use crate::core::rate_limit::RateLimiter;
use crate::core::retry::{execute_with_retry, SourceStats};
use crate::domain::model::{
    CollectionSpec, DataType, ExtractRequest, ExtractionConfig, ExtractionResult, LoadConfig,
    LoadResult, Record, TransformationConfig, TransformationResult,
};
use crate::utils::error::Result;

/// A source of catalog data. Implementors supply the three per-type
/// extraction calls; batching, retries, and chunking are provided.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn source_name(&self) -> &str;
    fn config(&self) -> &ExtractionConfig;
    fn stats(&self) -> &SourceStats;
    fn rate_limiter(&self) -> &RateLimiter;

    /// Idempotent; called before the first extraction.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Safe to call after a partial or failed setup.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Reachability probe. Never errors; an unreachable source is `false`.
    async fn health_check(&self) -> bool;

    async fn extract_products(&self, request: &ExtractRequest) -> ExtractionResult;
    async fn extract_categories(&self, request: &ExtractRequest) -> ExtractionResult;
    async fn extract_providers(&self, request: &ExtractRequest) -> ExtractionResult;

    async fn extract(&self, data_type: DataType, request: &ExtractRequest) -> ExtractionResult {
        match data_type {
            DataType::Products => self.extract_products(request).await,
            DataType::Categories => self.extract_categories(request).await,
            DataType::Providers => self.extract_providers(request).await,
        }
    }

    /// Runs many requests concurrently (bounded by `max_workers`), each
    /// wrapped in retry-with-backoff. One result per request, input order.
    async fn extract_batch(
        &self,
        data_type: DataType,
        requests: Vec<ExtractRequest>,
    ) -> Vec<ExtractionResult> {
        let config = self.config();
        bounded_map(requests, config.max_workers, |request| async move {
            execute_with_retry(
                self.rate_limiter(),
                self.stats(),
                config.retry_attempts,
                self.source_name(),
                || async { Ok(self.extract(data_type, &request).await) },
            )
            .await
        })
        .await
    }

    /// One extraction re-chunked into `batch_size` pages, each tagged with
    /// `chunk_index`. Calling again re-runs the extraction.
    async fn stream_extract(
        &self,
        data_type: DataType,
        request: &ExtractRequest,
    ) -> Vec<ExtractionResult> {
        let result = self.extract(data_type, request).await;
        if result.data.is_empty() {
            return Vec::new();
        }
        let chunk_size = self.config().batch_size.max(1);
        result
            .data
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| {
                let mut metadata = result.metadata.clone();
                metadata.insert("chunk_index".to_string(), index.into());
                ExtractionResult::ok(&result.source, chunk.to_vec(), result.errors.clone(), metadata)
            })
            .collect()
    }
}

/// A record-to-record transformation stage. Implementors supply
/// `transform_record`; batch fan-out and validation are provided.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn transformer_name(&self) -> &str;
    fn config(&self) -> &TransformationConfig;

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn transform_record(&self, record: &Record) -> Result<Record>;

    fn validate_input(&self, record: &Record) -> bool {
        !record.is_empty()
    }

    /// Splits transformed records into kept and rejected; default keeps
    /// every non-empty record.
    fn validate_output(&self, records: Vec<Record>) -> (Vec<Record>, Vec<String>) {
        let mut valid = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            if record.is_empty() {
                errors.push(format!("Output record {} is empty", index));
            } else {
                valid.push(record);
            }
        }
        (valid, errors)
    }

    /// Transforms a batch with bounded fan-out. A record that fails input
    /// validation or errors in `transform_record` becomes an error entry;
    /// the rest of the batch is unaffected.
    async fn transform_batch(&self, records: Vec<Record>) -> TransformationResult {
        let config = self.config();
        let input_records = records.len();

        let indexed: Vec<(usize, Record)> = records.into_iter().enumerate().collect();
        let outcomes = bounded_map(indexed, config.max_workers, |(index, record)| async move {
            if !self.validate_input(&record) {
                return Err(format!("Record {}: failed input validation", index));
            }
            self.transform_record(&record)
                .await
                .map_err(|e| format!("Record {}: {}", index, e))
        })
        .await;

        let mut data = Vec::with_capacity(input_records);
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(record) => data.push(record),
                Err(e) => errors.push(e),
            }
        }

        let data = if config.validate_output {
            let (valid, validation_errors) = self.validate_output(data);
            errors.extend(validation_errors);
            valid
        } else {
            data
        };

        let mut metadata = Map::new();
        metadata.insert("batch_size".to_string(), input_records.into());
        metadata.insert("max_workers".to_string(), config.max_workers.into());
        TransformationResult::completed(
            self.transformer_name(),
            input_records,
            data,
            errors,
            metadata,
        )
    }

    /// Processes records in chunks, yielding one result per chunk.
    async fn transform_stream(
        &self,
        records: Vec<Record>,
        batch_size: Option<usize>,
    ) -> Vec<TransformationResult> {
        let chunk_size = batch_size.unwrap_or(self.config().batch_size).max(1);
        let mut results = Vec::new();
        for chunk in records.chunks(chunk_size) {
            results.push(self.transform_batch(chunk.to_vec()).await);
        }
        results
    }
}

/// Destination for transformed records.
#[async_trait]
pub trait Loader: Send + Sync {
    fn loader_name(&self) -> &str;
    fn config(&self) -> &LoadConfig;

    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool;

    async fn load_records(
        &self,
        records: &[Record],
        collection: &str,
        spec: &CollectionSpec,
    ) -> LoadResult;

    async fn optimize_collection(&self, collection: &str) -> Result<()>;
}
