use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::core::rate_limit::RateLimiter;
use crate::domain::model::ExtractionResult;
use crate::utils::error::Result;

/// Advisory request counters kept by each source. Updated with relaxed
/// atomics; snapshots may lag in-flight work.
#[derive(Debug, Default)]
pub struct SourceStats {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_records: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_records: u64,
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_records: self.total_records.load(Ordering::Relaxed),
        }
    }
}

/// Runs `op` up to `attempts` times with exponential backoff (1s, 2s, 4s...).
///
/// Every attempt passes the rate limiter first. An attempt counts as failed
/// when `op` errors or returns an unsuccessful result. No sleep follows the
/// final attempt; exhaustion yields a failed result with a single synthetic
/// error naming the attempt count and the last fault.
pub async fn execute_with_retry<F, Fut>(
    limiter: &RateLimiter,
    stats: &SourceStats,
    attempts: u32,
    source: &str,
    mut op: F,
) -> ExtractionResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ExtractionResult>>,
{
    let attempts = attempts.max(1);
    let mut last_fault: Option<String> = None;

    for attempt in 0..attempts {
        limiter.acquire().await;
        stats.total_requests.fetch_add(1, Ordering::Relaxed);

        match op().await {
            Ok(result) if result.success => {
                stats.successful_requests.fetch_add(1, Ordering::Relaxed);
                stats
                    .total_records
                    .fetch_add(result.total_records as u64, Ordering::Relaxed);
                return result;
            }
            Ok(result) => {
                stats.failed_requests.fetch_add(1, Ordering::Relaxed);
                last_fault = result.errors.last().cloned();
                warn!(
                    source,
                    attempt = attempt + 1,
                    attempts,
                    "extraction attempt returned no data"
                );
            }
            Err(e) => {
                stats.failed_requests.fetch_add(1, Ordering::Relaxed);
                last_fault = Some(e.to_string());
                warn!(
                    source,
                    attempt = attempt + 1,
                    attempts,
                    error = %e,
                    "extraction attempt failed"
                );
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(Duration::from_secs(1u64 << attempt)).await;
        }
    }

    let message = match last_fault {
        Some(fault) => format!("All {} attempts failed: {}", attempts, fault),
        None => format!("All {} attempts failed", attempts),
    };
    let mut metadata = serde_json::Map::new();
    metadata.insert("attempts".to_string(), attempts.into());
    ExtractionResult::failed(source, vec![message], metadata)
}
