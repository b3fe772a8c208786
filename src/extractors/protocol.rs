use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::rate_limit::RateLimiter;
use crate::core::retry::SourceStats;
use crate::domain::model::{ExtractRequest, ExtractionConfig, ExtractionResult, Record};
use crate::domain::ports::Extractor;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_url;

const SOURCE_NAME: &str = "protocol";

fn default_city() -> String {
    // std:080 is the Bangalore calling-code city id
    "std:080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_city")]
    pub city: String,
}

impl Default for ProtocolApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            city: default_city(),
        }
    }
}

/// Extracts products straight from an ONDC-style protocol gateway.
/// Secondary source: no pagination, and no category/provider endpoints
/// upstream, so those two return seed taxonomies flagged as placeholders.
pub struct ProtocolExtractor {
    config: ExtractionConfig,
    api: ProtocolApiConfig,
    client: Client,
    limiter: RateLimiter,
    stats: SourceStats,
}

impl ProtocolExtractor {
    pub fn new(config: ExtractionConfig, api: ProtocolApiConfig) -> Result<Self> {
        validate_url("sources.protocol.base_url", &api.base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let limiter = RateLimiter::new(config.rate_limit_rps);

        Ok(Self {
            config,
            api,
            client,
            limiter,
            stats: SourceStats::new(),
        })
    }

    fn search_envelope(&self, request: &ExtractRequest) -> Value {
        json!({
            "context": {
                "domain": "retail",
                "country": "IND",
                "city": self.api.city,
                "action": "search",
                "core_version": "1.0.0",
            },
            "message": {
                "intent": {
                    "item": {
                        "descriptor": {
                            "name": request.query.clone().unwrap_or_default(),
                        }
                    },
                    "fulfillment": {"type": "Delivery"},
                }
            }
        })
    }

    fn request_builder(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, url);
        if !self.api.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api.api_key);
        }
        builder
    }
}

#[async_trait]
impl Extractor for ProtocolExtractor {
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
        let response = self
            .request_builder(reqwest::Method::GET, "/health")
            .send()
            .await;
        match response {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                warn!(source = SOURCE_NAME, error = %e, "health check failed");
                false
            }
        }
    }

    async fn extract_products(&self, request: &ExtractRequest) -> ExtractionResult {
        info!(source = SOURCE_NAME, "extracting products via protocol search");

        let response = self
            .request_builder(reqwest::Method::POST, "/search")
            .json(&self.search_envelope(request))
            .send()
            .await;

        let body: Value = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(body) => body,
                Err(e) => {
                    return ExtractionResult::failed(
                        SOURCE_NAME,
                        vec![EtlError::from(e).to_string()],
                        Map::new(),
                    )
                }
            },
            Ok(r) => {
                return ExtractionResult::failed(
                    SOURCE_NAME,
                    vec![format!(
                        "Protocol search failed with status {}",
                        r.status().as_u16()
                    )],
                    Map::new(),
                );
            }
            Err(e) => {
                return ExtractionResult::failed(
                    SOURCE_NAME,
                    vec![EtlError::from(e).to_string()],
                    Map::new(),
                );
            }
        };

        let providers = body
            .get("message")
            .and_then(|m| m.get("catalog"))
            .and_then(|c| c.get("bpp/providers"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let records = flatten_catalog_providers(&providers);

        let mut metadata = Map::new();
        metadata.insert("protocol_version".to_string(), "1.0.0".into());
        ExtractionResult::ok(SOURCE_NAME, records, vec![], metadata)
    }

    async fn extract_categories(&self, _request: &ExtractRequest) -> ExtractionResult {
        let seeds = [
            ("grocery", "Grocery", "Grocery and food items"),
            ("electronics", "Electronics", "Electronic devices and gadgets"),
            ("fashion", "Fashion", "Clothing and accessories"),
        ];
        let data = seeds
            .iter()
            .filter_map(|(id, name, description)| {
                Record::from_value(json!({
                    "id": id,
                    "name": name,
                    "description": description,
                    "level": 1,
                    "parent_id": null,
                }))
            })
            .collect();

        let mut metadata = Map::new();
        metadata.insert("placeholder".to_string(), true.into());
        ExtractionResult::ok(
            SOURCE_NAME,
            data,
            vec!["Using seed data - protocol category endpoint not available".to_string()],
            metadata,
        )
    }

    async fn extract_providers(&self, _request: &ExtractRequest) -> ExtractionResult {
        let data = [
            json!({
                "id": "bpp_001",
                "name": "Local Grocery Store",
                "description": "Fresh groceries and daily essentials",
                "location": {"city": "Bangalore", "state": "Karnataka", "country": "India"},
                "rating": 4.2,
                "verified": true,
            }),
            json!({
                "id": "bpp_002",
                "name": "Electronics Hub",
                "description": "Latest electronics and gadgets",
                "location": {"city": "Bangalore", "state": "Karnataka", "country": "India"},
                "rating": 4.5,
                "verified": true,
            }),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect();

        let mut metadata = Map::new();
        metadata.insert("placeholder".to_string(), true.into());
        ExtractionResult::ok(
            SOURCE_NAME,
            data,
            vec!["Using seed data - protocol provider endpoint not available".to_string()],
            metadata,
        )
    }
}

/// Flattens `bpp/providers` catalog entries into one record per item,
/// keyed `{provider_id}_{item_id}`.
pub fn flatten_catalog_providers(providers: &[Value]) -> Vec<Record> {
    let mut records = Vec::new();

    for provider in providers {
        let provider_id = provider.get("id").and_then(Value::as_str).unwrap_or_default();
        let descriptor = provider.get("descriptor");
        let provider_name = descriptor
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let provider_desc = descriptor
            .and_then(|d| d.get("short_desc"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(items) = provider.get("items").and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();
            let item_descriptor = item.get("descriptor");
            let price = item.get("price");
            let price_value = price
                .and_then(|p| p.get("value"))
                .map(|v| match v {
                    Value::Number(n) => n.as_f64().unwrap_or(0.0),
                    Value::String(s) => s.trim().parse().unwrap_or(0.0),
                    _ => 0.0,
                })
                .unwrap_or(0.0);

            let images: Vec<Value> = item_descriptor
                .and_then(|d| d.get("images"))
                .and_then(Value::as_array)
                .map(|images| {
                    images
                        .iter()
                        .filter_map(|img| match img {
                            Value::String(url) => Some(json!({"url": url, "type": "primary"})),
                            Value::Object(o) => Some(json!({
                                "url": o.get("url").and_then(Value::as_str).unwrap_or_default(),
                                "type": "primary",
                            })),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            let record = Record::from_value(json!({
                "id": format!("{}_{}", provider_id, item_id),
                "name": item_descriptor.and_then(|d| d.get("name")).and_then(Value::as_str).unwrap_or_default(),
                "description": item_descriptor.and_then(|d| d.get("short_desc")).and_then(Value::as_str).unwrap_or_default(),
                "price": {
                    "value": price_value,
                    "currency": price.and_then(|p| p.get("currency")).and_then(Value::as_str).unwrap_or("INR"),
                },
                "category": {
                    "id": item.get("category_id").and_then(Value::as_str).unwrap_or_default(),
                    "name": item.get("category_name").and_then(Value::as_str).unwrap_or_default(),
                },
                "provider": {
                    "id": provider_id,
                    "name": provider_name,
                    "description": provider_desc,
                },
                "images": images,
                "availability": true,
                "tags": item.get("tags").cloned().unwrap_or_else(|| json!([])),
                "extracted_at": Utc::now().to_rfc3339(),
                "source": SOURCE_NAME,
            }));
            if let Some(record) = record {
                records.push(record);
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::DataType;
    use httpmock::prelude::*;

    fn extractor_for(server: &MockServer) -> ProtocolExtractor {
        ProtocolExtractor::new(
            ExtractionConfig {
                rate_limit_rps: 1000,
                ..ExtractionConfig::default()
            },
            ProtocolApiConfig {
                enabled: true,
                base_url: server.base_url(),
                api_key: "token".to_string(),
                ..ProtocolApiConfig::default()
            },
        )
        .unwrap()
    }

    fn catalog_body() -> Value {
        json!({
            "context": {"action": "on_search"},
            "message": {"catalog": {"bpp/providers": [
                {
                    "id": "bpp.shop.example",
                    "descriptor": {"name": "Corner Shop", "short_desc": "Daily needs"},
                    "items": [
                        {
                            "id": "sku-1",
                            "descriptor": {"name": "Rice 1kg", "short_desc": "Sona masoori", "images": [{"url": "https://img.example/rice.jpg"}]},
                            "price": {"value": "80", "currency": "INR"},
                            "category_id": "grocery",
                        },
                        {
                            "id": "sku-2",
                            "descriptor": {"name": "Dal 500g"},
                            "price": {"value": 120.5, "currency": "INR"},
                        },
                    ],
                }
            ]}}
        })
    }

    #[test]
    fn test_flatten_catalog_providers() {
        let providers = catalog_body()["message"]["catalog"]["bpp/providers"]
            .as_array()
            .unwrap()
            .clone();
        let records = flatten_catalog_providers(&providers);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id().as_deref(), Some("bpp.shop.example_sku-1"));
        assert_eq!(records[0].get_str("name"), Some("Rice 1kg"));
        assert_eq!(
            records[0].get_path("price.value").and_then(Value::as_f64),
            Some(80.0)
        );
        assert_eq!(
            records[0].get_path("provider.name").and_then(Value::as_str),
            Some("Corner Shop")
        );
        assert_eq!(
            records[1].get_path("price.value").and_then(Value::as_f64),
            Some(120.5)
        );
    }

    #[tokio::test]
    async fn test_extract_products_posts_search_envelope() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/search")
                    .header("authorization", "Bearer token")
                    .json_body_partial(r#"{"context": {"action": "search"}}"#);
                then.status(200).json_body(catalog_body());
            })
            .await;

        let extractor = extractor_for(&server);
        let result = extractor
            .extract(DataType::Products, &ExtractRequest::default())
            .await;

        search.assert_async().await;
        assert!(result.success);
        assert_eq!(result.total_records, 2);
        assert_eq!(
            result.metadata.get("protocol_version"),
            Some(&json!("1.0.0"))
        );
    }

    #[tokio::test]
    async fn test_extract_products_reports_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/search");
                then.status(503);
            })
            .await;

        let extractor = extractor_for(&server);
        let result = extractor.extract_products(&ExtractRequest::default()).await;

        assert!(!result.success);
        assert!(result.errors[0].contains("503"));
    }

    #[tokio::test]
    async fn test_categories_are_flagged_as_placeholder() {
        let server = MockServer::start_async().await;
        let extractor = extractor_for(&server);
        let result = extractor
            .extract_categories(&ExtractRequest::default())
            .await;

        assert!(result.success);
        assert_eq!(result.total_records, 3);
        assert_eq!(result.metadata.get("placeholder"), Some(&json!(true)));
        assert!(!result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200);
            })
            .await;

        let extractor = extractor_for(&server);
        assert!(extractor.health_check().await);
    }
}
