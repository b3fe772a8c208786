use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::rate_limit::RateLimiter;
use crate::core::retry::SourceStats;
use crate::domain::model::{ExtractRequest, ExtractionConfig, ExtractionResult, Record};
use crate::domain::ports::Extractor;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_url};

const SOURCE_NAME: &str = "catalog_api";
const DEFAULT_LATITUDE: f64 = 12.9716;
const DEFAULT_LONGITUDE: f64 = 77.5946;
const DEFAULT_PAGE_LIMIT: usize = 100;
const DEFAULT_MAX_PAGES: usize = 50;
const INTER_PAGE_DELAY: Duration = Duration::from_millis(100);

fn default_user_id() -> String {
    "guestUser".to_string()
}

fn default_device_id() -> String {
    "etl_pipeline_001".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
}

impl Default for CatalogApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            user_id: default_user_id(),
            device_id: default_device_id(),
        }
    }
}

/// Extracts catalog data from the buyer-side search API. Categories and
/// providers have no dedicated endpoints upstream, so both are derived by
/// de-duplicating fields across a product scan.
pub struct CatalogApiExtractor {
    config: ExtractionConfig,
    api: CatalogApiConfig,
    client: Client,
    limiter: RateLimiter,
    stats: SourceStats,
}

impl CatalogApiExtractor {
    pub fn new(config: ExtractionConfig, api: CatalogApiConfig) -> Result<Self> {
        validate_url("sources.catalog_api.base_url", &api.base_url)?;
        validate_non_empty_string("sources.catalog_api.api_key", &api.api_key)?;

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

    /// Fetches one search page. Returns the raw item count (pagination is
    /// decided on what the upstream sent, not on what survived processing)
    /// together with the processed records.
    async fn search_page(
        &self,
        page: usize,
        limit: usize,
        request: &ExtractRequest,
    ) -> Result<(usize, Vec<Record>)> {
        let url = format!(
            "{}/v2/search/{}",
            self.api.base_url.trim_end_matches('/'),
            self.api.user_id
        );

        let latitude = request.latitude.unwrap_or(DEFAULT_LATITUDE);
        let longitude = request.longitude.unwrap_or(DEFAULT_LONGITUDE);
        let mut query: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("limit", limit.to_string()),
            ("deviceId", self.api.device_id.clone()),
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("name", request.query.clone().unwrap_or_default()),
        ];
        if let Some(category) = &request.category {
            query.push(("category", category.clone()));
        }

        let response = self
            .client
            .get(&url)
            .header("wil-api-key", &self.api.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::Processing {
                message: format!("API request failed with status {}", status.as_u16()),
            });
        }

        let body: Value = response.json().await?;
        Ok(parse_search_payload(&body))
    }
}

#[async_trait]
impl Extractor for CatalogApiExtractor {
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
        let request = ExtractRequest {
            limit: Some(1),
            max_pages: Some(1),
            ..ExtractRequest::default()
        };
        match self.search_page(1, 1, &request).await {
            Ok(_) => true,
            Err(e) => {
                warn!(source = SOURCE_NAME, error = %e, "health check failed");
                false
            }
        }
    }

    async fn extract_products(&self, request: &ExtractRequest) -> ExtractionResult {
        let limit = request.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
        let max_pages = request.max_pages.unwrap_or(DEFAULT_MAX_PAGES).max(1);

        let mut products: Vec<Record> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut pages_fetched = 0usize;
        let mut page = 1usize;

        info!(source = SOURCE_NAME, limit, max_pages, "starting product extraction");

        while page <= max_pages {
            let (page_total, mut page_records) = match self.search_page(page, limit, request).await
            {
                Ok(page) => page,
                Err(e) => {
                    let message = format!("Error on page {}: {}", page, e);
                    warn!(source = SOURCE_NAME, page, error = %e, "page fetch failed");
                    errors.push(message);
                    break;
                }
            };
            pages_fetched += 1;

            if page_total == 0 {
                debug!(source = SOURCE_NAME, page, "no more products");
                break;
            }

            debug!(source = SOURCE_NAME, page, kept = page_records.len(), "extracted page");
            products.append(&mut page_records);

            // short page means the upstream ran out of results
            if page_total < limit {
                break;
            }
            page += 1;
            tokio::time::sleep(INTER_PAGE_DELAY).await;
        }

        let mut valid = Vec::with_capacity(products.len());
        for (index, record) in products.into_iter().enumerate() {
            if record.is_valid() {
                valid.push(record);
            } else {
                errors.push(format!("Record {} missing required 'id' field", index));
            }
        }

        let mut metadata = Map::new();
        metadata.insert("pages_fetched".to_string(), pages_fetched.into());
        metadata.insert(
            "query".to_string(),
            request.query.clone().unwrap_or_default().into(),
        );
        metadata.insert(
            "category".to_string(),
            request.category.clone().unwrap_or_default().into(),
        );
        metadata.insert(
            "coordinates".to_string(),
            json!({
                "lat": request.latitude.unwrap_or(DEFAULT_LATITUDE),
                "lon": request.longitude.unwrap_or(DEFAULT_LONGITUDE),
            }),
        );

        ExtractionResult::ok(SOURCE_NAME, valid, errors, metadata)
    }

    async fn extract_categories(&self, _request: &ExtractRequest) -> ExtractionResult {
        let products = self
            .extract_products(&ExtractRequest {
                limit: Some(500),
                max_pages: Some(5),
                ..ExtractRequest::default()
            })
            .await;

        if !products.success {
            return ExtractionResult::failed(
                SOURCE_NAME,
                vec!["Failed to extract products for category extraction".to_string()],
                Map::new(),
            );
        }

        let mut categories: BTreeMap<String, Record> = BTreeMap::new();
        for product in &products.data {
            let Some(category) = product.get("category").and_then(Value::as_object) else {
                continue;
            };
            let Some(id) = category.get("id").and_then(Value::as_str).filter(|s| !s.is_empty())
            else {
                continue;
            };
            match categories.get_mut(id) {
                Some(existing) => {
                    let count = existing.get_f64("product_count").unwrap_or(0.0) as u64;
                    existing.insert("product_count", (count + 1).into());
                }
                None => {
                    let record = Record::from_value(json!({
                        "id": id,
                        "name": category.get("name").cloned().unwrap_or_else(|| json!("")),
                        "description": category.get("description").cloned().unwrap_or_else(|| json!("")),
                        "parent_id": category.get("parent_id").cloned().unwrap_or(Value::Null),
                        "level": category.get("level").cloned().unwrap_or_else(|| json!(0)),
                        "product_count": 1,
                        "extracted_at": Utc::now().to_rfc3339(),
                        "source": "catalog_products",
                    }));
                    if let Some(record) = record {
                        categories.insert(id.to_string(), record);
                    }
                }
            }
        }

        let mut metadata = Map::new();
        metadata.insert("derived_from".to_string(), "products".into());
        ExtractionResult::ok(
            SOURCE_NAME,
            categories.into_values().collect(),
            vec![],
            metadata,
        )
    }

    async fn extract_providers(&self, _request: &ExtractRequest) -> ExtractionResult {
        let products = self
            .extract_products(&ExtractRequest {
                limit: Some(500),
                max_pages: Some(25),
                ..ExtractRequest::default()
            })
            .await;

        if !products.success {
            return ExtractionResult::failed(
                SOURCE_NAME,
                vec!["Failed to extract products for provider extraction".to_string()],
                Map::new(),
            );
        }

        struct ProviderEntry {
            record: Record,
            product_count: u64,
            categories: std::collections::BTreeSet<String>,
        }

        let mut providers: BTreeMap<String, ProviderEntry> = BTreeMap::new();
        for product in &products.data {
            let Some(provider) = product.get("provider").and_then(Value::as_object) else {
                continue;
            };
            let Some(id) = provider.get("id").and_then(Value::as_str).filter(|s| !s.is_empty())
            else {
                continue;
            };

            let entry = providers.entry(id.to_string()).or_insert_with(|| {
                let record = Record::from_value(json!({
                    "id": id,
                    "name": provider.get("name").cloned().unwrap_or_else(|| json!("")),
                    "description": provider.get("description").cloned().unwrap_or_else(|| json!("")),
                    "rating": provider.get("rating").cloned().unwrap_or_else(|| json!(0)),
                    "verified": provider.get("verified").cloned().unwrap_or_else(|| json!(false)),
                    "locations": provider.get("locations").cloned().unwrap_or_else(|| json!([])),
                    "extracted_at": Utc::now().to_rfc3339(),
                    "source": "catalog_products",
                }))
                .unwrap_or_default();
                ProviderEntry {
                    record,
                    product_count: 0,
                    categories: Default::default(),
                }
            });
            entry.product_count += 1;
            if let Some(name) = product
                .get_path("category.name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            {
                entry.categories.insert(name.to_string());
            }
        }

        let data = providers
            .into_values()
            .map(|mut entry| {
                entry.record.insert("product_count", entry.product_count.into());
                entry.record.insert(
                    "categories",
                    Value::Array(entry.categories.into_iter().map(Value::String).collect()),
                );
                entry.record
            })
            .collect();

        let mut metadata = Map::new();
        metadata.insert("derived_from".to_string(), "products".into());
        ExtractionResult::ok(SOURCE_NAME, data, vec![], metadata)
    }
}

/// Accepts either response shape the upstream emits: the buyer-backend
/// `{"response": {"data": [...]}}` (items run through `process_product`)
/// or the raw protocol `{"message": {"catalog": {"bpp/providers": [...]}}}`
/// (already flat after catalog flattening). Returns `(raw_count, records)`.
pub fn parse_search_payload(body: &Value) -> (usize, Vec<Record>) {
    if let Some(items) = body
        .get("response")
        .and_then(|r| r.get("data"))
        .and_then(Value::as_array)
    {
        let records = items.iter().filter_map(process_product).collect();
        return (items.len(), records);
    }
    if let Some(providers) = body
        .get("message")
        .and_then(|m| m.get("catalog"))
        .and_then(|c| c.get("bpp/providers"))
        .and_then(Value::as_array)
    {
        let records = crate::extractors::protocol::flatten_catalog_providers(providers);
        return (records.len(), records);
    }
    (0, Vec::new())
}

fn map_str(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_gps(gps: &str) -> Option<(f64, f64)> {
    let (lat, lon) = gps.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// Builds a flat product record from the buyer-backend item structure.
/// Records without `item_details` or without an id/name are dropped.
fn process_product(raw: &Value) -> Option<Record> {
    let item = raw.get("item_details").and_then(Value::as_object)?;
    let descriptor = item
        .get("descriptor")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let id = match raw.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        Some(full_id) => full_id.to_string(),
        None => item
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };
    let name = descriptor
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if id.is_empty() || name.is_empty() {
        warn!(id, name, "product missing required fields");
        return None;
    }

    let description = {
        let short = descriptor
            .get("short_desc")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if short.is_empty() {
            descriptor
                .get("long_desc")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            short.to_string()
        }
    };

    let created_at = item
        .get("time")
        .and_then(|t| t.get("timestamp"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let rating = raw.get("rating").and_then(Value::as_f64).unwrap_or(0.0);

    let mut fields = Map::new();
    fields.insert("id".to_string(), id.into());
    fields.insert("name".to_string(), name.into());
    fields.insert("description".to_string(), description.into());
    fields.insert("price".to_string(), extract_price(item.get("price")));
    fields.insert(
        "category".to_string(),
        extract_category(item, &descriptor),
    );
    fields.insert(
        "provider".to_string(),
        extract_provider(raw.get("provider_details"), raw.get("location_details")),
    );
    fields.insert(
        "location".to_string(),
        extract_location(
            raw.get("location_details"),
            item.get("location_id").and_then(Value::as_str),
        ),
    );
    fields.insert("images".to_string(), extract_images(descriptor.get("images")));
    fields.insert("availability".to_string(), extract_availability(item));
    fields.insert("rating".to_string(), json!(rating));
    fields.insert("tags".to_string(), extract_tags(item.get("tags")));
    fields.insert("attributes".to_string(), extract_attributes(item));
    fields.insert(
        "ondc_attributes".to_string(),
        extract_ondc_attributes(item),
    );
    fields.insert("created_at".to_string(), created_at.into());
    fields.insert("extracted_at".to_string(), Utc::now().to_rfc3339().into());
    fields.insert("source".to_string(), SOURCE_NAME.into());

    Some(Record::from_map(fields))
}

fn extract_price(price: Option<&Value>) -> Value {
    let Some(price) = price.and_then(Value::as_object) else {
        return json!({"value": 0.0, "currency": "INR"});
    };

    let mut out = Map::new();
    let value = price.get("value").and_then(numeric).unwrap_or(0.0);
    out.insert("value".to_string(), json!(value));
    out.insert(
        "currency".to_string(),
        price
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("INR")
            .into(),
    );
    for key in ["maximum_value", "minimum_value", "offered_value"] {
        if let Some(v) = price.get(key).and_then(numeric) {
            out.insert(key.to_string(), json!(v));
        }
    }
    Value::Object(out)
}

fn extract_category(item: &Map<String, Value>, descriptor: &Map<String, Value>) -> Value {
    // category_id often carries the display name upstream
    let category_id = item
        .get("category_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut id = category_id.to_string();
    let mut name = category_id.to_string();

    if let Some(tags) = item.get("tags").and_then(Value::as_array) {
        for tag in tags {
            if tag.get("code").and_then(Value::as_str) != Some("category") {
                continue;
            }
            let Some(list) = tag.get("list").and_then(Value::as_array) else {
                continue;
            };
            for entry in list {
                let value = entry.get("value").and_then(Value::as_str).unwrap_or_default();
                match entry.get("code").and_then(Value::as_str) {
                    Some("name") if !value.is_empty() => name = value.to_string(),
                    Some("id") if !value.is_empty() => id = value.to_string(),
                    _ => {}
                }
            }
        }
    }

    if let Some(n) = descriptor.get("category").and_then(Value::as_str) {
        name = n.to_string();
    }
    if let Some(i) = descriptor.get("category_id").and_then(Value::as_str) {
        id = i.to_string();
    }

    json!({
        "id": id,
        "name": name,
        "description": "",
        "parent_id": null,
        "level": 0,
    })
}

fn extract_provider(provider_details: Option<&Value>, location_details: Option<&Value>) -> Value {
    let details = provider_details
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut provider = Map::new();
    provider.insert("id".to_string(), map_str(&details, "id").into());
    let mut name = map_str(&details, "name");
    provider.insert(
        "description".to_string(),
        map_str(&details, "description").into(),
    );
    provider.insert(
        "rating".to_string(),
        details.get("rating").cloned().unwrap_or_else(|| json!(0)),
    );
    provider.insert(
        "verified".to_string(),
        details.get("verified").cloned().unwrap_or_else(|| json!(false)),
    );

    if let Some(descriptor) = details.get("descriptor").and_then(Value::as_object) {
        if let Some(n) = descriptor.get("name").and_then(Value::as_str) {
            name = n.to_string();
        }
        provider.insert(
            "short_desc".to_string(),
            map_str(descriptor, "short_desc").into(),
        );
        provider.insert("symbol".to_string(), map_str(descriptor, "symbol").into());
    }
    provider.insert("name".to_string(), name.into());

    let mut locations = Vec::new();
    if let Some(all) = location_details.and_then(Value::as_array) {
        for loc in all {
            let Some(loc) = loc.as_object() else { continue };
            let mut entry = Map::new();
            entry.insert("id".to_string(), map_str(loc, "id").into());
            let gps = map_str(loc, "gps");
            if let Some((lat, lon)) = parse_gps(&gps) {
                entry.insert("latitude".to_string(), json!(lat));
                entry.insert("longitude".to_string(), json!(lon));
            }
            entry.insert("gps".to_string(), gps.into());
            if let Some(address) = loc.get("address") {
                entry.insert("address".to_string(), address.clone());
            }
            locations.push(Value::Object(entry));
        }
    }
    provider.insert("locations".to_string(), Value::Array(locations));

    Value::Object(provider)
}

fn extract_location(location_details: Option<&Value>, location_id: Option<&str>) -> Value {
    let mut location = Map::new();
    location.insert("id".to_string(), location_id.unwrap_or_default().into());
    location.insert("latitude".to_string(), Value::Null);
    location.insert("longitude".to_string(), Value::Null);
    location.insert("address".to_string(), "".into());
    location.insert("city".to_string(), "".into());
    location.insert("state".to_string(), "".into());
    location.insert("pincode".to_string(), "".into());
    location.insert("country".to_string(), "India".into());

    if let Some(all) = location_details.and_then(Value::as_array) {
        for loc in all {
            let gps = loc.get("gps").and_then(Value::as_str).unwrap_or_default();
            if location.get("latitude") == Some(&Value::Null) {
                if let Some((lat, lon)) = parse_gps(gps) {
                    location.insert("latitude".to_string(), json!(lat));
                    location.insert("longitude".to_string(), json!(lon));
                }
            }
            let Some(address) = loc.get("address").and_then(Value::as_object) else {
                continue;
            };
            let city_unset = location
                .get("city")
                .and_then(Value::as_str)
                .map(str::is_empty)
                .unwrap_or(true);
            if city_unset {
                let city = address.get("city").and_then(Value::as_str).unwrap_or_default();
                let state = address.get("state").and_then(Value::as_str).unwrap_or_default();
                let pincode = address
                    .get("area_code")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let street_address = ["building", "street", "locality"]
                    .iter()
                    .filter_map(|k| address.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                location.insert("city".to_string(), city.into());
                location.insert("state".to_string(), state.into());
                location.insert("pincode".to_string(), pincode.into());
                location.insert("address".to_string(), street_address.into());
            }
        }
    }

    Value::Object(location)
}

fn extract_images(images: Option<&Value>) -> Value {
    let Some(images) = images.and_then(Value::as_array) else {
        return json!([]);
    };
    let mut out = Vec::new();
    for image in images {
        match image {
            Value::String(url) => {
                let image_type = if out.is_empty() { "primary" } else { "additional" };
                out.push(json!({"url": url, "type": image_type, "alt_text": ""}));
            }
            Value::Object(obj) => {
                out.push(json!({
                    "url": obj.get("url").and_then(Value::as_str).unwrap_or_default(),
                    "type": obj.get("type").and_then(Value::as_str).unwrap_or("additional"),
                    "alt_text": obj.get("alt_text").and_then(Value::as_str).unwrap_or_default(),
                }));
            }
            _ => {}
        }
    }
    Value::Array(out)
}

fn extract_availability(item: &Map<String, Value>) -> Value {
    let quantity = item
        .get("quantity")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let count = quantity
        .get("available")
        .and_then(|a| a.get("count"))
        .cloned()
        .unwrap_or_else(|| json!("0"));
    let maximum = quantity
        .get("maximum")
        .and_then(|m| m.get("count"))
        .cloned()
        .unwrap_or_else(|| json!("0"));
    let available = count != json!("0") && count != json!(0);
    json!({
        "available": available,
        "count": count,
        "maximum": maximum,
        "measure": quantity.get("unitized").and_then(|u| u.get("measure")).cloned().unwrap_or_else(|| json!({})),
    })
}

fn extract_attributes(item: &Map<String, Value>) -> Value {
    let mut attributes = Map::new();

    if let Some(measure) = item
        .get("quantity")
        .and_then(|q| q.get("unitized"))
        .and_then(|u| u.get("measure"))
        .and_then(Value::as_object)
    {
        if let Some(unit) = measure.get("unit") {
            attributes.insert("unit".to_string(), unit.clone());
        }
        if let Some(value) = measure.get("value") {
            attributes.insert("value".to_string(), value.clone());
        }
    }

    if let Some(tags) = item.get("tags").and_then(Value::as_array) {
        for tag in tags {
            let code = tag.get("code").and_then(Value::as_str).unwrap_or_default();
            let Some(list) = tag.get("list").and_then(Value::as_array) else {
                continue;
            };
            for entry in list {
                let key = entry.get("code").and_then(Value::as_str).unwrap_or_default();
                let value = entry.get("value").and_then(Value::as_str).unwrap_or_default();
                if !key.is_empty() && !value.is_empty() {
                    attributes.insert(format!("{}_{}", code, key), value.into());
                }
            }
        }
    }

    Value::Object(attributes)
}

fn extract_ondc_attributes(item: &Map<String, Value>) -> Value {
    json!({
        "returnable": item.get("@ondc/org/returnable").cloned().unwrap_or_else(|| json!(false)),
        "cancellable": item.get("@ondc/org/cancellable").cloned().unwrap_or_else(|| json!(false)),
        "available_on_cod": item.get("@ondc/org/available_on_cod").cloned().unwrap_or_else(|| json!(false)),
        "time_to_ship": item.get("@ondc/org/time_to_ship").cloned().unwrap_or_else(|| json!("")),
    })
}

fn extract_tags(tags: Option<&Value>) -> Value {
    let Some(tags) = tags.and_then(Value::as_array) else {
        return json!([]);
    };
    let mut out = Vec::new();
    for tag in tags {
        match tag {
            Value::Object(obj) => {
                let code = obj.get("code").and_then(Value::as_str).unwrap_or_default();
                let mut values = Map::new();
                if let Some(list) = obj.get("list").and_then(Value::as_array) {
                    for entry in list {
                        let key = entry.get("code").and_then(Value::as_str).unwrap_or_default();
                        if !key.is_empty() {
                            values.insert(
                                key.to_string(),
                                entry.get("value").cloned().unwrap_or_else(|| json!("")),
                            );
                        }
                    }
                }
                if !code.is_empty() || !values.is_empty() {
                    out.push(json!({
                        "code": code,
                        "name": obj.get("name").and_then(Value::as_str).unwrap_or_default(),
                        "display": obj.get("display").cloned().unwrap_or_else(|| json!(true)),
                        "values": values,
                    }));
                }
            }
            Value::String(s) => {
                out.push(json!({"code": s, "name": s, "display": true, "values": {}}));
            }
            _ => {}
        }
    }
    Value::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn raw_product(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "item_details": {
                "id": id,
                "category_id": "Grocery",
                "descriptor": {
                    "name": name,
                    "short_desc": "A test product",
                    "images": ["https://cdn.example.com/a.jpg"],
                },
                "price": {"value": "150.0", "currency": "INR"},
                "quantity": {
                    "available": {"count": "5"},
                    "maximum": {"count": "10"},
                    "unitized": {"measure": {"unit": "kilogram", "value": "1"}},
                },
                "@ondc/org/returnable": true,
            },
            "provider_details": {
                "id": "prov-1",
                "descriptor": {"name": "Fresh Farms"},
            },
            "location_details": [
                {"id": "loc-1", "gps": "12.9716, 77.5946", "address": {"city": "Bengaluru", "state": "KA", "area_code": "560001", "street": "MG Road"}}
            ],
        })
    }

    fn extractor_for(server: &MockServer) -> CatalogApiExtractor {
        CatalogApiExtractor::new(
            ExtractionConfig {
                rate_limit_rps: 1000,
                ..ExtractionConfig::default()
            },
            CatalogApiConfig {
                enabled: true,
                base_url: server.base_url(),
                api_key: "test-key".to_string(),
                ..CatalogApiConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_process_product_builds_flat_record() {
        let record = process_product(&raw_product("p1", "Organic Jam")).unwrap();
        assert_eq!(record.id().as_deref(), Some("p1"));
        assert_eq!(record.get_str("name"), Some("Organic Jam"));
        assert_eq!(
            record.get_path("price.value").and_then(Value::as_f64),
            Some(150.0)
        );
        assert_eq!(
            record.get_path("category.name").and_then(Value::as_str),
            Some("Grocery")
        );
        assert_eq!(
            record.get_path("provider.name").and_then(Value::as_str),
            Some("Fresh Farms")
        );
        assert_eq!(
            record.get_path("location.city").and_then(Value::as_str),
            Some("Bengaluru")
        );
        assert_eq!(
            record.get_path("location.latitude").and_then(Value::as_f64),
            Some(12.9716)
        );
        assert_eq!(
            record.get_path("availability.available"),
            Some(&json!(true))
        );
        assert_eq!(record.get_path("attributes.unit"), Some(&json!("kilogram")));
        assert_eq!(
            record.get_path("ondc_attributes.returnable"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_process_product_drops_incomplete_records() {
        assert!(process_product(&json!({"id": "x"})).is_none());
        assert!(process_product(&json!({
            "id": "x",
            "item_details": {"descriptor": {}}
        }))
        .is_none());
    }

    #[test]
    fn test_parse_search_payload_handles_both_shapes() {
        let buyer = json!({"response": {"data": [raw_product("a", "A"), raw_product("b", "B")]}});
        let (raw, records) = parse_search_payload(&buyer);
        assert_eq!(raw, 2);
        assert_eq!(records.len(), 2);

        let protocol = json!({
            "message": {"catalog": {"bpp/providers": [{
                "id": "prov",
                "descriptor": {"name": "Shop"},
                "items": [{"id": "i1", "descriptor": {"name": "Thing"}}],
            }]}}
        });
        let (raw, records) = parse_search_payload(&protocol);
        assert_eq!(raw, 1);
        assert_eq!(records[0].id().as_deref(), Some("prov_i1"));

        let (raw, records) = parse_search_payload(&json!({"unrelated": true}));
        assert_eq!(raw, 0);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_stops_on_short_page() {
        let server = MockServer::start_async().await;
        let page1_items: Vec<Value> = (0..100)
            .map(|i| raw_product(&format!("p{}", i), "Product"))
            .collect();
        let page2_items: Vec<Value> = (100..120)
            .map(|i| raw_product(&format!("p{}", i), "Product"))
            .collect();

        let page1 = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/search/guestUser")
                    .query_param("page", "1");
                then.status(200).json_body(json!({"response": {"data": page1_items}}));
            })
            .await;
        let page2 = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/search/guestUser")
                    .query_param("page", "2");
                then.status(200).json_body(json!({"response": {"data": page2_items}}));
            })
            .await;

        let extractor = extractor_for(&server);
        let result = extractor
            .extract_products(&ExtractRequest::default())
            .await;

        page1.assert_async().await;
        page2.assert_async().await;
        assert!(result.success);
        assert_eq!(result.total_records, 120);
        assert_eq!(result.metadata.get("pages_fetched"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_page_error_keeps_earlier_pages() {
        let server = MockServer::start_async().await;
        let page1_items: Vec<Value> = (0..100)
            .map(|i| raw_product(&format!("p{}", i), "Product"))
            .collect();
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/search/guestUser")
                    .query_param("page", "1");
                then.status(200).json_body(json!({"response": {"data": page1_items}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/search/guestUser")
                    .query_param("page", "2");
                then.status(502);
            })
            .await;

        let extractor = extractor_for(&server);
        let result = extractor.extract_products(&ExtractRequest::default()).await;

        assert!(result.success);
        assert_eq!(result.total_records, 100);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("page 2"));
    }

    #[tokio::test]
    async fn test_categories_derived_from_products() {
        let server = MockServer::start_async().await;
        let items: Vec<Value> = (0..3)
            .map(|i| raw_product(&format!("p{}", i), "Product"))
            .collect();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/search/guestUser");
                then.status(200).json_body(json!({"response": {"data": items}}));
            })
            .await;

        let extractor = extractor_for(&server);
        let result = extractor
            .extract_categories(&ExtractRequest::default())
            .await;

        assert!(result.success);
        assert_eq!(result.total_records, 1);
        assert_eq!(result.data[0].get_str("name"), Some("Grocery"));
        assert_eq!(result.data[0].get("product_count"), Some(&json!(3)));
        assert_eq!(result.metadata.get("derived_from"), Some(&json!("products")));
    }

    #[tokio::test]
    async fn test_health_check_against_search_endpoint() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/search/guestUser");
                then.status(200).json_body(json!({"response": {"data": []}}));
            })
            .await;

        let extractor = extractor_for(&server);
        assert!(extractor.health_check().await);
    }

    #[tokio::test]
    async fn test_health_check_fails_on_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/search/guestUser");
                then.status(500);
            })
            .await;

        let extractor = extractor_for(&server);
        assert!(!extractor.health_check().await);
    }
}
