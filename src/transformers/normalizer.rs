use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

use crate::domain::model::{Record, TransformationConfig};
use crate::domain::ports::Transformer;
use crate::utils::error::{EtlError, Result};

const TRANSFORMER_NAME: &str = "field_normalizer";

/// Fixed substring mapping from raw category tokens to canonical names.
const CATEGORY_MAPPING: [(&str, &str); 18] = [
    ("grocery", "Food & Beverages"),
    ("food", "Food & Beverages"),
    ("beverages", "Food & Beverages"),
    ("snacks", "Food & Beverages"),
    ("electronics", "Electronics"),
    ("mobile", "Electronics"),
    ("laptop", "Electronics"),
    ("computer", "Electronics"),
    ("clothing", "Fashion"),
    ("fashion", "Fashion"),
    ("apparel", "Fashion"),
    ("shoes", "Fashion"),
    ("furniture", "Home & Living"),
    ("home", "Home & Living"),
    ("decor", "Home & Living"),
    ("health", "Health & Beauty"),
    ("beauty", "Health & Beauty"),
    ("cosmetics", "Health & Beauty"),
];

const STOP_WORDS: [&str; 30] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should",
];

fn default_currency() -> String {
    "INR".to_string()
}

fn default_country() -> String {
    "India".to_string()
}

fn default_max_name_length() -> usize {
    200
}

fn default_max_description_length() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_country")]
    pub default_country: String,
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            default_country: default_country(),
            max_name_length: default_max_name_length(),
            max_description_length: default_max_description_length(),
        }
    }
}

/// Canonicalizes record fields so every downstream stage sees one shape,
/// no matter which source produced the record. Idempotent on fields that
/// are already canonical.
pub struct FieldNormalizer {
    config: TransformationConfig,
    settings: NormalizerConfig,
}

impl FieldNormalizer {
    pub fn new(config: TransformationConfig, settings: NormalizerConfig) -> Self {
        Self { config, settings }
    }

    fn normalize_id(&self, id: Option<&Value>) -> String {
        let raw = match id {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Uuid::new_v4().to_string(),
        };
        let cleaned: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        cleaned.chars().take(50).collect()
    }

    fn normalize_name(&self, name: Option<&Value>) -> String {
        let name = name.and_then(Value::as_str).map(normalize_text).unwrap_or_default();
        if name.is_empty() {
            return "Unknown Product".to_string();
        }
        truncate_on_word(&name, self.settings.max_name_length)
    }

    fn normalize_description(&self, description: Option<&Value>) -> String {
        let description = description
            .and_then(Value::as_str)
            .map(normalize_text)
            .unwrap_or_default();
        truncate_on_word(&description, self.settings.max_description_length)
    }

    fn normalize_price(&self, price: Option<&Value>) -> Value {
        match price {
            None | Some(Value::Null) => json!({
                "value": 0.0,
                "currency": self.settings.default_currency,
                "formatted": "₹0",
                "valid": false,
            }),
            Some(Value::Number(n)) => {
                let value = n.as_f64().unwrap_or(0.0);
                json!({
                    "value": value,
                    "currency": self.settings.default_currency,
                    "formatted": format!("₹{}", format_amount(value)),
                    "valid": value > 0.0,
                })
            }
            Some(Value::Object(price)) => {
                let value = price.get("value").and_then(numeric).unwrap_or(0.0);
                let currency = price
                    .get("currency")
                    .and_then(Value::as_str)
                    .unwrap_or(&self.settings.default_currency)
                    .to_string();
                let symbol = currency_symbol(&currency);

                let mut out = Map::new();
                out.insert("value".to_string(), json!(value));
                out.insert("currency".to_string(), currency.clone().into());
                out.insert(
                    "formatted".to_string(),
                    format!("{}{}", symbol, format_amount(value)).into(),
                );
                // only carried when the source provided them, so a second
                // normalization pass is a no-op
                for key in ["maximum_value", "minimum_value", "offered_value"] {
                    if let Some(v) = price.get(key).and_then(numeric) {
                        out.insert(key.to_string(), json!(v));
                    }
                }
                out.insert("valid".to_string(), (value > 0.0).into());
                Value::Object(out)
            }
            Some(other) => {
                let text = match other {
                    Value::String(s) => s.clone(),
                    v => v.to_string(),
                };
                let cleaned: String = text.chars().filter(|c| *c != '₹' && *c != ',').collect();
                match first_number(&cleaned) {
                    Some(value) => json!({
                        "value": value,
                        "currency": self.settings.default_currency,
                        "formatted": format!("₹{}", format_amount(value)),
                        "valid": value > 0.0,
                    }),
                    None => json!({
                        "value": 0.0,
                        "currency": self.settings.default_currency,
                        "formatted": "₹0",
                        "valid": false,
                        "parse_error": text,
                    }),
                }
            }
        }
    }

    fn normalize_category(&self, category: Option<&Value>) -> Value {
        let uncategorized = json!({
            "id": "uncategorized",
            "name": "Uncategorized",
            "level": 0,
            "path": ["Uncategorized"],
        });

        match category {
            Some(Value::String(name)) if !name.trim().is_empty() => {
                let name = name.trim();
                let standardized = standardize_category_name(name);
                json!({
                    "id": name.to_lowercase().replace(' ', "_"),
                    "name": standardized,
                    "original_name": name,
                    "level": 1,
                    "path": [standardized],
                })
            }
            Some(Value::Object(category)) => {
                let name = category
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Uncategorized");
                let standardized = standardize_category_name(name);
                json!({
                    "id": category
                        .get("id")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| name.to_lowercase().replace(' ', "_")),
                    "name": standardized,
                    "original_name": category.get("original_name").and_then(Value::as_str).unwrap_or(name),
                    "description": category.get("description").and_then(Value::as_str).unwrap_or_default(),
                    "parent_id": category.get("parent_id").cloned().unwrap_or(Value::Null),
                    "level": category.get("level").cloned().unwrap_or_else(|| json!(1)),
                    "path": category.get("path").cloned().unwrap_or_else(|| json!([standardized])),
                })
            }
            _ => uncategorized,
        }
    }

    fn normalize_provider(&self, provider: Option<&Value>) -> Value {
        match provider {
            Some(Value::String(name)) if !name.trim().is_empty() => json!({
                "id": name.trim().to_lowercase().replace(' ', "_"),
                "name": name.trim(),
                "verified": false,
            }),
            Some(Value::Object(provider)) => json!({
                "id": provider.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()).unwrap_or("unknown"),
                "name": provider.get("name").and_then(Value::as_str).filter(|s| !s.is_empty()).unwrap_or("Unknown Provider"),
                "description": normalize_text(provider.get("description").and_then(Value::as_str).unwrap_or_default()),
                "verified": provider.get("verified").and_then(Value::as_bool).unwrap_or(false),
                "rating": normalize_rating(provider.get("rating")),
                "location": self.normalize_location(provider.get("location")),
            }),
            _ => json!({
                "id": "unknown",
                "name": "Unknown Provider",
                "verified": false,
            }),
        }
    }

    fn normalize_location(&self, location: Option<&Value>) -> Value {
        let mut out = Map::new();
        out.insert(
            "country".to_string(),
            self.settings.default_country.clone().into(),
        );
        out.insert("state".to_string(), "".into());
        out.insert("city".to_string(), "".into());
        out.insert("address".to_string(), "".into());
        out.insert("pincode".to_string(), "".into());
        out.insert(
            "coordinates".to_string(),
            json!({"latitude": null, "longitude": null}),
        );
        out.insert("formatted_address".to_string(), "".into());

        match location {
            Some(Value::Object(location)) => {
                if let Some(country) = location.get("country").and_then(Value::as_str) {
                    if !country.is_empty() {
                        out.insert("country".to_string(), country.into());
                    }
                }
                for key in ["state", "city", "address"] {
                    if let Some(v) = location.get(key).and_then(Value::as_str) {
                        out.insert(key.to_string(), normalize_text(v).into());
                    }
                }
                let pincode = match location.get("pincode") {
                    Some(Value::String(s)) => s.trim().to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => String::new(),
                };
                out.insert("pincode".to_string(), pincode.into());

                let latitude = location
                    .get("latitude")
                    .and_then(numeric)
                    .or_else(|| location.get_path_coordinate("latitude"));
                let longitude = location
                    .get("longitude")
                    .and_then(numeric)
                    .or_else(|| location.get_path_coordinate("longitude"));
                out.insert(
                    "coordinates".to_string(),
                    json!({
                        "latitude": latitude.and_then(normalize_coordinate),
                        "longitude": longitude.and_then(normalize_coordinate),
                    }),
                );

                let formatted: Vec<&str> = ["address", "city", "state", "country"]
                    .iter()
                    .filter_map(|k| out.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .collect();
                let formatted = formatted.join(", ");
                out.insert("formatted_address".to_string(), formatted.into());
                Value::Object(out)
            }
            Some(Value::String(address)) if !address.trim().is_empty() => {
                let address = normalize_text(address);
                out.insert("address".to_string(), address.clone().into());
                out.insert("formatted_address".to_string(), address.into());
                Value::Object(out)
            }
            _ => Value::Object(out),
        }
    }

    fn normalize_images(&self, images: Option<&Value>) -> Value {
        match images {
            Some(Value::String(url)) => {
                Value::Array(normalize_single_image(&json!(url), "primary").into_iter().collect())
            }
            Some(Value::Array(images)) => Value::Array(
                images
                    .iter()
                    .enumerate()
                    .filter_map(|(i, img)| {
                        normalize_single_image(img, if i == 0 { "primary" } else { "additional" })
                    })
                    .collect(),
            ),
            _ => json!([]),
        }
    }

    fn normalize_tags(&self, tags: Option<&Value>) -> Value {
        match tags {
            Some(Value::String(tags)) => Value::Array(
                tags.split([',', ';'])
                    .map(normalize_text)
                    .filter(|t| !t.is_empty())
                    .map(Value::String)
                    .collect(),
            ),
            Some(Value::Array(tags)) => Value::Array(
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(normalize_text)
                    .filter(|t| !t.is_empty())
                    .map(Value::String)
                    .collect(),
            ),
            _ => json!([]),
        }
    }

    fn normalize_attributes(&self, attributes: Option<&Value>) -> Value {
        let Some(attributes) = attributes.and_then(Value::as_object) else {
            return json!({});
        };
        let mut out = Map::new();
        for (key, value) in attributes {
            if key.is_empty() || value.is_null() {
                continue;
            }
            let clean_key = key.trim().to_lowercase().replace(' ', "_");
            let clean_value = match value {
                Value::String(s) => normalize_text(s).into(),
                v => v.clone(),
            };
            out.insert(clean_key, clean_value);
        }
        Value::Object(out)
    }

    fn normalize_dates(&self, record: &Record) -> Value {
        let mut dates = Map::new();
        for field in ["created_at", "updated_at", "extracted_at"] {
            let value = record
                .get(field)
                .and_then(Value::as_str)
                .and_then(normalize_date)
                .map(Value::String)
                .unwrap_or(Value::Null);
            dates.insert(field.to_string(), value);
        }
        Value::Object(dates)
    }

    fn generate_search_text(&self, record: &Map<String, Value>) -> String {
        let mut parts: Vec<String> = Vec::new();
        for key in ["name", "description"] {
            if let Some(s) = record.get(key).and_then(Value::as_str) {
                if !s.is_empty() {
                    parts.push(s.to_string());
                }
            }
        }
        for path in [("category", "name"), ("provider", "name")] {
            if let Some(s) = record
                .get(path.0)
                .and_then(|v| v.get(path.1))
                .and_then(Value::as_str)
            {
                if !s.is_empty() {
                    parts.push(s.to_string());
                }
            }
        }
        if let Some(tags) = record.get("tags").and_then(Value::as_array) {
            parts.extend(tags.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if let Some(attributes) = record.get("attributes").and_then(Value::as_object) {
            for value in attributes.values() {
                match value {
                    Value::String(s) if !s.is_empty() => parts.push(s.clone()),
                    Value::Number(n) => parts.push(n.to_string()),
                    _ => {}
                }
            }
        }
        parts.join(" ").trim().to_string()
    }
}

#[async_trait]
impl Transformer for FieldNormalizer {
    fn transformer_name(&self) -> &str {
        TRANSFORMER_NAME
    }

    fn config(&self) -> &TransformationConfig {
        &self.config
    }

    async fn transform_record(&self, record: &Record) -> Result<Record> {
        if !self.validate_input(record) {
            return Err(EtlError::Validation {
                message: "empty input record".to_string(),
            });
        }

        let mut out = Map::new();
        out.insert("id".to_string(), self.normalize_id(record.get("id")).into());
        out.insert(
            "name".to_string(),
            self.normalize_name(record.get("name")).into(),
        );
        out.insert(
            "description".to_string(),
            self.normalize_description(record.get("description")).into(),
        );
        out.insert("price".to_string(), self.normalize_price(record.get("price")));
        out.insert(
            "category".to_string(),
            self.normalize_category(record.get("category")),
        );
        out.insert(
            "provider".to_string(),
            self.normalize_provider(record.get("provider")),
        );
        out.insert(
            "location".to_string(),
            self.normalize_location(record.get("location")),
        );
        out.insert("images".to_string(), self.normalize_images(record.get("images")));
        out.insert(
            "availability".to_string(),
            normalize_availability(record.get("availability")).into(),
        );
        out.insert(
            "rating".to_string(),
            json!(normalize_rating(record.get("rating"))),
        );
        out.insert("tags".to_string(), self.normalize_tags(record.get("tags")));
        out.insert(
            "attributes".to_string(),
            self.normalize_attributes(record.get("attributes")),
        );
        out.insert("dates".to_string(), self.normalize_dates(record));
        out.insert(
            "source".to_string(),
            record.get_str("source").unwrap_or("unknown").into(),
        );
        out.insert("transformed_at".to_string(), Utc::now().to_rfc3339().into());

        let search_text = self.generate_search_text(&out);
        out.insert(
            "keywords".to_string(),
            Value::Array(
                extract_keywords(&search_text, 10)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
        );
        out.insert(
            "price_category".to_string(),
            categorize_price(out.get("price")).into(),
        );
        out.insert("search_text".to_string(), search_text.into());

        Ok(Record::from_map(out))
    }
}

trait CoordinateLookup {
    fn get_path_coordinate(&self, key: &str) -> Option<f64>;
}

impl CoordinateLookup for Map<String, Value> {
    // accepts records where coordinates are already nested canonically
    fn get_path_coordinate(&self, key: &str) -> Option<f64> {
        self.get("coordinates").and_then(|c| c.get(key)).and_then(numeric)
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_on_word(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len).collect();
    match truncated.rsplit_once(' ') {
        Some((head, _)) => head.to_string(),
        None => truncated,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First decimal number in the text, e.g. "Rs. 1299.50 only" -> 1299.50.
fn first_number(text: &str) -> Option<f64> {
    let mut number = String::new();
    let mut seen_dot = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else if c == '.' && !number.is_empty() && !seen_dot {
            number.push(c);
            seen_dot = true;
        } else if !number.is_empty() {
            break;
        }
    }
    number.trim_end_matches('.').parse().ok()
}

/// Two decimal places with thousands grouping: 1234.5 -> "1,234.50".
fn format_amount(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));
    let digits = int_part.as_bytes();
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*digit as char);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

fn currency_symbol(currency: &str) -> &str {
    match currency {
        "INR" => "₹",
        "USD" => "$",
        "EUR" => "€",
        other => other,
    }
}

fn standardize_category_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return "Uncategorized".to_string();
    }
    let lower = name.to_lowercase();
    for (token, canonical) in CATEGORY_MAPPING {
        if lower == token {
            return canonical.to_string();
        }
    }
    for (token, canonical) in CATEGORY_MAPPING {
        if lower.contains(token) || token.contains(lower.as_str()) {
            return canonical.to_string();
        }
    }
    title_case(name)
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_single_image(image: &Value, image_type: &str) -> Option<Value> {
    match image {
        Value::String(url) => {
            let url = url.trim();
            if url.is_empty() {
                return None;
            }
            let valid = is_valid_url(url);
            let mut out = Map::new();
            out.insert("url".to_string(), url.into());
            out.insert("type".to_string(), image_type.into());
            out.insert("alt_text".to_string(), "".into());
            out.insert("valid".to_string(), valid.into());
            if !valid {
                out.insert("error".to_string(), "Invalid URL".into());
            }
            Some(Value::Object(out))
        }
        Value::Object(image) => {
            let url = image.get("url").and_then(Value::as_str).unwrap_or_default();
            Some(json!({
                "url": url,
                "type": image.get("type").and_then(Value::as_str).unwrap_or(image_type),
                "alt_text": image.get("alt_text").and_then(Value::as_str).unwrap_or_default(),
                "valid": is_valid_url(url),
            }))
        }
        _ => None,
    }
}

fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => !parsed.scheme().is_empty() && parsed.host().is_some(),
        Err(_) => false,
    }
}

fn normalize_availability(availability: Option<&Value>) -> bool {
    match availability {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.to_lowercase().as_str(),
            "true" | "available" | "yes" | "in stock" | "1"
        ),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) > 0.0,
        _ => true,
    }
}

fn normalize_rating(rating: Option<&Value>) -> f64 {
    rating
        .and_then(numeric)
        .map(|r| r.clamp(0.0, 5.0))
        .unwrap_or(0.0)
}

fn normalize_coordinate(coord: f64) -> Option<f64> {
    if (-180.0..=180.0).contains(&coord) {
        Some(coord)
    } else {
        None
    }
}

fn normalize_date(date: &str) -> Option<String> {
    let date = date.trim();
    if date.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(date) {
        return Some(parsed.to_rfc3339());
    }
    Some(date.to_string())
}

/// Stop-word-filtered frequency ranking; ties keep first-seen order.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for word in cleaned.split_whitespace() {
        if word.len() <= 2 || STOP_WORDS.contains(&word) {
            continue;
        }
        counts
            .entry(word)
            .and_modify(|(count, _)| *count += 1)
            .or_insert_with(|| {
                order += 1;
                (1, order)
            });
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(max_keywords)
        .map(|(word, _)| word.to_string())
        .collect()
}

fn categorize_price(price: Option<&Value>) -> &'static str {
    let value = price
        .and_then(|p| p.get("value"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if value == 0.0 {
        "free"
    } else if value < 100.0 {
        "budget"
    } else if value < 1000.0 {
        "affordable"
    } else if value < 10000.0 {
        "moderate"
    } else if value < 50000.0 {
        "premium"
    } else {
        "luxury"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> FieldNormalizer {
        FieldNormalizer::new(TransformationConfig::default(), NormalizerConfig::default())
    }

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_format_amount_groups_thousands() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(99.0), "99.00");
        assert_eq!(format_amount(1234.5), "1,234.50");
        assert_eq!(format_amount(1234567.891), "1,234,567.89");
    }

    #[test]
    fn test_normalize_price_object_is_valid_and_formatted() {
        let n = normalizer();
        let price = n.normalize_price(Some(&json!({"value": 1234.5, "currency": "INR"})));
        assert_eq!(price["value"], json!(1234.5));
        assert_eq!(price["currency"], json!("INR"));
        assert_eq!(price["formatted"], json!("₹1,234.50"));
        assert_eq!(price["valid"], json!(true));
    }

    #[test]
    fn test_normalize_price_numeric_and_string() {
        let n = normalizer();
        let price = n.normalize_price(Some(&json!(50)));
        assert_eq!(price["value"], json!(50.0));
        assert_eq!(price["valid"], json!(true));

        let price = n.normalize_price(Some(&json!("Rs. 1,299.50 only")));
        assert_eq!(price["value"], json!(1299.5));
        assert_eq!(price["formatted"], json!("₹1,299.50"));

        let price = n.normalize_price(Some(&json!("call for price")));
        assert_eq!(price["value"], json!(0.0));
        assert_eq!(price["valid"], json!(false));
        assert_eq!(price["parse_error"], json!("call for price"));
    }

    #[test]
    fn test_normalize_price_missing_is_invalid() {
        let n = normalizer();
        let price = n.normalize_price(None);
        assert_eq!(price["value"], json!(0.0));
        assert_eq!(price["valid"], json!(false));
        assert_eq!(price["formatted"], json!("₹0"));
    }

    #[test]
    fn test_price_normalization_is_idempotent() {
        let n = normalizer();
        let once = n.normalize_price(Some(&json!({"value": "150", "currency": "USD", "offered_value": 120})));
        let twice = n.normalize_price(Some(&once));
        assert_eq!(once, twice);
        assert_eq!(once["formatted"], json!("$150.00"));
        assert_eq!(once["offered_value"], json!(120.0));
    }

    #[test]
    fn test_standardize_category_name() {
        assert_eq!(standardize_category_name("grocery"), "Food & Beverages");
        assert_eq!(standardize_category_name("Mobile Phones"), "Electronics");
        assert_eq!(standardize_category_name("shoes"), "Fashion");
        assert_eq!(standardize_category_name("Gardening Tools"), "Gardening Tools");
        assert_eq!(standardize_category_name(""), "Uncategorized");
    }

    #[test]
    fn test_normalize_availability_tokens() {
        assert!(normalize_availability(Some(&json!(true))));
        assert!(!normalize_availability(Some(&json!(false))));
        assert!(normalize_availability(Some(&json!("In Stock"))));
        assert!(normalize_availability(Some(&json!("1"))));
        assert!(!normalize_availability(Some(&json!("out of stock"))));
        assert!(normalize_availability(Some(&json!(3))));
        assert!(!normalize_availability(Some(&json!(0))));
        assert!(normalize_availability(None));
    }

    #[test]
    fn test_normalize_rating_clamps() {
        assert_eq!(normalize_rating(Some(&json!(4.2))), 4.2);
        assert_eq!(normalize_rating(Some(&json!(9.0))), 5.0);
        assert_eq!(normalize_rating(Some(&json!(-1.0))), 0.0);
        assert_eq!(normalize_rating(Some(&json!("4.5"))), 4.5);
        assert_eq!(normalize_rating(Some(&json!("bad"))), 0.0);
        assert_eq!(normalize_rating(None), 0.0);
    }

    #[test]
    fn test_coordinates_out_of_range_are_dropped() {
        let n = normalizer();
        let location = n.normalize_location(Some(&json!({
            "city": "Bengaluru",
            "latitude": 12.9716,
            "longitude": 477.5946,
        })));
        assert_eq!(location["coordinates"]["latitude"], json!(12.9716));
        assert_eq!(location["coordinates"]["longitude"], Value::Null);
        assert_eq!(location["formatted_address"], json!("Bengaluru, India"));
    }

    #[test]
    fn test_normalize_images_validates_urls() {
        let n = normalizer();
        let images = n.normalize_images(Some(&json!([
            "https://cdn.example.com/a.jpg",
            "not a url",
        ])));
        let images = images.as_array().unwrap();
        assert_eq!(images[0]["type"], json!("primary"));
        assert_eq!(images[0]["valid"], json!(true));
        assert_eq!(images[1]["type"], json!("additional"));
        assert_eq!(images[1]["valid"], json!(false));
    }

    #[test]
    fn test_extract_keywords_filters_and_ranks() {
        let keywords = extract_keywords(
            "the fresh organic jam with fresh fruit and a hint of sugar fresh",
            10,
        );
        assert_eq!(keywords[0], "fresh");
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"of".to_string()));
        assert!(keywords.contains(&"organic".to_string()));
    }

    #[test]
    fn test_categorize_price_buckets() {
        assert_eq!(categorize_price(Some(&json!({"value": 0}))), "free");
        assert_eq!(categorize_price(Some(&json!({"value": 99.99}))), "budget");
        assert_eq!(categorize_price(Some(&json!({"value": 100}))), "affordable");
        assert_eq!(categorize_price(Some(&json!({"value": 999}))), "affordable");
        assert_eq!(categorize_price(Some(&json!({"value": 5000}))), "moderate");
        assert_eq!(categorize_price(Some(&json!({"value": 20000}))), "premium");
        assert_eq!(categorize_price(Some(&json!({"value": 50000}))), "luxury");
    }

    #[tokio::test]
    async fn test_transform_record_produces_canonical_shape() {
        let n = normalizer();
        let input = record(json!({
            "id": "sku/1 a",
            "name": "  Organic   Jam  ",
            "description": "Sweet and fresh",
            "price": {"value": "150", "currency": "INR"},
            "category": "grocery",
            "provider": {"id": "prov-1", "name": "Fresh Farms", "verified": true},
            "images": ["https://cdn.example.com/a.jpg"],
            "availability": "yes",
            "rating": "4.3",
            "tags": "organic, jam",
            "attributes": {"Net Weight": "500 g"},
            "source": "catalog_api",
        }));

        let out = n.transform_record(&input).await.unwrap();
        assert_eq!(out.get_str("id"), Some("sku_1_a"));
        assert_eq!(out.get_str("name"), Some("Organic Jam"));
        assert_eq!(out.get_path("price.valid"), Some(&json!(true)));
        assert_eq!(
            out.get_path("category.name").and_then(Value::as_str),
            Some("Food & Beverages")
        );
        assert_eq!(out.get("availability"), Some(&json!(true)));
        assert_eq!(out.get("rating"), Some(&json!(4.3)));
        assert_eq!(out.get_path("attributes.net_weight"), Some(&json!("500 g")));
        assert_eq!(out.get_str("price_category"), Some("affordable"));
        let search_text = out.get_str("search_text").unwrap();
        assert!(search_text.contains("Organic Jam"));
        assert!(search_text.contains("Fresh Farms"));
        let keywords = out.get("keywords").and_then(Value::as_array).unwrap();
        assert!(!keywords.is_empty());
    }

    #[tokio::test]
    async fn test_transform_record_generates_id_when_missing() {
        let n = normalizer();
        let out = n
            .transform_record(&record(json!({"name": "Mystery Item"})))
            .await
            .unwrap();
        assert!(!out.get_str("id").unwrap().is_empty());
        assert_eq!(out.get_str("name"), Some("Mystery Item"));
    }
}
