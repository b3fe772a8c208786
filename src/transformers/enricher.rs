use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};

use crate::domain::model::{Record, TransformationConfig};
use crate::domain::ports::Transformer;
use crate::utils::error::{EtlError, Result};

const TRANSFORMER_NAME: &str = "metadata_enricher";

/// Stop words for keyword extraction, wider than the normalizer's set.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "this", "that", "these", "those", "i", "me", "my", "we", "us", "our", "you",
    "your", "he", "him", "his", "she", "her", "it", "its", "they", "them", "their", "can", "may",
    "might", "must", "shall", "from", "into", "through", "during", "before", "after", "above",
    "below", "up", "down", "out", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "just", "now",
];

fn default_true() -> bool {
    true
}

fn default_max_keywords() -> usize {
    15
}

fn default_min_keyword_length() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    #[serde(default = "default_true")]
    pub add_search_metadata: bool,
    #[serde(default = "default_true")]
    pub generate_keywords: bool,
    #[serde(default = "default_true")]
    pub extract_features: bool,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "default_min_keyword_length")]
    pub min_keyword_length: usize,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            add_search_metadata: true,
            generate_keywords: true,
            extract_features: true,
            max_keywords: default_max_keywords(),
            min_keyword_length: default_min_keyword_length(),
        }
    }
}

/// Adds derived metadata on top of normalized records: quality and
/// completeness scores, extracted features, market insights, and
/// semantic tags for search.
pub struct MetadataEnricher {
    config: TransformationConfig,
    settings: EnricherConfig,
    feature_patterns: Vec<(&'static str, Vec<Regex>)>,
    brand_prefix: Regex,
    capitalized: Regex,
    model_number: Regex,
    tech_spec: Regex,
    non_word: Regex,
}

impl MetadataEnricher {
    pub fn new(config: TransformationConfig, settings: EnricherConfig) -> Result<Self> {
        let compile = |patterns: &[&str]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| EtlError::Config {
                        message: format!("invalid feature pattern {p}: {e}"),
                    })
                })
                .collect()
        };

        let feature_patterns = vec![
            (
                "brand",
                compile(&[r"(?:by|Brand|from)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)"])?,
            ),
            (
                "color",
                compile(&[
                    r"(?i)\b(red|blue|green|yellow|black|white|gray|grey|brown|pink|purple|orange|gold|silver|navy|maroon|lime|cyan|magenta)\b",
                    r"(?i)\b([a-z]+-colou?red?)\b",
                    r"(?i)\b(multi-colored?|multicolored?)\b",
                ])?,
            ),
            (
                "size",
                compile(&[
                    r"(?i)\b(small|medium|large|extra\s*large|xl|xxl|xs)\b",
                    r"(?i)\b(\d+(?:\.\d+)?\s*(?:inch|inches|cm|mm|meter|metres?|feet|ft))\b",
                    r"(?i)\b(\d+(?:\.\d+)?\s*(?:kg|gram|grams|lb|pound|oz|ounce))\b",
                ])?,
            ),
            (
                "material",
                compile(&[
                    r"(?i)\b(cotton|silk|wool|polyester|leather|plastic|wood|metal|glass|ceramic|rubber)\b",
                    r"(?i)\b(stainless\s*steel|aluminum|brass|copper|iron)\b",
                    r"(?i)\b(organic|natural|synthetic|artificial)\b",
                ])?,
            ),
            (
                "technology",
                compile(&[
                    r"(?i)\b(bluetooth|wifi|wireless|usb|hdmi|4k|hd|full\s*hd|smart|digital)\b",
                    r"(?i)\b(android|ios|windows|linux)\b",
                    r"(?i)\b(led|lcd|oled|amoled)\b",
                ])?,
            ),
        ];

        Ok(Self {
            config,
            settings,
            feature_patterns,
            brand_prefix: Regex::new(r"^([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)").unwrap(),
            capitalized: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").unwrap(),
            model_number: Regex::new(r"\b[A-Z0-9]+[-_][A-Z0-9]+\b").unwrap(),
            tech_spec: Regex::new(r"\b\d+(?:\.\d+)?\s*(?:gb|mb|ghz|mhz|mp|inch|kg|g|ml|l)\b")
                .unwrap(),
            non_word: Regex::new(r"[^\w\s]").unwrap(),
        })
    }

    fn searchable_text(&self, record: &Record) -> String {
        let mut parts: Vec<String> = Vec::new();
        for key in ["name", "description"] {
            if let Some(s) = record.get_str(key) {
                if !s.is_empty() {
                    parts.push(s.to_string());
                }
            }
        }
        for section in ["category", "provider"] {
            if let Some(obj) = record.get(section).and_then(Value::as_object) {
                for key in ["name", "description"] {
                    if let Some(s) = obj.get(key).and_then(Value::as_str) {
                        if !s.is_empty() {
                            parts.push(s.to_string());
                        }
                    }
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

    fn normalize_for_search(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let cleaned = self.non_word.replace_all(&lowered, " ");
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn search_metadata(&self, record: &Record) -> Value {
        let name = record.get_str("name").unwrap_or_default();
        let description = record.get_str("description").unwrap_or_default();
        let image_count = record
            .get("images")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let word_count = format!("{name} {description}").split_whitespace().count();

        json!({
            "searchable_text": self.searchable_text(record),
            "normalized_name": self.normalize_for_search(name),
            "name_length": name.chars().count(),
            "description_length": description.chars().count(),
            "has_images": image_count > 0,
            "has_price": price_value(record.get("price")).1,
            "has_rating": rating(record) > 0.0,
            "word_count": word_count,
            "character_count": name.chars().count() + description.chars().count(),
        })
    }

    fn generated_keywords(&self, record: &Record) -> Vec<String> {
        let text = self.searchable_text(record);
        if text.is_empty() {
            return Vec::new();
        }

        let mut keywords: BTreeSet<String> = BTreeSet::new();
        keywords.extend(self.keywords_by_frequency(&text));
        keywords.extend(self.bigrams(&text));
        keywords.extend(self.keywords_by_pattern(&text));
        keywords.extend(self.category_keywords(record));

        let mut ranked: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        // longer, more specific terms first
        ranked.sort_by(|a, b| {
            let a_key = (a.split_whitespace().count(), a.len());
            let b_key = (b.split_whitespace().count(), b.len());
            b_key.cmp(&a_key).then_with(|| a.cmp(b))
        });
        ranked.truncate(self.settings.max_keywords);
        ranked
    }

    fn keywords_by_frequency(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let cleaned = self.non_word.replace_all(&lowered, " ");
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in cleaned.split_whitespace() {
            if word.len() >= self.settings.min_keyword_length && !STOP_WORDS.contains(&word) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> =
            counts.into_iter().filter(|(_, count)| *count > 1).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(10)
            .map(|(word, _)| word.to_string())
            .collect()
    }

    fn bigrams(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let cleaned = self.non_word.replace_all(&lowered, " ");
        let words: Vec<&str> = cleaned.split_whitespace().collect();
        let mut out = Vec::new();
        for pair in words.windows(2) {
            if pair.iter().any(|w| STOP_WORDS.contains(w)) {
                continue;
            }
            let bigram = pair.join(" ");
            if bigram.len() >= self.settings.min_keyword_length * 2 {
                out.push(bigram);
            }
        }
        out
    }

    fn keywords_by_pattern(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(
            self.capitalized
                .find_iter(text)
                .map(|m| m.as_str().to_string()),
        );
        out.extend(
            self.model_number
                .find_iter(text)
                .map(|m| m.as_str().to_string()),
        );
        let lower = text.to_lowercase();
        out.extend(self.tech_spec.find_iter(&lower).map(|m| m.as_str().to_string()));
        out
    }

    fn category_keywords(&self, record: &Record) -> Vec<String> {
        let category_keyword_map: [(&str, &[&str]); 5] = [
            ("electronics", &["device", "gadget", "tech", "digital", "electronic"]),
            ("fashion", &["style", "wear", "clothing", "apparel", "fashion"]),
            ("food", &["edible", "consumable", "nutrition", "dietary", "meal"]),
            ("home", &["household", "domestic", "interior", "living", "home"]),
            ("beauty", &["cosmetic", "skincare", "beauty", "grooming", "care"]),
        ];

        let category = category_name(record);
        let mut out = Vec::new();
        for (token, keywords) in category_keyword_map {
            if category.contains(token) {
                out.extend(keywords.iter().map(|k| k.to_string()));
            }
        }
        out
    }

    fn extracted_features(&self, record: &Record) -> Value {
        let text = self.searchable_text(record);
        let mut features = Map::new();
        for (feature_type, patterns) in &self.feature_patterns {
            let mut matches: BTreeSet<String> = BTreeSet::new();
            for pattern in patterns {
                for captures in pattern.captures_iter(&text) {
                    let matched = captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str().to_string());
                    if let Some(m) = matched {
                        matches.insert(m);
                    }
                }
            }
            features.insert(
                feature_type.to_string(),
                Value::Array(matches.into_iter().map(Value::String).collect()),
            );
        }
        Value::Object(features)
    }

    fn quality_score(&self, record: &Record) -> Value {
        let mut score = 0.0;
        let mut factors = Map::new();

        let name_len = record.get_str("name").unwrap_or_default().chars().count();
        let name_score = (name_len as f64 / 5.0).min(20.0);
        score += name_score;
        factors.insert("name_quality".to_string(), json!(name_score));

        let desc_len = record
            .get_str("description")
            .unwrap_or_default()
            .chars()
            .count();
        let desc_score = (desc_len as f64 / 10.0).min(25.0);
        score += desc_score;
        factors.insert("description_quality".to_string(), json!(desc_score));

        let image_count = record
            .get("images")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let image_score = ((image_count * 5) as f64).min(15.0);
        score += image_score;
        factors.insert("image_quality".to_string(), json!(image_score));

        let (_, price_valid) = price_value(record.get("price"));
        let price_score = if price_valid { 10.0 } else { 0.0 };
        score += price_score;
        factors.insert("price_quality".to_string(), json!(price_score));

        let rating = rating(record);
        let rating_score = if rating > 0.0 { rating / 5.0 * 15.0 } else { 0.0 };
        score += rating_score;
        factors.insert("rating_quality".to_string(), json!(rating_score));

        let completeness = self
            .data_completeness(record)
            .get("score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let completeness_score = completeness / 100.0 * 15.0;
        score += completeness_score;
        factors.insert("completeness_quality".to_string(), json!(completeness_score));

        json!({
            "score": score.min(100.0),
            "grade": score_to_grade(score),
            "factors": factors,
        })
    }

    fn popularity_indicators(&self, record: &Record) -> Value {
        let rating = rating(record);
        let rating_level = if rating >= 4.0 {
            "high"
        } else if rating >= 3.0 {
            "medium"
        } else {
            "low"
        };
        let image_count = record
            .get("images")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let detailed_description = record
            .get_str("description")
            .unwrap_or_default()
            .chars()
            .count()
            > 100;
        let brand_presence = self.extract_brand(record).is_some();
        let price_competitive = is_price_competitive(record);

        let mut score = 0u64;
        if rating > 0.0 {
            score += 20;
        }
        score += match rating_level {
            "high" => 25,
            "medium" => 15,
            _ => 5,
        };
        if image_count > 1 {
            score += 15;
        }
        if detailed_description {
            score += 20;
        }
        if brand_presence {
            score += 10;
        }
        if price_competitive {
            score += 10;
        }

        json!({
            "has_rating": rating > 0.0,
            "rating_level": rating_level,
            "has_multiple_images": image_count > 1,
            "detailed_description": detailed_description,
            "brand_presence": brand_presence,
            "price_competitive": price_competitive,
            "popularity_score": score,
        })
    }

    fn extract_brand(&self, record: &Record) -> Option<String> {
        if let Some(brand) = record
            .get_path("attributes.brand")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            return Some(brand.to_string());
        }
        let name = record.get_str("name").unwrap_or_default();
        self.brand_prefix
            .captures(name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn market_insights(&self, record: &Record) -> Value {
        let (price, _) = price_value(record.get("price"));
        let category = category_name(record);
        let popular = ["electronics", "fashion", "food", "mobile", "clothing"]
            .iter()
            .any(|c| category.contains(c));

        json!({
            "price_segment": price_segment(price),
            "category_popularity": if popular { "high" } else { "medium" },
            "seasonal_relevance": self.seasonal_relevance(record),
            "target_demographic": self.target_demographic(record),
        })
    }

    fn seasonal_relevance(&self, record: &Record) -> Vec<&'static str> {
        let seasonal_keywords: [(&str, &[&str]); 4] = [
            ("summer", &["summer", "cooling", "ac", "fan", "swimwear", "shorts"]),
            ("winter", &["winter", "heating", "warm", "jacket", "sweater", "heater"]),
            ("monsoon", &["rain", "umbrella", "waterproof", "monsoon"]),
            ("festival", &["diwali", "christmas", "eid", "holi", "gift", "decoration"]),
        ];

        let text = self.searchable_text(record).to_lowercase();
        let seasons: Vec<&'static str> = seasonal_keywords
            .into_iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(season, _)| season)
            .collect();
        if seasons.is_empty() {
            vec!["year-round"]
        } else {
            seasons
        }
    }

    fn target_demographic(&self, record: &Record) -> Vec<&'static str> {
        let text = self.searchable_text(record).to_lowercase();
        let (price, _) = price_value(record.get("price"));
        let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

        let mut demographics = Vec::new();
        demographics.push(if contains_any(&["kid", "child", "baby", "infant"]) {
            "children"
        } else if contains_any(&["teen", "youth", "young"]) {
            "teenagers"
        } else if contains_any(&["senior", "elderly"]) {
            "seniors"
        } else {
            "adults"
        });
        demographics.push(if contains_any(&["men", "male", "man's", "boys"]) {
            "male"
        } else if contains_any(&["women", "female", "woman's", "girls", "ladies"]) {
            "female"
        } else {
            "unisex"
        });
        demographics.push(if price < 1000.0 {
            "budget-conscious"
        } else if price > 10000.0 {
            "affluent"
        } else {
            "middle-income"
        });
        demographics
    }

    fn semantic_tags(&self, record: &Record) -> Vec<String> {
        let semantic_mapping: [(&str, &[&str]); 8] = [
            ("electronics", &["technology", "digital", "gadget", "device"]),
            ("food", &["consumable", "edible", "nutrition", "grocery"]),
            ("clothing", &["wearable", "fashion", "apparel", "textile"]),
            ("home", &["household", "domestic", "living", "interior"]),
            ("beauty", &["cosmetic", "personal-care", "grooming", "wellness"]),
            ("sports", &["fitness", "athletic", "exercise", "recreation"]),
            ("books", &["educational", "knowledge", "literature", "reading"]),
            ("toys", &["entertainment", "play", "recreation", "fun"]),
        ];

        let mut tags: BTreeSet<String> = BTreeSet::new();
        let category = category_name(record);
        for (token, semantic) in semantic_mapping {
            if category.contains(token) {
                tags.extend(semantic.iter().map(|t| t.to_string()));
            }
        }

        if let Some(features) = self.extracted_features(record).as_object() {
            for (feature_type, values) in features {
                if values.as_array().is_some_and(|v| !v.is_empty()) {
                    tags.insert(format!("has-{feature_type}"));
                }
            }
        }

        let (price, _) = price_value(record.get("price"));
        tags.insert(format!("price-{}", price_segment(price)));

        let available = record
            .get("availability")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        tags.insert(if available { "available" } else { "out-of-stock" }.to_string());

        let quality = self
            .quality_score(record)
            .get("score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        tags.insert(
            if quality >= 80.0 {
                "high-quality"
            } else if quality >= 60.0 {
                "good-quality"
            } else {
                "basic-quality"
            }
            .to_string(),
        );

        tags.into_iter().collect()
    }

    fn data_completeness(&self, record: &Record) -> Value {
        let required_fields = ["id", "name", "price"];
        let important_fields = ["description", "category", "provider", "images"];
        let optional_fields = ["rating", "tags", "attributes", "location"];

        let mut required_score = 0.0;
        let mut missing_required = Vec::new();
        for field in required_fields {
            let present = if field == "price" {
                price_value(record.get("price")).1
            } else {
                record.get(field).is_some_and(is_truthy)
            };
            if present {
                required_score += 40.0 / required_fields.len() as f64;
            } else {
                missing_required.push(field);
            }
        }

        let mut important_score = 0.0;
        let mut missing_important = Vec::new();
        for field in important_fields {
            if record.get(field).is_some_and(is_truthy) {
                important_score += 40.0 / important_fields.len() as f64;
            } else {
                missing_important.push(field);
            }
        }

        let mut optional_score = 0.0;
        for field in optional_fields {
            if record.get(field).is_some_and(is_truthy) {
                optional_score += 20.0 / optional_fields.len() as f64;
            }
        }

        let total = required_score + important_score + optional_score;
        json!({
            "score": total.min(100.0),
            "breakdown": {
                "required": required_score,
                "important": important_score,
                "optional": optional_score,
            },
            "missing_required": missing_required,
            "missing_important": missing_important,
        })
    }
}

#[async_trait]
impl Transformer for MetadataEnricher {
    fn transformer_name(&self) -> &str {
        TRANSFORMER_NAME
    }

    fn config(&self) -> &TransformationConfig {
        &self.config
    }

    async fn transform_record(&self, record: &Record) -> Result<Record> {
        let mut enriched = record.clone();

        if self.settings.add_search_metadata {
            enriched.insert("search_metadata".to_string(), self.search_metadata(record));
        }
        if self.settings.generate_keywords {
            enriched.insert(
                "generated_keywords".to_string(),
                Value::Array(
                    self.generated_keywords(record)
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }
        if self.settings.extract_features {
            enriched.insert(
                "extracted_features".to_string(),
                self.extracted_features(record),
            );
        }

        enriched.insert("quality_score".to_string(), self.quality_score(record));
        enriched.insert(
            "popularity_indicators".to_string(),
            self.popularity_indicators(record),
        );
        enriched.insert("market_insights".to_string(), self.market_insights(record));
        enriched.insert(
            "semantic_tags".to_string(),
            Value::Array(
                self.semantic_tags(record)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
        );
        enriched.insert(
            "data_completeness".to_string(),
            self.data_completeness(record),
        );
        enriched.insert(
            "metadata_enriched_at".to_string(),
            Utc::now().to_rfc3339().into(),
        );

        Ok(enriched)
    }
}

/// Tolerates the price field in any shape a source may have left it in.
fn price_value(price: Option<&Value>) -> (f64, bool) {
    match price {
        Some(Value::Object(price)) => {
            let value = price
                .get("value")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let valid = price.get("valid").and_then(Value::as_bool).unwrap_or(false);
            (value, valid)
        }
        Some(Value::Number(n)) => {
            let value = n.as_f64().unwrap_or(0.0);
            (value, value > 0.0)
        }
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(value) => (value, value > 0.0),
            Err(_) => (0.0, false),
        },
        _ => (0.0, false),
    }
}

fn rating(record: &Record) -> f64 {
    record.get("rating").and_then(Value::as_f64).unwrap_or(0.0)
}

fn category_name(record: &Record) -> String {
    record
        .get_path("category.name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

fn score_to_grade(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 70.0 {
        "C"
    } else if score >= 60.0 {
        "D"
    } else {
        "F"
    }
}

fn price_segment(price: f64) -> &'static str {
    if price == 0.0 {
        "free"
    } else if price < 500.0 {
        "economy"
    } else if price < 2000.0 {
        "budget"
    } else if price < 10000.0 {
        "mid-range"
    } else if price < 50000.0 {
        "premium"
    } else {
        "luxury"
    }
}

fn is_price_competitive(record: &Record) -> bool {
    let (value, _) = price_value(record.get("price"));
    if value == 0.0 {
        false
    } else if value < 1000.0 {
        true
    } else {
        value % 100.0 == 0.0 || value % 500.0 == 0.0
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
