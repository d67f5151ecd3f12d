//! Record source contracts, the listings-API source, an offline fixture source, and the
//! loaders for run-scoped reference data (currency rates, geography catalog).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vacsift_core::{CurrencyRateTable, DetailPayload, ExperienceBucket, GeographyCatalog, RawPosting};
use vacsift_storage::{FetchError, HttpFetcher};

pub const CRATE_NAME: &str = "vacsift-adapters";

pub const HH_SOURCE_ID: &str = "hh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl SourceContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            fetched_at: Utc::now(),
        }
    }
}

/// Postings of one listing pass plus the raw pages they were parsed from.
#[derive(Debug, Clone, Default)]
pub struct ListingBatch {
    pub pages: Vec<FetchedPage>,
    pub postings: Vec<RawPosting>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Walk the listing pages and return every parseable posting, deduplicated by source id.
    async fn fetch_postings(&self, ctx: &SourceContext) -> Result<ListingBatch, AdapterError>;

    /// Fetch the semi-structured sub-fields for one posting.
    async fn fetch_detail(
        &self,
        ctx: &SourceContext,
        detail_url: &str,
    ) -> Result<DetailPayload, AdapterError>;
}

/// What to search for and how far to page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    #[serde(default = "default_pages")]
    pub pages: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            queries: default_queries(),
            pages: default_pages(),
            per_page: default_per_page(),
            period_days: default_period_days(),
        }
    }
}

fn default_queries() -> Vec<String> {
    vec![
        "NAME:\"data engineer\"".to_string(),
        "NAME:\"data-engineer\"".to_string(),
        "NAME:\"дата инженер\"".to_string(),
        "NAME:\"дата-инженер\"".to_string(),
    ]
}
fn default_pages() -> u32 {
    20
}
fn default_per_page() -> u32 {
    100
}
fn default_period_days() -> u32 {
    3
}

fn json_value<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_value(value, path)?.as_str()
}

fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    json_value(value, path)?.as_f64()
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Accepts RFC 3339 and the API's `+0300` offset style.
pub fn parse_published_at(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
}

/// Map one listings-API item to a raw posting. Items without an id, a detail URL or a
/// readable publication time are rejected.
pub fn posting_from_api_item(item: &JsonValue) -> Result<RawPosting, AdapterError> {
    let id = match json_value(item, &["id"]) {
        Some(JsonValue::String(s)) => text_or_none(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
    .ok_or_else(|| AdapterError::Message("item has no id".to_string()))?;

    let detail_url = json_str(item, &["url"])
        .and_then(text_or_none)
        .ok_or_else(|| AdapterError::Message(format!("item {id} has no detail url")))?;

    let published_raw = json_str(item, &["published_at"]).unwrap_or_default();
    let published_at = parse_published_at(published_raw).ok_or_else(|| {
        AdapterError::Message(format!(
            "item {id} has unreadable published_at {published_raw:?}"
        ))
    })?;

    let experience = json_str(item, &["experience", "id"])
        .and_then(ExperienceBucket::from_api_id)
        .or_else(|| json_str(item, &["experience", "name"]).and_then(ExperienceBucket::from_display_name));

    Ok(RawPosting {
        title: json_str(item, &["name"]).unwrap_or_default().trim().to_string(),
        employer: json_str(item, &["employer", "name"]).and_then(text_or_none),
        locality: json_str(item, &["area", "name"]).and_then(text_or_none),
        salary_from: json_f64(item, &["salary", "from"]),
        salary_to: json_f64(item, &["salary", "to"]),
        currency: json_str(item, &["salary", "currency"]).and_then(text_or_none),
        experience,
        published_at,
        detail_url,
        detail: DetailPayload::default(),
        id,
    })
}

fn render_fragment(value: Option<&JsonValue>) -> Option<String> {
    match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => text_or_none(s),
        Some(other) => serde_json::to_string(other).ok(),
    }
}

/// Keep the detail sub-fields as text; interpretation happens during enrichment.
pub fn detail_from_api(value: &JsonValue) -> DetailPayload {
    DetailPayload {
        key_skills: render_fragment(value.get("key_skills")),
        languages: render_fragment(value.get("languages")),
        schedule: render_fragment(value.get("schedule")),
        description: json_str(value, &["description"]).and_then(text_or_none),
    }
}

/// Parse every item of a listing page body, skipping rejects. Returns `None` when the
/// body has no `items` array (end of results or an error payload).
fn parse_listing_page(
    body: &JsonValue,
    seen: &mut HashSet<String>,
    out: &mut Vec<RawPosting>,
) -> Option<usize> {
    let items = body.get("items")?.as_array()?;
    let mut accepted = 0usize;
    for item in items {
        match posting_from_api_item(item) {
            Ok(posting) => {
                if seen.insert(posting.id.clone()) {
                    out.push(posting);
                    accepted += 1;
                }
            }
            Err(err) => warn!(error = %err, "skipping listing item"),
        }
    }
    Some(accepted)
}

/// Listings API source (`/vacancies` search plus per-posting detail endpoint).
pub struct HhApiSource {
    http: Arc<HttpFetcher>,
    api_base: String,
    search: SearchSettings,
}

impl HhApiSource {
    pub fn new(http: Arc<HttpFetcher>, api_base: impl Into<String>, search: SearchSettings) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            search,
        }
    }

    pub fn vacancies_url(&self, query: &str, page: u32) -> Result<String, AdapterError> {
        let base = format!("{}/vacancies", self.api_base.trim_end_matches('/'));
        let mut url = Url::parse(&base)
            .map_err(|e| AdapterError::Message(format!("invalid api base {base}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("text", query)
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.search.per_page.min(100).to_string())
            .append_pair("only_with_salary", "false")
            .append_pair("period", &self.search.period_days.to_string());
        Ok(url.to_string())
    }
}

#[async_trait]
impl RecordSource for HhApiSource {
    fn source_id(&self) -> &'static str {
        HH_SOURCE_ID
    }

    async fn fetch_postings(&self, ctx: &SourceContext) -> Result<ListingBatch, AdapterError> {
        let mut batch = ListingBatch::default();
        let mut seen = HashSet::new();

        for query in &self.search.queries {
            info!(run_id = %ctx.run_id, query, "collecting listing pages");
            for page in 0..self.search.pages {
                let url = self.vacancies_url(query, page)?;
                let response = match self.http.fetch_bytes(ctx.run_id, HH_SOURCE_ID, &url).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(error = %err, url, "listing page fetch failed; moving to next query");
                        break;
                    }
                };
                let body: JsonValue = match serde_json::from_slice(&response.body) {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(error = %err, url, "listing page is not JSON; moving to next query");
                        break;
                    }
                };
                batch.pages.push(FetchedPage {
                    url: response.final_url,
                    content_type: "application/json".to_string(),
                    body: response.body,
                    fetched_at: Utc::now(),
                });

                let Some(accepted) = parse_listing_page(&body, &mut seen, &mut batch.postings) else {
                    debug!(url, "page has no items; stopping query");
                    break;
                };
                debug!(query, page, accepted, "parsed listing page");

                let total_pages = body.get("pages").and_then(JsonValue::as_u64);
                if total_pages.is_some_and(|total| u64::from(page) + 1 >= total) {
                    break;
                }
            }
        }

        info!(
            run_id = %ctx.run_id,
            pages = batch.pages.len(),
            postings = batch.postings.len(),
            "listing pass complete"
        );
        Ok(batch)
    }

    async fn fetch_detail(
        &self,
        ctx: &SourceContext,
        detail_url: &str,
    ) -> Result<DetailPayload, AdapterError> {
        let value: JsonValue = self
            .http
            .fetch_json(ctx.run_id, HH_SOURCE_ID, detail_url)
            .await?;
        Ok(detail_from_api(&value))
    }
}

/// Captured listing items and detail bodies for offline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    pub items: Vec<JsonValue>,
    #[serde(default)]
    pub details: BTreeMap<String, JsonValue>,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    read_json_file(path)
}

pub struct FixtureSource {
    bundle: FixtureBundle,
}

impl FixtureSource {
    pub fn new(bundle: FixtureBundle) -> Self {
        Self { bundle }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_bundle(path)?))
    }
}

#[async_trait]
impl RecordSource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_postings(&self, _ctx: &SourceContext) -> Result<ListingBatch, AdapterError> {
        let body = serde_json::json!({ "items": self.bundle.items });
        let mut batch = ListingBatch {
            pages: vec![FetchedPage {
                url: format!("fixture://{}", self.bundle.source_id),
                content_type: "application/json".to_string(),
                body: serde_json::to_vec(&body)
                    .map_err(|e| AdapterError::Message(format!("re-encoding fixture items: {e}")))?,
                fetched_at: self.bundle.fetched_at,
            }],
            postings: Vec::new(),
        };
        let mut seen = HashSet::new();
        parse_listing_page(&body, &mut seen, &mut batch.postings);
        Ok(batch)
    }

    async fn fetch_detail(
        &self,
        _ctx: &SourceContext,
        detail_url: &str,
    ) -> Result<DetailPayload, AdapterError> {
        self.bundle
            .details
            .get(detail_url)
            .map(detail_from_api)
            .ok_or_else(|| AdapterError::Message(format!("no detail fixture for {detail_url}")))
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    base: Option<String>,
    #[serde(default)]
    rates: BTreeMap<String, f64>,
}

fn rates_from_response(response: RatesResponse, base: &str) -> Result<CurrencyRateTable, AdapterError> {
    if let Some(served) = &response.base {
        if !served.eq_ignore_ascii_case(base) {
            return Err(AdapterError::Message(format!(
                "rate table is based on {served}, expected {base}"
            )));
        }
    }
    if response.rates.is_empty() {
        return Err(AdapterError::Message("rate table is empty".to_string()));
    }
    Ok(CurrencyRateTable::new(base, response.rates))
}

/// Fetch `{rates_url}/{base}` from an exchange-rate API.
pub async fn fetch_rate_table(
    http: &HttpFetcher,
    run_id: Uuid,
    rates_url: &str,
    base: &str,
) -> Result<CurrencyRateTable, AdapterError> {
    let url = format!("{}/{}", rates_url.trim_end_matches('/'), base.to_ascii_uppercase());
    let response: RatesResponse = http.fetch_json(run_id, "rates", &url).await?;
    let table = rates_from_response(response, base)?;
    info!(base = %table.base, currencies = table.rates.len(), "loaded currency rates");
    Ok(table)
}

pub async fn fetch_geography_catalog(
    http: &HttpFetcher,
    run_id: Uuid,
    areas_url: &str,
) -> Result<GeographyCatalog, AdapterError> {
    let catalog: GeographyCatalog = http.fetch_json(run_id, "areas", areas_url).await?;
    if catalog.roots.is_empty() {
        return Err(AdapterError::Message(format!("geography catalog at {areas_url} is empty")));
    }
    info!(roots = catalog.roots.len(), "loaded geography catalog");
    Ok(catalog)
}

pub fn load_rate_table_file(path: impl AsRef<Path>, base: &str) -> Result<CurrencyRateTable> {
    let path = path.as_ref();
    let response: RatesResponse = read_json_file(path)?;
    rates_from_response(response, base).with_context(|| format!("validating {}", path.display()))
}

pub fn load_geography_catalog_file(path: impl AsRef<Path>) -> Result<GeographyCatalog> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
