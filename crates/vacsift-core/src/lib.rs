//! Core domain model for vacsift: raw and enriched postings plus run-scoped reference data.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "vacsift-core";

/// Experience requirement bucket as enumerated by the listings API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExperienceBucket {
    NoExperience,
    Between1And3,
    Between3And6,
    MoreThan6,
}

impl ExperienceBucket {
    pub const ALL: [ExperienceBucket; 4] = [
        ExperienceBucket::NoExperience,
        ExperienceBucket::Between1And3,
        ExperienceBucket::Between3And6,
        ExperienceBucket::MoreThan6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceBucket::NoExperience => "noExperience",
            ExperienceBucket::Between1And3 => "between1And3",
            ExperienceBucket::Between3And6 => "between3And6",
            ExperienceBucket::MoreThan6 => "moreThan6",
        }
    }

    /// Localized label the API returns next to the id.
    pub fn display_name(&self) -> &'static str {
        match self {
            ExperienceBucket::NoExperience => "Нет опыта",
            ExperienceBucket::Between1And3 => "От 1 года до 3 лет",
            ExperienceBucket::Between3And6 => "От 3 до 6 лет",
            ExperienceBucket::MoreThan6 => "Более 6 лет",
        }
    }

    pub fn from_api_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == id.trim())
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.display_name().eq_ignore_ascii_case(name.trim()))
    }
}

/// The four semi-structured sub-fields served by the per-posting detail endpoint.
///
/// `key_skills`, `languages` and `schedule` stay as text exactly as received:
/// absent, an empty-list marker, or a (possibly single-quoted) JSON-like fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DetailPayload {
    pub key_skills: Option<String>,
    pub languages: Option<String>,
    pub schedule: Option<String>,
    pub description: Option<String>,
}

impl DetailPayload {
    pub fn is_empty(&self) -> bool {
        self.key_skills.is_none()
            && self.languages.is_none()
            && self.schedule.is_none()
            && self.description.is_none()
    }
}

/// Posting as produced by a record source, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    /// Source-assigned identifier, unique per source.
    pub id: String,
    pub title: String,
    pub employer: Option<String>,
    pub locality: Option<String>,
    pub salary_from: Option<f64>,
    pub salary_to: Option<f64>,
    pub currency: Option<String>,
    pub experience: Option<ExperienceBucket>,
    pub published_at: DateTime<FixedOffset>,
    pub detail_url: String,
    #[serde(default)]
    pub detail: DetailPayload,
}

/// Canonical output record. Serializes as a flat row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPosting {
    pub id: String,
    pub title: String,
    pub employer: Option<String>,
    pub locality: Option<String>,
    pub country: String,
    /// Lower salary bound in the base currency. Null iff `salary_to` is null.
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
    pub experience: Option<ExperienceBucket>,
    pub published_at: DateTime<FixedOffset>,
    pub detail_url: String,
    pub key_skills: Option<Vec<String>>,
    pub language: Option<String>,
    pub language_level: Option<String>,
    pub schedule: Option<String>,
    pub description: Option<String>,
}

impl EnrichedPosting {
    pub fn store_key(&self) -> Uuid {
        posting_key(&self.id)
    }
}

/// Deterministic store key for a source posting id; re-inserting the same posting hits the same key.
pub fn posting_key(source_posting_id: &str) -> Uuid {
    let name = format!("vacsift:posting:{}", source_posting_id.trim());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

/// A persisted posting together with its opaque store key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPosting {
    pub key: Uuid,
    pub posting: EnrichedPosting,
}

impl From<EnrichedPosting> for StoredPosting {
    fn from(posting: EnrichedPosting) -> Self {
        Self {
            key: posting.store_key(),
            posting,
        }
    }
}

/// Rates of each currency relative to `base` (units of currency per one base unit).
///
/// Fetched once per run and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRateTable {
    pub base: String,
    #[serde(default)]
    pub rates: BTreeMap<String, f64>,
}

impl CurrencyRateTable {
    pub fn new(base: impl Into<String>, rates: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            base: base.into().to_ascii_uppercase(),
            rates: rates
                .into_iter()
                .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
                .collect(),
        }
    }

    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(&code.to_ascii_uppercase()).copied()
    }

    pub fn is_base(&self, code: &str) -> bool {
        self.base.eq_ignore_ascii_case(code)
    }
}

/// One node of the geography catalog tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaNode {
    pub name: String,
    #[serde(rename = "areas", default)]
    pub children: Vec<AreaNode>,
}

impl AreaNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<AreaNode>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

/// Read-only catalog of top-level areas (countries and the "other regions" bucket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct GeographyCatalog {
    pub roots: Vec<AreaNode>,
}

impl GeographyCatalog {
    pub fn new(roots: Vec<AreaNode>) -> Self {
        Self { roots }
    }
}
