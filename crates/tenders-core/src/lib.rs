//! Core domain model for tender ingestion: candidates, stored records and derived views.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

pub mod dates;
pub mod format;

pub use dates::{eat, parse_date};
pub use format::{format_candidate, format_stored, shorten};

pub const CRATE_NAME: &str = "tenders-core";

pub const DEFAULT_CURRENCY: &str = "KES";

/// Upstream a record was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Rendered listing page (tabular markup).
    MyGov,
    /// Open-contracting JSON feed.
    Ppip,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::MyGov, Source::Ppip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::MyGov => "mygov",
            Source::Ppip => "ppip",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tender source `{}`", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mygov" => Ok(Source::MyGov),
            "ppip" => Ok(Source::Ppip),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Raw extractor output. Dates are still the upstream text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderCandidate {
    pub source: Source,
    pub reference: String,
    pub title: String,
    pub description: Option<String>,
    pub procuring_entity: Option<String>,
    pub procurement_method: Option<String>,
    pub category: Option<String>,
    pub value: Option<String>,
    pub currency: Option<String>,
    pub document_url: Option<String>,
    pub closing_date_raw: Option<String>,
    pub published_date_raw: Option<String>,
    /// Status string as published upstream; informational only.
    pub upstream_status: Option<String>,
}

impl TenderCandidate {
    pub fn new(source: Source, reference: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            reference: reference.into(),
            title: title.into(),
            description: None,
            procuring_entity: None,
            procurement_method: None,
            category: None,
            value: None,
            currency: None,
            document_url: None,
            closing_date_raw: None,
            published_date_raw: None,
            upstream_status: None,
        }
    }
}

/// Persistable projection of a formatted candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTender {
    pub reference: String,
    pub source: Source,
    pub title: String,
    pub description: Option<String>,
    pub procuring_entity: Option<String>,
    pub procurement_method: Option<String>,
    pub category: Option<String>,
    pub value: Option<String>,
    pub currency: String,
    pub document_url: Option<String>,
    pub closing_date: Option<DateTime<Utc>>,
    pub published_date: Option<DateTime<Utc>>,
}

impl From<&TenderView> for NewTender {
    fn from(view: &TenderView) -> Self {
        Self {
            reference: view.reference.clone(),
            source: view.source,
            title: view.title.clone(),
            description: view.description.clone(),
            procuring_entity: view.procuring_entity.clone(),
            procurement_method: view.procurement_method.clone(),
            category: view.category.clone(),
            value: view.value.clone(),
            currency: view.currency.clone(),
            document_url: view.document_url.clone(),
            closing_date: view.closing_date.map(|d| d.with_timezone(&Utc)),
            published_date: view.published_date.map(|d| d.with_timezone(&Utc)),
        }
    }
}

/// Durable tender row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTender {
    pub id: i64,
    pub reference: String,
    pub source: Source,
    pub title: String,
    pub description: Option<String>,
    pub procuring_entity: Option<String>,
    pub procurement_method: Option<String>,
    pub category: Option<String>,
    pub value: Option<String>,
    pub currency: String,
    pub document_url: Option<String>,
    pub closing_date: Option<DateTime<Utc>>,
    pub published_date: Option<DateTime<Utc>>,
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenderStatus {
    Open,
    ClosingSoon,
    Closed,
    Unknown,
}

impl TenderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TenderStatus::Open | TenderStatus::ClosingSoon)
    }
}

/// Read-time view with derived schedule fields. Built fresh, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderView {
    pub id: Option<i64>,
    pub reference: String,
    pub source: Source,
    pub title: String,
    pub description: Option<String>,
    pub procuring_entity: Option<String>,
    pub procurement_method: Option<String>,
    pub category: Option<String>,
    pub value: Option<String>,
    pub currency: String,
    pub document_url: Option<String>,
    pub closing_date: Option<DateTime<FixedOffset>>,
    pub published_date: Option<DateTime<FixedOffset>>,
    pub is_processed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub status: TenderStatus,
    pub last_updated: DateTime<FixedOffset>,
    pub offline_available: bool,
}

impl TenderView {
    /// Same view bound to the id the store assigned.
    pub fn with_id(self, id: i64) -> Self {
        Self { id: Some(id), ..self }
    }
}

/// Date-window filter applied by the read side, relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    Open,
    Closed,
    ClosingSoon,
    OpenWeek,
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(StatusFilter::Open),
            "closed" => Ok(StatusFilter::Closed),
            "closing_soon" => Ok(StatusFilter::ClosingSoon),
            "open_week" => Ok(StatusFilter::OpenWeek),
            other => Err(format!("unknown status filter `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderFilters {
    pub status: Option<StatusFilter>,
    pub category: Option<String>,
    pub entity: Option<String>,
    pub days_remaining: Option<i64>,
    pub source: Option<Source>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: i64,
    pub open: i64,
    pub closed: i64,
    pub closing_soon: i64,
    pub by_source: std::collections::BTreeMap<Source, i64>,
    /// Top categories, count descending then name ascending.
    pub by_category: Vec<CategoryCount>,
    pub last_updated: DateTime<FixedOffset>,
}
