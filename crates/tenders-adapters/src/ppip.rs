//! Open Contracting (OCDS) release feed of the public procurement portal.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tenders_core::{eat, Source, TenderCandidate};
use tenders_storage::HttpFetcher;
use tracing::{debug, error, info, warn};

use crate::{text_or_none, AdapterError, FetchedPage, SourceAdapter};

pub const PPIP_OCDS_URL: &str = "https://tenders.go.ke/api/ocds/tenders";

/// Kenyan fiscal years start on 1 July.
const FISCAL_YEAR_START_MONTH: u32 = 7;

/// `2024-2025` for any date from July 2024 through June 2025.
pub fn fiscal_year(date: NaiveDate) -> String {
    let start = if date.month() >= FISCAL_YEAR_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}-{}", start, start + 1)
}

#[derive(Debug, Clone)]
pub struct PpipAdapter {
    url: String,
}

impl PpipAdapter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for PpipAdapter {
    fn default() -> Self {
        Self::new(PPIP_OCDS_URL)
    }
}

#[async_trait]
impl SourceAdapter for PpipAdapter {
    fn source(&self) -> Source {
        Source::Ppip
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        now: DateTime<Utc>,
    ) -> Result<FetchedPage, AdapterError> {
        let fy = fiscal_year(now.with_timezone(&eat()).date_naive());
        debug!(fy = %fy, "requesting ocds releases");
        let resp = http
            .fetch(&self.url, &[("fy", fy.as_str())], &[("Accept", "application/json")])
            .await?;
        Ok(FetchedPage::from_response(resp, now))
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<TenderCandidate>, AdapterError> {
        let payload: JsonValue = match serde_json::from_slice(&page.body) {
            Ok(value) => value,
            Err(err) => {
                error!(url = %page.url, error = %err, "ocds payload is not valid json");
                return Ok(Vec::new());
            }
        };
        let Some(root) = payload.as_object() else {
            error!(url = %page.url, "ocds payload is not a json object");
            return Ok(Vec::new());
        };
        let Some(releases) = root.get("releases") else {
            info!(url = %page.url, "ocds payload has no releases");
            return Ok(Vec::new());
        };
        let Some(releases) = releases.as_array() else {
            error!(url = %page.url, "ocds releases is not an array");
            return Ok(Vec::new());
        };

        let mut candidates = Vec::new();
        for (index, raw) in releases.iter().enumerate() {
            let release = match OcdsRelease::deserialize(raw) {
                Ok(release) => release,
                Err(err) => {
                    warn!(index, error = %err, "skipping malformed release");
                    continue;
                }
            };
            match release.into_candidate() {
                Some(candidate) => candidates.push(candidate),
                None => debug!(index, "release without reference or title dropped"),
            }
        }
        info!(url = %page.url, count = candidates.len(), "parsed ocds releases");
        Ok(candidates)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcdsRelease {
    date: Option<String>,
    buyer: Option<OcdsParty>,
    tender: Option<OcdsTender>,
}

#[derive(Debug, Default, Deserialize)]
struct OcdsParty {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcdsTender {
    /// Published both as a string and as a bare number.
    id: Option<JsonValue>,
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    main_procurement_category: Option<String>,
    procurement_method: Option<String>,
    value: Option<OcdsValue>,
    tender_period: Option<OcdsPeriod>,
    documents: Option<Vec<OcdsDocument>>,
}

#[derive(Debug, Default, Deserialize)]
struct OcdsValue {
    amount: Option<JsonValue>,
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcdsPeriod {
    end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OcdsDocument {
    url: Option<String>,
}

impl OcdsRelease {
    fn into_candidate(self) -> Option<TenderCandidate> {
        let tender = self.tender?;
        let reference = tender.id.as_ref().and_then(scalar_text)?;
        let title = tender.title.and_then(text_or_none)?;

        let mut candidate = TenderCandidate::new(Source::Ppip, reference, title);
        candidate.description = tender.description.and_then(text_or_none);
        candidate.procuring_entity = self.buyer.and_then(|b| b.name).and_then(text_or_none);
        candidate.category = tender.main_procurement_category.and_then(text_or_none);
        candidate.procurement_method = tender.procurement_method.and_then(text_or_none);
        if let Some(value) = tender.value {
            candidate.value = value.amount.as_ref().and_then(scalar_text);
            candidate.currency = value.currency.and_then(text_or_none);
        }
        candidate.closing_date_raw = tender
            .tender_period
            .and_then(|p| p.end_date)
            .and_then(text_or_none);
        candidate.published_date_raw = self.date.and_then(text_or_none);
        candidate.document_url = tender
            .documents
            .and_then(|docs| docs.into_iter().next())
            .and_then(|doc| doc.url)
            .and_then(text_or_none);
        candidate.upstream_status = tender.status.and_then(text_or_none);
        Some(candidate)
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
