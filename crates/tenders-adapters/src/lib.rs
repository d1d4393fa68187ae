//! Source adapter contract plus the two upstream extractors.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use tenders_core::{Source, TenderCandidate};
use tenders_storage::{FetchError, FetchedResponse, HttpFetcher};
use thiserror::Error;

pub mod mygov;
pub mod ppip;

pub use mygov::{MyGovAdapter, MYGOV_TENDERS_URL};
pub use ppip::{fiscal_year, PpipAdapter, PPIP_OCDS_URL};

pub const CRATE_NAME: &str = "tenders-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
            body: body.into(),
            fetched_at,
        }
    }

    pub fn from_response(resp: FetchedResponse, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: resp.final_url,
            content_type: resp.content_type,
            body: resp.body,
            fetched_at,
        }
    }

    /// Read a captured page from disk, e.g. a fixture.
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
        url: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Self::new(url, body, fetched_at))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

/// One upstream. Fetch failures are errors; layout or schema drift is not:
/// `parse_listing` degrades to an empty batch and logs.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        now: DateTime<Utc>,
    ) -> Result<FetchedPage, AdapterError>;

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<TenderCandidate>, AdapterError>;
}

pub fn adapter_for_source(source: Source, url: impl Into<String>) -> Box<dyn SourceAdapter> {
    match source {
        Source::MyGov => Box::new(MyGovAdapter::new(url)),
        Source::Ppip => Box::new(PpipAdapter::new(url)),
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Element text with inner whitespace collapsed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn select_first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).next().map(element_text)
}

pub(crate) fn select_first_attr(scope: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}
