//! Rendered tender listing published as a Drupal views table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use scraper::{ElementRef, Html};
use tenders_core::{Source, TenderCandidate};
use tenders_storage::HttpFetcher;
use tracing::{debug, info, warn};

use crate::{
    select_first_attr, select_first_text, selector, text_or_none, AdapterError, FetchedPage,
    SourceAdapter,
};

pub const MYGOV_TENDERS_URL: &str = "https://www.mygov.go.ke/all-tenders";

const TABLE: &str = "table#datatable";
const ROWS: &str = "tbody tr";
const REFERENCE_CELL: &str = "td.views-field-counter";
const TITLE_CELL: &str = "td.views-field-title";
const ENTITY_CELL: &str = "td.views-field-field-ten";
const DOCUMENT_LINK: &str = "td.views-field-field-tender-documents a[href]";
const CLOSING_DATE_CELL: &str = "td.views-field-field-tender-closing-date";

#[derive(Debug, Clone)]
pub struct MyGovAdapter {
    url: String,
}

impl MyGovAdapter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for MyGovAdapter {
    fn default() -> Self {
        Self::new(MYGOV_TENDERS_URL)
    }
}

#[async_trait]
impl SourceAdapter for MyGovAdapter {
    fn source(&self) -> Source {
        Source::MyGov
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        now: DateTime<Utc>,
    ) -> Result<FetchedPage, AdapterError> {
        let resp = http.fetch(&self.url, &[], &[]).await?;
        Ok(FetchedPage::from_response(resp, now))
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<TenderCandidate>, AdapterError> {
        let cells = RowSelectors::new()?;
        let document = Html::parse_document(&page.text());

        let Some(table) = document.select(&selector(TABLE)?).next() else {
            warn!(url = %page.url, "tender table not found; listing layout may have changed");
            return Ok(Vec::new());
        };

        let base = Url::parse(&page.url).ok();
        let mut candidates = Vec::new();
        for (index, row) in table.select(&selector(ROWS)?).enumerate() {
            match parse_row(row, &cells, base.as_ref()) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => warn!(row = index, reason, "skipping listing row"),
            }
        }
        info!(url = %page.url, count = candidates.len(), "parsed listing rows");
        Ok(candidates)
    }
}

struct RowSelectors {
    reference: scraper::Selector,
    title: scraper::Selector,
    entity: scraper::Selector,
    document: scraper::Selector,
    closing_date: scraper::Selector,
}

impl RowSelectors {
    fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            reference: selector(REFERENCE_CELL)?,
            title: selector(TITLE_CELL)?,
            entity: selector(ENTITY_CELL)?,
            document: selector(DOCUMENT_LINK)?,
            closing_date: selector(CLOSING_DATE_CELL)?,
        })
    }
}

fn parse_row(
    row: ElementRef<'_>,
    cells: &RowSelectors,
    base: Option<&Url>,
) -> Result<TenderCandidate, &'static str> {
    let reference = select_first_text(row, &cells.reference).ok_or("missing reference cell")?;
    let title = select_first_text(row, &cells.title).ok_or("missing title cell")?;
    let entity = select_first_text(row, &cells.entity).ok_or("missing entity cell")?;
    if reference.is_empty() {
        return Err("empty reference");
    }
    if title.is_empty() {
        return Err("empty title");
    }

    let mut candidate = TenderCandidate::new(Source::MyGov, reference, title);
    candidate.procuring_entity = text_or_none(entity);
    candidate.document_url = select_first_attr(row, &cells.document, "href")
        .map(|href| resolve_href(base, &href));
    candidate.closing_date_raw =
        select_first_text(row, &cells.closing_date).and_then(text_or_none);
    debug!(reference = %candidate.reference, "parsed row");
    Ok(candidate)
}

fn resolve_href(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}
