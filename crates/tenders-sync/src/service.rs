//! Read-side service: stored rows formatted into views for consumers.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::Serialize;
use tenders_core::{eat, format_stored, StatsSummary, StatusFilter, TenderFilters, TenderView};
use tenders_storage::{StoreError, TenderStore};

pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct TenderPage {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    pub tenders: Vec<TenderView>,
}

/// Slice one page out of `views`. `page` is 1-based; both inputs are clamped.
pub fn paginate(views: Vec<TenderView>, page: usize, limit: usize) -> TenderPage {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_LIMIT);
    let total = views.len();
    let total_pages = total.div_ceil(limit);
    let tenders = views
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();
    TenderPage {
        total,
        page,
        limit,
        total_pages,
        tenders,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OfflineBundle {
    pub tenders: Vec<TenderView>,
    pub stats: StatsSummary,
    pub bundle_created: DateTime<FixedOffset>,
    pub valid_until: DateTime<FixedOffset>,
}

#[derive(Debug, Clone)]
pub struct TenderService {
    store: Arc<TenderStore>,
}

impl TenderService {
    pub fn new(store: Arc<TenderStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TenderStore> {
        &self.store
    }

    pub async fn query(&self, filters: &TenderFilters) -> Result<Vec<TenderView>, StoreError> {
        self.query_at(filters, Utc::now()).await
    }

    pub async fn query_at(
        &self,
        filters: &TenderFilters,
        now: DateTime<Utc>,
    ) -> Result<Vec<TenderView>, StoreError> {
        let rows = self.store.repository().query(filters, now).await?;
        Ok(rows.iter().map(|row| format_stored(row, now)).collect())
    }

    pub async fn stats(&self) -> Result<StatsSummary, StoreError> {
        self.store.repository().stats(Utc::now()).await
    }

    /// First stored tender carrying `reference`, from any source.
    pub async fn tender(&self, reference: &str) -> Result<Option<TenderView>, StoreError> {
        let now = Utc::now();
        let rows = self.store.repository().get_by_reference(reference).await?;
        Ok(rows.first().map(|row| format_stored(row, now)))
    }

    pub async fn list_unprocessed(&self) -> Result<Vec<TenderView>, StoreError> {
        let now = Utc::now();
        let rows = self.store.repository().list_unprocessed().await?;
        Ok(rows.iter().map(|row| format_stored(row, now)).collect())
    }

    pub async fn mark_processed(&self, id: i64) -> Result<bool, StoreError> {
        self.store.repository().mark_processed(id, Utc::now()).await
    }

    pub async fn offline_bundle(&self) -> Result<OfflineBundle, StoreError> {
        self.offline_bundle_at(Utc::now()).await
    }

    /// Active tenders plus stats, valid for one day.
    pub async fn offline_bundle_at(&self, now: DateTime<Utc>) -> Result<OfflineBundle, StoreError> {
        let filters = TenderFilters {
            status: Some(StatusFilter::Open),
            ..Default::default()
        };
        let tenders = self
            .query_at(&filters, now)
            .await?
            .into_iter()
            .filter(|view| view.status.is_active())
            .collect();
        let stats = self.store.repository().stats(now).await?;
        let bundle_created = now.with_timezone(&eat());
        Ok(OfflineBundle {
            tenders,
            stats,
            bundle_created,
            valid_until: bundle_created + TimeDelta::days(1),
        })
    }
}
