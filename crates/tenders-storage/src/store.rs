//! SQLite persistence for tenders: change-aware upsert plus the read queries.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tenders_core::{
    eat, CategoryCount, NewTender, Source, StatsSummary, StatusFilter, StoredTender, TenderFilters,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Window used by the `closing_soon` filter and the stats counter.
pub const STATS_CLOSING_SOON_DAYS: i64 = 3;
/// Window used by the `open_week` filter.
pub const OPEN_WEEK_DAYS: i64 = 7;
pub const TOP_CATEGORY_LIMIT: i64 = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("tender {reference} from {origin} already exists")]
    Conflict { reference: String, origin: Source },
    #[error("row {id} could not be decoded: {message}")]
    Decode { id: i64, message: String },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted { id: i64 },
    ClosingDateChanged { id: i64 },
    Unchanged { id: i64 },
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted { id }
            | UpsertOutcome::ClosingDateChanged { id }
            | UpsertOutcome::Unchanged { id } => *id,
        }
    }
}

/// Write-side seam used by [`TenderStore::upsert`].
#[async_trait]
pub trait TenderRepository: Send + Sync {
    async fn lookup(
        &self,
        reference: &str,
        source: Source,
    ) -> Result<Option<StoredTender>, StoreError>;

    async fn insert(&self, tender: &NewTender, now: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn update_closing_date(
        &self,
        id: i64,
        closing_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTenderRepository {
    pool: SqlitePool,
}

impl SqliteTenderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tenders")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn list_unprocessed(&self) -> Result<Vec<StoredTender>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT *
              FROM tenders
             WHERE is_processed = 0
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tender_from_row).collect()
    }

    /// Returns whether a row was touched; an unknown id is a no-op.
    pub async fn mark_processed(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tenders
               SET is_processed = 1,
                   updated_at = ?
             WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_reference(&self, reference: &str) -> Result<Vec<StoredTender>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT *
              FROM tenders
             WHERE reference = ?
             ORDER BY id
            "#,
        )
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tender_from_row).collect()
    }

    /// Filtered rows ordered by closing date ascending, unknown closing dates
    /// last, ties by id.
    pub async fn query(
        &self,
        filters: &TenderFilters,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredTender>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM tenders WHERE 1 = 1");

        match filters.status {
            Some(StatusFilter::Open) => {
                qb.push(" AND closing_date > ").push_bind(now);
            }
            Some(StatusFilter::Closed) => {
                qb.push(" AND closing_date <= ").push_bind(now);
            }
            Some(StatusFilter::ClosingSoon) => {
                push_window(&mut qb, now, horizon(now, STATS_CLOSING_SOON_DAYS)?);
            }
            Some(StatusFilter::OpenWeek) => {
                push_window(&mut qb, now, horizon(now, OPEN_WEEK_DAYS)?);
            }
            None => {}
        }
        if let Some(category) = non_blank(filters.category.as_deref()) {
            qb.push(" AND instr(lower(category), lower(")
                .push_bind(category.to_string())
                .push(")) > 0");
        }
        if let Some(entity) = non_blank(filters.entity.as_deref()) {
            qb.push(" AND instr(lower(procuring_entity), lower(")
                .push_bind(entity.to_string())
                .push(")) > 0");
        }
        if let Some(days) = filters.days_remaining {
            push_window(&mut qb, now, horizon(now, days)?);
        }
        if let Some(source) = filters.source {
            qb.push(" AND source = ").push_bind(source.as_str());
        }
        qb.push(" ORDER BY closing_date IS NULL, closing_date ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(tender_from_row).collect()
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<StatsSummary, StoreError> {
        let soon = horizon(now, STATS_CLOSING_SOON_DAYS)?;
        let counts = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN closing_date > ? THEN 1 ELSE 0 END), 0) AS open,
                   COALESCE(SUM(CASE WHEN closing_date <= ? THEN 1 ELSE 0 END), 0) AS closed,
                   COALESCE(SUM(CASE WHEN closing_date > ? AND closing_date <= ? THEN 1 ELSE 0 END), 0) AS closing_soon
              FROM tenders
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(soon)
        .fetch_one(&self.pool)
        .await?;

        let mut by_source: BTreeMap<Source, i64> = Source::ALL.iter().map(|s| (*s, 0)).collect();
        let source_rows = sqlx::query(
            r#"
            SELECT source, COUNT(*) AS n
              FROM tenders
             GROUP BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in source_rows {
            let raw: String = row.try_get("source")?;
            let source = raw.parse::<Source>().map_err(|e| StoreError::Decode {
                id: 0,
                message: e.to_string(),
            })?;
            by_source.insert(source, row.try_get("n")?);
        }

        let category_rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) AS n
              FROM tenders
             WHERE category IS NOT NULL
             GROUP BY category
             ORDER BY n DESC, category ASC
             LIMIT ?
            "#,
        )
        .bind(TOP_CATEGORY_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        let by_category = category_rows
            .iter()
            .map(|row| -> Result<CategoryCount, sqlx::Error> {
                Ok(CategoryCount {
                    category: row.try_get("category")?,
                    count: row.try_get("n")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(StatsSummary {
            total: counts.try_get("total")?,
            open: counts.try_get("open")?,
            closed: counts.try_get("closed")?,
            closing_soon: counts.try_get("closing_soon")?,
            by_source,
            by_category,
            last_updated: now.with_timezone(&eat()),
        })
    }
}

#[async_trait]
impl TenderRepository for SqliteTenderRepository {
    async fn lookup(
        &self,
        reference: &str,
        source: Source,
    ) -> Result<Option<StoredTender>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT *
              FROM tenders
             WHERE reference = ? AND source = ?
            "#,
        )
        .bind(reference)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(tender_from_row).transpose()
    }

    async fn insert(&self, tender: &NewTender, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tenders (
                reference, source, title, description, procuring_entity,
                procurement_method, category, value, currency, document_url,
                closing_date, published_date, is_processed, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&tender.reference)
        .bind(tender.source.as_str())
        .bind(&tender.title)
        .bind(&tender.description)
        .bind(&tender.procuring_entity)
        .bind(&tender.procurement_method)
        .bind(&tender.category)
        .bind(&tender.value)
        .bind(&tender.currency)
        .bind(&tender.document_url)
        .bind(tender.closing_date)
        .bind(tender.published_date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict {
                    reference: tender.reference.clone(),
                    origin: tender.source,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update_closing_date(
        &self,
        id: i64,
        closing_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tenders
               SET closing_date = ?,
                   updated_at = ?
             WHERE id = ?
            "#,
        )
        .bind(closing_date)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Store handle. Upserts on the same (reference, source) are serialized by a
/// per-key async lock so two writers never both insert.
#[derive(Debug)]
pub struct TenderStore<R = SqliteTenderRepository> {
    repo: R,
    key_locks: Mutex<HashMap<(String, Source), Arc<Mutex<()>>>>,
}

impl TenderStore<SqliteTenderRepository> {
    /// Open (creating if missing) the database at `database_url` and run migrations.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, one connection kept alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        MIGRATOR.run(&pool).await?;
        info!("tender store ready");
        Ok(Self::new(SqliteTenderRepository::new(pool)))
    }

    pub async fn close(&self) {
        self.repo.pool.close().await;
    }
}

impl<R: TenderRepository> TenderStore<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub async fn upsert(&self, tender: &NewTender) -> Result<UpsertOutcome, StoreError> {
        self.upsert_at(tender, Utc::now()).await
    }

    /// Insert when the key is new; otherwise refresh only `closing_date` and
    /// `updated_at`, and only when the closing date changed (null vs non-null
    /// counts as a change).
    pub async fn upsert_at(
        &self,
        tender: &NewTender,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let key = (tender.reference.clone(), tender.source);
        let lock = self.key_lock(&key).await;
        let outcome = {
            let _held = lock.lock().await;
            self.upsert_locked(tender, now).await
        };
        self.release_key_lock(&key, lock).await;
        outcome
    }

    async fn upsert_locked(
        &self,
        tender: &NewTender,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        match self.repo.lookup(&tender.reference, tender.source).await? {
            None => {
                let id = self.repo.insert(tender, now).await?;
                debug!(id, reference = %tender.reference, source = %tender.source, "inserted tender");
                Ok(UpsertOutcome::Inserted { id })
            }
            Some(existing) if existing.closing_date != tender.closing_date => {
                self.repo
                    .update_closing_date(existing.id, tender.closing_date, now)
                    .await?;
                debug!(
                    id = existing.id,
                    reference = %tender.reference,
                    old = ?existing.closing_date,
                    new = ?tender.closing_date,
                    "closing date changed"
                );
                Ok(UpsertOutcome::ClosingDateChanged { id: existing.id })
            }
            Some(existing) => Ok(UpsertOutcome::Unchanged { id: existing.id }),
        }
    }

    async fn key_lock(&self, key: &(String, Source)) -> Arc<Mutex<()>> {
        let mut map = self.key_locks.lock().await;
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_key_lock(&self, key: &(String, Source), lock: Arc<Mutex<()>>) {
        let mut map = self.key_locks.lock().await;
        // Only the map and this caller hold it: nobody is waiting on the key.
        if Arc::strong_count(&lock) == 2 {
            map.remove(key);
        }
    }
}

fn horizon(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, StoreError> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| StoreError::InvalidFilter(format!("day window {days} is out of range")))
}

fn push_window(qb: &mut QueryBuilder<'_, Sqlite>, after: DateTime<Utc>, until: DateTime<Utc>) {
    qb.push(" AND closing_date > ")
        .push_bind(after)
        .push(" AND closing_date <= ")
        .push_bind(until);
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn tender_from_row(row: &SqliteRow) -> Result<StoredTender, StoreError> {
    let id: i64 = row.try_get("id")?;
    let raw_source: String = row.try_get("source")?;
    let source = raw_source.parse::<Source>().map_err(|e| StoreError::Decode {
        id,
        message: e.to_string(),
    })?;

    Ok(StoredTender {
        id,
        reference: row.try_get("reference")?,
        source,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        procuring_entity: row.try_get("procuring_entity")?,
        procurement_method: row.try_get("procurement_method")?,
        category: row.try_get("category")?,
        value: row.try_get("value")?,
        currency: row.try_get("currency")?,
        document_url: row.try_get("document_url")?,
        closing_date: row.try_get("closing_date")?,
        published_date: row.try_get("published_date")?,
        is_processed: row.try_get("is_processed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).single().unwrap()
    }

    fn tender(reference: &str, source: Source, closing: Option<DateTime<Utc>>) -> NewTender {
        NewTender {
            reference: reference.to_string(),
            source,
            title: format!("Tender {reference}"),
            description: None,
            procuring_entity: Some("Kenya Rural Roads Authority".to_string()),
            procurement_method: None,
            category: None,
            value: None,
            currency: "KES".to_string(),
            document_url: None,
            closing_date: closing,
            published_date: None,
        }
    }

    fn in_days(days: i64) -> Option<DateTime<Utc>> {
        Some(now() + TimeDelta::days(days))
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let record = tender("KE-1", Source::Ppip, in_days(5));

        let first = store.upsert_at(&record, now()).await.unwrap();
        let second = store
            .upsert_at(&record, now() + TimeDelta::hours(1))
            .await
            .unwrap();

        assert!(matches!(first, UpsertOutcome::Inserted { .. }));
        assert_eq!(second, UpsertOutcome::Unchanged { id: first.id() });
        assert_eq!(store.repository().count().await.unwrap(), 1);

        let stored = store
            .repository()
            .lookup("KE-1", Source::Ppip)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.created_at, now());
        assert_eq!(stored.updated_at, now());
    }

    #[tokio::test]
    async fn only_closing_date_is_refreshed() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let original = tender("KE-2", Source::Ppip, in_days(5));
        let id = store.upsert_at(&original, now()).await.unwrap().id();

        let later = now() + TimeDelta::hours(6);
        let mut revised = tender("KE-2", Source::Ppip, in_days(9));
        revised.title = "Renamed upstream".to_string();
        let outcome = store.upsert_at(&revised, later).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::ClosingDateChanged { id });

        let stored = store
            .repository()
            .lookup("KE-2", Source::Ppip)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.closing_date, in_days(9));
        assert_eq!(stored.title, "Tender KE-2");
        assert_eq!(stored.created_at, now());
        assert_eq!(stored.updated_at, later);
        assert!(!stored.is_processed);
    }

    #[tokio::test]
    async fn null_to_known_closing_date_counts_as_change() {
        let store = TenderStore::open_in_memory().await.unwrap();
        store
            .upsert_at(&tender("MG/9", Source::MyGov, None), now())
            .await
            .unwrap();
        let outcome = store
            .upsert_at(&tender("MG/9", Source::MyGov, in_days(3)), now())
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::ClosingDateChanged { .. }));

        let back_to_unknown = store
            .upsert_at(&tender("MG/9", Source::MyGov, None), now())
            .await
            .unwrap();
        assert!(matches!(back_to_unknown, UpsertOutcome::ClosingDateChanged { .. }));
    }

    #[tokio::test]
    async fn same_reference_from_other_source_is_separate() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let a = store
            .upsert_at(&tender("001", Source::MyGov, None), now())
            .await
            .unwrap();
        let b = store
            .upsert_at(&tender("001", Source::Ppip, None), now())
            .await
            .unwrap();
        assert!(matches!(b, UpsertOutcome::Inserted { .. }));
        assert_ne!(a.id(), b.id());
        assert_eq!(store.repository().get_by_reference("001").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_upserts_insert_once() {
        let store = Arc::new(TenderStore::open_in_memory().await.unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_at(&tender("KE-RACE", Source::Ppip, in_days(4)), now())
                    .await
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if let UpsertOutcome::Inserted { .. } = handle.await.unwrap().unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.repository().count().await.unwrap(), 1);
        assert!(store.key_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unique_index_violation_is_a_conflict() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let record = tender("KE-DUP", Source::Ppip, None);
        store.repository().insert(&record, now()).await.unwrap();
        let err = store.repository().insert(&record, now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { origin: Source::Ppip, .. }));
    }

    #[tokio::test]
    async fn mark_processed_toggles_flag() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let first = store
            .upsert_at(&tender("A", Source::Ppip, None), now())
            .await
            .unwrap()
            .id();
        let second = store
            .upsert_at(&tender("B", Source::Ppip, None), now())
            .await
            .unwrap()
            .id();

        let repo = store.repository();
        let pending: Vec<i64> = repo.list_unprocessed().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![first, second]);

        assert!(repo.mark_processed(first, now()).await.unwrap());
        assert!(!repo.mark_processed(9_999, now()).await.unwrap());

        let pending: Vec<i64> = repo.list_unprocessed().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![second]);
    }

    #[tokio::test]
    async fn query_orders_by_closing_with_unknown_last() {
        let store = TenderStore::open_in_memory().await.unwrap();
        for (reference, closing) in [("late", in_days(20)), ("none", None), ("soon", in_days(2)), ("past", in_days(-4))] {
            store
                .upsert_at(&tender(reference, Source::Ppip, closing), now())
                .await
                .unwrap();
        }
        let repo = store.repository();

        let all: Vec<String> = repo
            .query(&TenderFilters::default(), now())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.reference)
            .collect();
        assert_eq!(all, vec!["past", "soon", "late", "none"]);

        let open = TenderFilters {
            status: Some(StatusFilter::Open),
            ..Default::default()
        };
        let open: Vec<String> = repo.query(&open, now()).await.unwrap().into_iter().map(|t| t.reference).collect();
        assert_eq!(open, vec!["soon", "late"]);

        let soon = TenderFilters {
            status: Some(StatusFilter::ClosingSoon),
            ..Default::default()
        };
        assert_eq!(repo.query(&soon, now()).await.unwrap().len(), 1);

        let window = TenderFilters {
            days_remaining: Some(30),
            ..Default::default()
        };
        assert_eq!(repo.query(&window, now()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn text_filters_are_case_insensitive_substrings() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let mut works = tender("W-1", Source::Ppip, None);
        works.category = Some("Works".to_string());
        let mut goods = tender("G-1", Source::MyGov, None);
        goods.category = Some("Goods".to_string());
        goods.procuring_entity = Some("Ministry of Health".to_string());
        store.upsert_at(&works, now()).await.unwrap();
        store.upsert_at(&goods, now()).await.unwrap();
        let repo = store.repository();

        let by_category = TenderFilters {
            category: Some("work".to_string()),
            ..Default::default()
        };
        let found = repo.query(&by_category, now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference, "W-1");

        let by_entity = TenderFilters {
            entity: Some("HEALTH".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.query(&by_entity, now()).await.unwrap()[0].reference, "G-1");

        let by_source = TenderFilters {
            source: Some(Source::Ppip),
            ..Default::default()
        };
        assert_eq!(repo.query(&by_source, now()).await.unwrap()[0].reference, "W-1");
    }

    #[tokio::test]
    async fn stats_count_windows_and_rank_categories() {
        let store = TenderStore::open_in_memory().await.unwrap();
        let rows = [
            ("1", Source::Ppip, in_days(1), Some("works")),
            ("2", Source::Ppip, in_days(10), Some("goods")),
            ("3", Source::MyGov, in_days(-2), Some("works")),
            ("4", Source::MyGov, None, Some("consultancy")),
            ("5", Source::MyGov, in_days(2), None),
            ("6", Source::Ppip, in_days(30), Some("goods")),
        ];
        for (reference, source, closing, category) in rows {
            let mut record = tender(reference, source, closing);
            record.category = category.map(ToString::to_string);
            store.upsert_at(&record, now()).await.unwrap();
        }

        let stats = store.repository().stats(now()).await.unwrap();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.open, 4);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.closing_soon, 2);
        assert_eq!(stats.by_source[&Source::Ppip], 3);
        assert_eq!(stats.by_source[&Source::MyGov], 3);
        let ranked: Vec<(&str, i64)> = stats
            .by_category
            .iter()
            .map(|c| (c.category.as_str(), c.count))
            .collect();
        assert_eq!(ranked, vec![("goods", 2), ("works", 2), ("consultancy", 1)]);
        assert_eq!(stats.last_updated.offset(), &eat());
    }

    #[tokio::test]
    async fn file_database_is_created_and_reopened() {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("tenders.db").display());

        let store = TenderStore::open(&url).await.unwrap();
        store
            .upsert_at(&tender("KE-FILE", Source::Ppip, in_days(1)), now())
            .await
            .unwrap();
        store.close().await;

        let reopened = TenderStore::open(&url).await.unwrap();
        assert_eq!(reopened.repository().count().await.unwrap(), 1);
        reopened.close().await;
    }
}
