//! Ingestion pipeline orchestration: fetch, extract, format, upsert, export.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tenders_adapters::{
    FetchedPage, MyGovAdapter, PpipAdapter, SourceAdapter, MYGOV_TENDERS_URL, PPIP_OCDS_URL,
};
use tenders_core::{format_candidate, format_stored, NewTender, Source, TenderView};
use tenders_storage::{
    HttpClientConfig, HttpFetcher, RateLimitPolicy, StoreError, TenderRepository, TenderStore,
    UpsertOutcome, MOBILE_USER_AGENT,
};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};

mod service;

pub use service::{paginate, OfflineBundle, TenderPage, TenderService, MAX_PAGE_LIMIT};

pub const CRATE_NAME: &str = "tenders-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub mygov_url: String,
    pub ppip_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_rate_limit_retries: usize,
    pub insecure_tls_suffixes: Vec<String>,
    pub reports_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://tenders.db".to_string()),
            mygov_url: lookup("MYGOV_URL").unwrap_or_else(|| MYGOV_TENDERS_URL.to_string()),
            ppip_url: lookup("PPIP_OCDS_URL").unwrap_or_else(|| PPIP_OCDS_URL.to_string()),
            user_agent: lookup("TENDERS_USER_AGENT")
                .unwrap_or_else(|| MOBILE_USER_AGENT.to_string()),
            http_timeout_secs: lookup("TENDERS_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_rate_limit_retries: lookup("TENDERS_MAX_RATE_LIMIT_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            insecure_tls_suffixes: lookup("TENDERS_INSECURE_TLS_SUFFIXES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec![".go.ke".to_string()]),
            reports_dir: lookup("TENDERS_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            scheduler_enabled: lookup("TENDERS_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: lookup("TENDERS_SYNC_CRON").unwrap_or_else(|| "0 0 */6 * * *".to_string()),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            rate_limit: RateLimitPolicy {
                max_retries: self.max_rate_limit_retries,
                ..Default::default()
            },
            insecure_tls_suffixes: self.insecure_tls_suffixes.clone(),
            ..Default::default()
        }
    }
}

/// Outcome of one source in one ingestion cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: Source,
    pub fetched: bool,
    pub error: Option<String>,
    pub parsed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    #[serde(skip_serializing)]
    pub tenders: Vec<TenderView>,
}

impl SourceReport {
    fn new(source: Source) -> Self {
        Self {
            source,
            fetched: false,
            error: None,
            parsed: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            tenders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mygov: SourceReport,
    pub ppip: SourceReport,
    pub reports_dir: Option<String>,
}

impl IngestReport {
    pub fn sources(&self) -> [&SourceReport; 2] {
        [&self.mygov, &self.ppip]
    }

    pub fn total_tenders(&self) -> usize {
        self.sources().iter().map(|s| s.tenders.len()).sum()
    }
}

pub struct IngestPipeline {
    config: SyncConfig,
    http: HttpFetcher,
    store: Arc<TenderStore>,
    mygov: Box<dyn SourceAdapter>,
    ppip: Box<dyn SourceAdapter>,
}

impl IngestPipeline {
    pub fn new(config: SyncConfig, store: Arc<TenderStore>) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        let mygov = Box::new(MyGovAdapter::new(config.mygov_url.clone()));
        let ppip = Box::new(PpipAdapter::new(config.ppip_url.clone()));
        Ok(Self {
            config,
            http,
            store,
            mygov,
            ppip,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TenderStore> {
        &self.store
    }

    /// Ingest both sources concurrently. Source failures are recorded in the
    /// report and never abort the other source.
    pub async fn ingest_all(&self) -> IngestReport {
        let started_at = Utc::now();
        let (mygov, ppip) = tokio::join!(
            self.ingest_source(self.mygov.as_ref(), started_at),
            self.ingest_source(self.ppip.as_ref(), started_at),
        );
        IngestReport {
            started_at,
            finished_at: Utc::now(),
            mygov,
            ppip,
            reports_dir: None,
        }
    }

    /// Ingest, then export the run under the reports directory.
    pub async fn run_once(&self) -> Result<IngestReport> {
        let mut report = self.ingest_all().await;
        let dir = write_reports(&self.config.reports_dir, &report).await?;
        report.reports_dir = Some(dir.display().to_string());
        info!(
            mygov = report.mygov.tenders.len(),
            ppip = report.ppip.tenders.len(),
            reports_dir = %dir.display(),
            "ingestion run complete"
        );
        Ok(report)
    }

    pub async fn ingest_source(&self, adapter: &dyn SourceAdapter, now: DateTime<Utc>) -> SourceReport {
        let source = adapter.source();
        let span = info_span!("ingest_source", %source);
        async {
            match adapter.fetch_listing(&self.http, now).await {
                Ok(page) => self.ingest_page(adapter, &page, now).await,
                Err(err) => {
                    warn!(error = %err, "fetch failed; source skipped this cycle");
                    let mut report = SourceReport::new(source);
                    report.error = Some(err.to_string());
                    report
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Parse, format and upsert an already fetched page.
    pub async fn ingest_page(
        &self,
        adapter: &dyn SourceAdapter,
        page: &FetchedPage,
        now: DateTime<Utc>,
    ) -> SourceReport {
        let mut report = SourceReport::new(adapter.source());
        report.fetched = true;

        let candidates = match adapter.parse_listing(page) {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "extractor failed");
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.parsed = candidates.len();

        for candidate in &candidates {
            let view = format_candidate(candidate, now);
            let record = NewTender::from(&view);
            match self.store.upsert_at(&record, now).await {
                Ok(outcome) => {
                    match outcome {
                        UpsertOutcome::Inserted { .. } => report.inserted += 1,
                        UpsertOutcome::ClosingDateChanged { .. } => report.updated += 1,
                        UpsertOutcome::Unchanged { .. } => report.unchanged += 1,
                    }
                    report.tenders.push(self.stored_view(&record, view, outcome.id(), now).await);
                }
                Err(err @ StoreError::Conflict { .. }) => {
                    warn!(error = %err, "storage conflict; record skipped");
                    report.failed += 1;
                }
                Err(err) => {
                    error!(reference = %record.reference, error = %err, "failed to store tender");
                    report.failed += 1;
                }
            }
        }

        info!(
            parsed = report.parsed,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "source ingested"
        );
        report
    }

    /// The view as persisted, so existing rows report their processing flag
    /// and timestamps. Falls back to the freshly formatted candidate.
    async fn stored_view(
        &self,
        record: &NewTender,
        view: TenderView,
        id: i64,
        now: DateTime<Utc>,
    ) -> TenderView {
        match self
            .store
            .repository()
            .lookup(&record.reference, record.source)
            .await
        {
            Ok(Some(row)) => format_stored(&row, now),
            Ok(None) => {
                warn!(id, reference = %record.reference, "stored tender vanished after upsert");
                view.with_id(id)
            }
            Err(err) => {
                warn!(id, reference = %record.reference, error = %err, "could not reload stored tender");
                view.with_id(id)
            }
        }
    }
}

/// Write `<reports_dir>/<stamp>/{source}_tenders.json` per source plus `summary.json`.
pub async fn write_reports(reports_dir: &Path, report: &IngestReport) -> Result<PathBuf> {
    let stamp = report.started_at.format("%Y%m%d_%H%M%S").to_string();
    let run_dir = reports_dir.join(stamp);
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    for source in report.sources() {
        let path = run_dir.join(format!("{}_tenders.json", source.source));
        let bytes = serde_json::to_vec_pretty(&source.tenders)
            .with_context(|| format!("serializing {} tenders", source.source))?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let summary_path = run_dir.join("summary.json");
    let summary = serde_json::to_vec_pretty(report).context("serializing run summary")?;
    fs::write(&summary_path, summary)
        .await
        .with_context(|| format!("writing {}", summary_path.display()))?;

    Ok(run_dir)
}

/// Cron scheduler that runs [`IngestPipeline::run_once`]; `None` when disabled.
pub async fn maybe_build_scheduler(pipeline: Arc<IngestPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.sync_cron.clone();
    let job = Job::new_async(&cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            match pipeline.run_once().await {
                Ok(report) => info!(tenders = report.total_tenders(), "scheduled ingestion finished"),
                Err(err) => error!(error = %err, "scheduled ingestion failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

pub async fn open_store(config: &SyncConfig) -> Result<Arc<TenderStore>> {
    let store = TenderStore::open(&config.database_url)
        .await
        .with_context(|| format!("opening tender store at {}", config.database_url))?;
    Ok(Arc::new(store))
}

pub async fn run_sync_once_from_env() -> Result<IngestReport> {
    let config = SyncConfig::from_env();
    let store = open_store(&config).await?;
    let result = match IngestPipeline::new(config, store.clone()) {
        Ok(pipeline) => pipeline.run_once().await,
        Err(err) => Err(err),
    };
    store.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::TimeZone;
    use tempfile::tempdir;
    use tenders_core::TenderStatus;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).single().unwrap()
    }

    fn fixture(source: &str, file: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(source)
            .join("sample")
            .join(file)
    }

    async fn pipeline() -> IngestPipeline {
        let store = Arc::new(TenderStore::open_in_memory().await.unwrap());
        IngestPipeline::new(SyncConfig::default(), store).unwrap()
    }

    #[test]
    fn config_reads_overrides_and_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite::memory:"),
            ("TENDERS_MAX_RATE_LIMIT_RETRIES", "1"),
            ("TENDERS_INSECURE_TLS_SUFFIXES", ".go.ke, .ac.ke"),
            ("TENDERS_SCHEDULER_ENABLED", "true"),
            ("TENDERS_HTTP_TIMEOUT_SECS", "not-a-number"),
        ]);
        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_rate_limit_retries, 1);
        assert_eq!(config.insecure_tls_suffixes, vec![".go.ke", ".ac.ke"]);
        assert!(config.scheduler_enabled);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.mygov_url, MYGOV_TENDERS_URL);
        assert_eq!(config.sync_cron, "0 0 */6 * * *");

        let http = config.http_client_config();
        assert_eq!(http.rate_limit.max_retries, 1);
        assert_eq!(http.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn ingesting_fixture_pages_upserts_and_counts() {
        let pipeline = pipeline().await;
        let adapter = MyGovAdapter::default();
        let page = FetchedPage::from_file(fixture("mygov", "listing.html"), MYGOV_TENDERS_URL, now())
            .unwrap();

        let first = pipeline.ingest_page(&adapter, &page, now()).await;
        assert_eq!(first.parsed, 3);
        assert_eq!(first.inserted, 3);
        assert!(first.tenders.iter().all(|t| t.id.is_some()));

        let second = pipeline.ingest_page(&adapter, &page, now()).await;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(pipeline.store().repository().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn changed_closing_date_is_counted_as_update() {
        let pipeline = pipeline().await;
        let adapter = PpipAdapter::default();
        let body = |end: &str| {
            format!(r#"{{"releases": [{{"tender": {{"id": "T-1", "title": "Borehole drilling", "tenderPeriod": {{"endDate": "{end}"}}}}}}]}}"#)
        };

        let page = FetchedPage::new(PPIP_OCDS_URL, body("2024-03-20"), now());
        assert_eq!(pipeline.ingest_page(&adapter, &page, now()).await.inserted, 1);

        let page = FetchedPage::new(PPIP_OCDS_URL, body("2024-03-27"), now());
        let report = pipeline.ingest_page(&adapter, &page, now()).await;
        assert_eq!(report.updated, 1);
        assert_eq!(report.tenders[0].status, TenderStatus::Open);
    }

    #[tokio::test]
    async fn reingested_rows_report_stored_state() {
        let pipeline = pipeline().await;
        let adapter = PpipAdapter::default();
        let body = r#"{"releases": [{"tender": {"id": "T-9", "title": "Ward dispensary", "tenderPeriod": {"endDate": "2024-03-20"}}}]}"#;

        let page = FetchedPage::new(PPIP_OCDS_URL, body, now());
        let first = pipeline.ingest_page(&adapter, &page, now()).await;
        let id = first.tenders[0].id.expect("stored id");
        assert_eq!(first.tenders[0].created_at, Some(now()));
        assert!(!first.tenders[0].is_processed);

        assert!(pipeline
            .store
            .repository()
            .mark_processed(id, now())
            .await
            .unwrap());

        let later = now() + chrono::TimeDelta::hours(2);
        let second = pipeline.ingest_page(&adapter, &page, later).await;
        assert_eq!(second.unchanged, 1);
        let view = &second.tenders[0];
        assert_eq!(view.id, Some(id));
        assert!(view.is_processed);
        assert_eq!(view.created_at, Some(now()));
        assert_eq!(view.status, TenderStatus::Open);
    }

    #[tokio::test]
    async fn unreachable_source_is_reported_not_fatal() {
        let store = Arc::new(TenderStore::open_in_memory().await.unwrap());
        let config = SyncConfig {
            mygov_url: "http://127.0.0.1:9/all-tenders".to_string(),
            ppip_url: "not a url".to_string(),
            http_timeout_secs: 1,
            ..Default::default()
        };
        let mut pipeline = IngestPipeline::new(config, store).unwrap();
        pipeline.http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(1),
            backoff: tenders_storage::BackoffPolicy {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        let report = pipeline.ingest_all().await;
        for source in report.sources() {
            assert!(!source.fetched);
            assert!(source.error.is_some());
            assert!(source.tenders.is_empty());
        }
    }

    #[tokio::test]
    async fn run_export_writes_per_source_files_and_summary() {
        let pipeline = pipeline().await;
        let page = FetchedPage::from_file(fixture("ppip", "releases.json"), PPIP_OCDS_URL, now()).unwrap();
        let ppip = pipeline.ingest_page(&PpipAdapter::default(), &page, now()).await;
        let report = IngestReport {
            started_at: now(),
            finished_at: now(),
            mygov: SourceReport::new(Source::MyGov),
            ppip,
            reports_dir: None,
        };

        let dir = tempdir().unwrap();
        let run_dir = write_reports(dir.path(), &report).await.unwrap();
        assert!(run_dir.ends_with("20240310_090000"));

        let ppip_json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run_dir.join("ppip_tenders.json")).unwrap()).unwrap();
        assert_eq!(ppip_json.as_array().unwrap().len(), 2);
        let mygov_json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run_dir.join("mygov_tenders.json")).unwrap()).unwrap();
        assert_eq!(mygov_json.as_array().unwrap().len(), 0);

        let summary: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run_dir.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["ppip"]["inserted"], 2);
        assert!(summary["ppip"].get("tenders").is_none());
    }

    #[tokio::test]
    async fn scheduler_is_not_built_when_disabled() {
        let pipeline = Arc::new(pipeline().await);
        assert!(maybe_build_scheduler(pipeline).await.unwrap().is_none());
    }
}
