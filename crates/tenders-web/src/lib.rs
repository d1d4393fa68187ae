//! JSON read API over the tender store.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tenders_core::{Source, StatusFilter, TenderFilters};
use tenders_storage::{StoreError, TenderStore};
use tenders_sync::{paginate, open_store, SyncConfig, TenderService, MAX_PAGE_LIMIT};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "tenders-web";

const DEFAULT_PAGE_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub service: TenderService,
}

impl AppState {
    pub fn new(store: Arc<TenderStore>) -> Self {
        Self {
            service: TenderService::new(store),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Store(StoreError::InvalidFilter(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Store(err @ StoreError::Conflict { .. }) => (StatusCode::CONFLICT, err.to_string()),
            ApiError::Store(err) => {
                error!(error = %err, "store error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
struct TendersQuery {
    status: Option<String>,
    entity: Option<String>,
    category: Option<String>,
    days_remaining: Option<i64>,
    source: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

impl TendersQuery {
    fn filters(&self) -> Result<TenderFilters, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<StatusFilter>)
            .transpose()
            .map_err(ApiError::Validation)?;
        let source = self
            .source
            .as_deref()
            .map(str::parse::<Source>)
            .transpose()
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        Ok(TenderFilters {
            status,
            category: self.category.clone(),
            entity: self.entity.clone(),
            days_remaining: self.days_remaining,
            source,
        })
    }

    fn page_and_limit(&self) -> Result<(usize, usize), ApiError> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page == 0 {
            return Err(ApiError::Validation("page must be at least 1".to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok((page, limit))
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/tenders", get(tenders_handler))
        .route("/tenders/{reference}", get(tender_detail_handler))
        .route("/tenders/{id}/processed", post(mark_processed_handler))
        .route("/stats", get(stats_handler))
        .route("/offline-bundle", get(offline_bundle_handler))
        .route("/unprocessed", get(unprocessed_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

pub async fn serve(store: Arc<TenderStore>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving tender api");
    axum::serve(listener, app(AppState::new(store)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("TENDERS_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = SyncConfig::from_env();
    let store = open_store(&config).await?;
    let result = serve(store.clone(), port).await;
    store.close().await;
    result
}

async fn index_handler() -> Response {
    Json(serde_json::json!({
        "service": "Tenders Ville API",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": Source::ALL,
        "endpoints": [
            "/tenders",
            "/tenders/{reference}",
            "/stats",
            "/offline-bundle",
            "/unprocessed"
        ]
    }))
    .into_response()
}

async fn tenders_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TendersQuery>,
) -> Result<Response, ApiError> {
    let filters = query.filters()?;
    let (page, limit) = query.page_and_limit()?;
    let views = state.service.query(&filters).await?;
    Ok(Json(paginate(views, page, limit)).into_response())
}

async fn tender_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(reference): AxumPath<String>,
) -> Result<Response, ApiError> {
    match state.service.tender(&reference).await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Err(ApiError::NotFound(format!("Tender {reference} not found"))),
    }
}

async fn mark_processed_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Response, ApiError> {
    if state.service.mark_processed(id).await? {
        Ok(Json(serde_json::json!({ "id": id, "is_processed": true })).into_response())
    } else {
        Err(ApiError::NotFound(format!("Tender id {id} not found")))
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.service.stats().await?).into_response())
}

async fn offline_bundle_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.service.offline_bundle().await?).into_response())
}

async fn unprocessed_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.service.list_unprocessed().await?).into_response())
}
