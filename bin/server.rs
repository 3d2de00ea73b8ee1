// Campaign Ledger - Web Server
// REST API with Axum over the import pipeline

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use campaign_ledger::{
    aggregate_by_ad, compare_periods, parse_date, summarize_account, AccountSummary,
    AggregatedAdPerformance, AggregationQuery, ClientAccount, ClientMergeResult, DateRange,
    ImportBatch, ImportError, ImportOptions, ImportOutcome, Importer, PeriodComparison,
    SchemaNormalizer, SqliteStore, UndoOutcome,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledger-server", about = "HTTP API for campaign-ledger", version)]
struct ServerArgs {
    #[arg(long, env = "CAMPAIGN_LEDGER_DB", default_value = "campaign_ledger.db")]
    db: PathBuf,

    #[arg(long, env = "CAMPAIGN_LEDGER_BIND", default_value = "127.0.0.1:3000")]
    bind: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    importer: Arc<Importer<SqliteStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

struct ApiError(StatusCode, String);

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let status = match &err {
            ImportError::SchemaValidation { .. } | ImportError::UnreadableFile(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ImportError::DuplicateFile { .. } => StatusCode::CONFLICT,
            ImportError::UnknownClient(_) | ImportError::BatchNotFound(_) => StatusCode::NOT_FOUND,
            ImportError::Dictionary(_) | ImportError::Storage(_) => {
                error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ApiResponse::<()>::err(self.1))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// SQLite work runs off the async executor
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Importer<SqliteStore>) -> campaign_ledger::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let importer = state.importer.clone();
    let result = tokio::task::spawn_blocking(move || f(&importer))
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ApiResponse::ok(result?)))
}

fn parse_date_param(name: &str, raw: &str) -> Result<chrono::NaiveDate, ApiError> {
    parse_date(raw).ok_or_else(|| {
        ApiError(
            StatusCode::BAD_REQUEST,
            format!("invalid date for '{}': {}", name, raw),
        )
    })
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/clients
async fn list_clients(State(state): State<AppState>) -> ApiResult<Vec<ClientAccount>> {
    blocking(&state, |importer| importer.clients()).await
}

#[derive(Deserialize)]
struct SpreadsheetParams {
    filename: String,
    #[serde(default)]
    skip_unknown: bool,
}

/// POST /api/imports/spreadsheet?filename=export.xlsx[&skip_unknown=true]
async fn import_spreadsheet(
    State(state): State<AppState>,
    Query(params): Query<SpreadsheetParams>,
    body: Bytes,
) -> ApiResult<ImportOutcome> {
    let options = ImportOptions {
        skip_unknown_accounts: params.skip_unknown,
    };
    blocking(&state, move |importer| {
        importer.import_spreadsheet(&params.filename, &body, options)
    })
    .await
}

#[derive(Deserialize)]
struct FilenameParams {
    filename: String,
}

/// POST /api/clients/:id/imports/text?filename=bitacora.txt
async fn import_text_report(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(params): Query<FilenameParams>,
    body: Bytes,
) -> ApiResult<ClientMergeResult> {
    blocking(&state, move |importer| {
        importer.import_text_report(&client_id, &params.filename, &body)
    })
    .await
}

#[derive(Deserialize)]
struct HistoryParams {
    client: Option<String>,
}

/// GET /api/history[?client=ID]
async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<ImportBatch>> {
    blocking(&state, move |importer| importer.history(params.client.as_deref())).await
}

/// POST /api/history/:batch_id/undo
async fn undo_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<UndoOutcome> {
    blocking(&state, move |importer| importer.undo(&batch_id)).await
}

#[derive(Deserialize)]
struct AdsParams {
    from: Option<String>,
    to: Option<String>,
    #[serde(default)]
    include_inactive: bool,
}

/// GET /api/clients/:id/ads[?from=&to=&include_inactive=true]
async fn get_ads(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(params): Query<AdsParams>,
) -> ApiResult<Vec<AggregatedAdPerformance>> {
    let mut query = AggregationQuery::new();
    match (&params.from, &params.to) {
        (Some(from), Some(to)) => {
            let range = DateRange::new(parse_date_param("from", from)?, parse_date_param("to", to)?);
            query = query.with_range(range);
        }
        (None, None) => {}
        _ => {
            return Err(ApiError(
                StatusCode::BAD_REQUEST,
                "'from' and 'to' go together".to_string(),
            ))
        }
    }
    if params.include_inactive {
        query = query.include_inactive();
    }

    blocking(&state, move |importer| {
        let dataset = importer.snapshot(&client_id)?;
        let records = dataset.records_snapshot();
        Ok(aggregate_by_ad(&records, &dataset.creative_links, &query))
    })
    .await
}

#[derive(Deserialize)]
struct SummaryParams {
    from: String,
    to: String,
    ad: Option<String>,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: AccountSummary,
    comparison: PeriodComparison,
}

/// GET /api/clients/:id/summary?from=&to=[&ad=NAME]
async fn get_summary(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<SummaryResponse> {
    let range = DateRange::new(
        parse_date_param("from", &params.from)?,
        parse_date_param("to", &params.to)?,
    );

    blocking(&state, move |importer| {
        let records = importer.snapshot(&client_id)?.records_snapshot();
        Ok(SummaryResponse {
            summary: summarize_account(&records, &AggregationQuery::new().with_range(range)),
            comparison: compare_periods(&records, params.ad.as_deref(), range),
        })
    })
    .await
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = ServerArgs::parse();

    let store = SqliteStore::open(&args.db)?;
    info!(db = %args.db.display(), "database opened");

    // Create shared state
    let state = AppState {
        importer: Arc::new(Importer::new(store, SchemaNormalizer::new()?)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/clients", get(list_clients))
        .route("/imports/spreadsheet", post(import_spreadsheet))
        .route("/clients/:id/imports/text", post(import_text_report))
        .route("/history", get(get_history))
        .route("/history/:batch_id/undo", post(undo_batch))
        .route("/clients/:id/ads", get(get_ads))
        .route("/clients/:id/summary", get(get_summary))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;

    info!(addr = %args.bind, "server running, press Ctrl+C to stop");

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
