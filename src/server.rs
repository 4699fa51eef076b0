use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::normalize_code;
use crate::error::PipelineError;
use crate::layers::{format_date, parse_date, GoldRow, Layer};
use crate::storage::PartitionStore;
use crate::summary::{latest_report, load_gold};

#[derive(Clone)]
struct ApiState {
    store: Arc<dyn PartitionStore>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        let status = match error {
            PipelineError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct SeriesQuery {
    currencies: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
struct DatedRow {
    date: String,
    #[serde(flatten)]
    row: GoldRow,
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    date: Option<String>,
    partition: String,
    text: String,
}

pub fn router(store: Arc<dyn PartitionStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/v1/dates", get(dates))
        .route("/v1/gold", get(gold_series))
        .route("/v1/gold/:date", get(gold_for_date))
        .route("/v1/reports/latest", get(report_latest))
        .route("/v1/reports/:date", get(report_for_date))
        .layer(cors)
        .with_state(ApiState { store })
}

pub async fn run_server(store: Arc<dyn PartitionStore>, bind: SocketAddr) -> Result<()> {
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("dashboard API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse { status: "ok" })
}

async fn dates(State(state): State<ApiState>) -> ApiResult<Vec<String>> {
    let dates = gold_dates(state.store.as_ref())?
        .into_iter()
        .map(format_date)
        .collect();
    Ok(ok(dates))
}

async fn gold_series(
    State(state): State<ApiState>,
    Query(query): Query<SeriesQuery>,
) -> ApiResult<Vec<DatedRow>> {
    let filter = parse_currency_filter(query.currencies.as_deref());
    let rows = load_series(state.store.as_ref(), filter.as_ref())?;
    Ok(ok(rows))
}

async fn gold_for_date(
    State(state): State<ApiState>,
    Path(raw_date): Path<String>,
) -> ApiResult<Vec<GoldRow>> {
    let date = parse_date(&raw_date).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let rows = load_gold(state.store.as_ref(), date)?;
    Ok(ok(rows))
}

async fn report_latest(State(state): State<ApiState>) -> ApiResult<ReportResponse> {
    report(state.store.as_ref(), None)
}

async fn report_for_date(
    State(state): State<ApiState>,
    Path(raw_date): Path<String>,
) -> ApiResult<ReportResponse> {
    let date = parse_date(&raw_date).map_err(|e| ApiError::bad_request(e.to_string()))?;
    report(state.store.as_ref(), Some(date))
}

fn report(store: &dyn PartitionStore, date: Option<NaiveDate>) -> ApiResult<ReportResponse> {
    let Some((key, text)) = latest_report(store, date)? else {
        return Err(ApiError::not_found("no report available"));
    };
    Ok(ok(ReportResponse {
        date: key.date().map(format_date),
        partition: key.relative_path(),
        text,
    }))
}

fn gold_dates(store: &dyn PartitionStore) -> Result<Vec<NaiveDate>, PipelineError> {
    Ok(store
        .list(Layer::Gold)?
        .iter()
        .filter_map(|key| key.date())
        .collect())
}

fn load_series(
    store: &dyn PartitionStore,
    currencies: Option<&BTreeSet<String>>,
) -> Result<Vec<DatedRow>, PipelineError> {
    let mut out = Vec::new();
    for date in gold_dates(store)? {
        let mut rows = load_gold(store, date)?;
        rows.sort_by(|a, b| a.currency.cmp(&b.currency));
        for row in rows {
            if currencies.is_some_and(|set| !set.contains(&row.currency)) {
                continue;
            }
            out.push(DatedRow {
                date: format_date(date),
                row,
            });
        }
    }
    Ok(out)
}

fn parse_currency_filter(raw: Option<&str>) -> Option<BTreeSet<String>> {
    let set = raw?
        .split(',')
        .map(normalize_code)
        .filter(|code| !code.is_empty())
        .collect::<BTreeSet<_>>();
    (!set.is_empty()).then_some(set)
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}
