// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// Every market-data endpoint is a straight pass-through: validate the query,
// make one upstream call through the request's `MarketDataClient`, reshape.
//
// CORS is permissive; the gateway carries no credentials.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, HeaderValue,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::connect::client::{DEFAULT_LATEST_LIMIT, TOTAL_KLINES_HEADER};
use crate::connect::MarketDataClient;
use crate::market_data::{Candlestick, ExchangeInfo, KlineInterval, KlineRecord};

const MAX_SYMBOL_LEN: usize = 20;

// =============================================================================
// Router construction
// =============================================================================

/// Build the gateway router with tracing + CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/exchange-info", get(exchange_info))
        .route("/klines", get(klines))
        .route("/klines/latest", get(latest_klines))
        .route("/klines/extended", get(extended_klines_csv))
        .route("/klines/extended/records", get(extended_klines_records))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Debug, Deserialize)]
struct KlinesParams {
    symbol: String,
    interval: KlineInterval,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LatestKlinesParams {
    symbol: String,
    interval: KlineInterval,
    #[serde(default = "default_latest_limit")]
    limit: u32,
}

fn default_latest_limit() -> u32 {
    DEFAULT_LATEST_LIMIT
}

fn validate_symbol(symbol: &str) -> Result<(), ApiError> {
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "symbol must be 1-{MAX_SYMBOL_LEN} ASCII letters or digits"
        )))
    }
}

fn validate_limit(limit: Option<u32>) -> Result<(), ApiError> {
    match limit {
        Some(0) => Err(ApiError::BadRequest("limit must be greater than 0".into())),
        _ => Ok(()),
    }
}

impl KlinesParams {
    fn validate(&self) -> Result<(), ApiError> {
        validate_symbol(&self.symbol)?;
        validate_limit(self.limit)?;
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ApiError::BadRequest(
                    "start_time must not be after end_time".into(),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Root & health
// =============================================================================

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "Hello": "World" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
        uptime_secs: state.uptime_secs(),
    })
}

// =============================================================================
// Market data
// =============================================================================

async fn exchange_info(client: MarketDataClient) -> Result<Json<ExchangeInfo>, ApiError> {
    let info = client.get_exchange_info().await?;
    Ok(Json(info))
}

async fn klines(
    client: MarketDataClient,
    query: Result<Query<KlinesParams>, QueryRejection>,
) -> Result<Json<Vec<Candlestick>>, ApiError> {
    let Query(params) = query?;
    params.validate()?;
    let candles = client
        .get_klines(
            &params.symbol,
            params.interval,
            params.start_time,
            params.end_time,
            params.limit,
        )
        .await?;
    Ok(Json(candles))
}

async fn latest_klines(
    client: MarketDataClient,
    query: Result<Query<LatestKlinesParams>, QueryRejection>,
) -> Result<Json<Vec<Candlestick>>, ApiError> {
    let Query(params) = query?;
    validate_symbol(&params.symbol)?;
    validate_limit(Some(params.limit))?;
    let candles = client
        .get_latest_klines(&params.symbol, params.interval, params.limit)
        .await?;
    Ok(Json(candles))
}

async fn extended_klines_csv(
    client: MarketDataClient,
    query: Result<Query<KlinesParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    params.validate()?;
    let csv = client
        .get_klines_extended_csv(
            &params.symbol,
            params.interval,
            params.start_time,
            params.end_time,
            params.limit,
        )
        .await?;

    let disposition = format!(
        "attachment; filename=\"{}_{}.csv\"",
        params.symbol, params.interval
    );
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| ApiError::BadRequest("symbol is not a valid filename".into()))?,
    );
    if let Some(total) = csv.total_klines {
        headers.insert(TOTAL_KLINES_HEADER, HeaderValue::from(total));
    }

    Ok((headers, csv.content))
}

async fn extended_klines_records(
    client: MarketDataClient,
    query: Result<Query<KlinesParams>, QueryRejection>,
) -> Result<Json<Vec<KlineRecord>>, ApiError> {
    let Query(params) = query?;
    params.validate()?;
    let records = client
        .get_klines_extended_records(
            &params.symbol,
            params.interval,
            params.start_time,
            params.end_time,
            params.limit,
        )
        .await?;
    Ok(Json(records))
}
