//! JSON endpoints the dashboard frontend polls.
//!
//! Failures come back as `{"error": ...}` with a 500; the frontend renders
//! them as a degraded state and keeps polling.

mod model;

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{AddExtensionLayer, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{Core, Health, RecordQuery};

use self::model::{Overview, StatsResponse};

/// Candles returned when the chart does not ask for a specific window.
const DEFAULT_CANDLE_COUNT: u32 = 500;
/// Episodes the overview aggregates are computed over.
const OVERVIEW_SAMPLE_SIZE: u32 = 200;

pub fn routes(router: Router, core: Arc<Core>) -> Router {
    router
        .route("/api/health", get(health))
        .route("/api/overview", get(overview))
        .route("/api/stats", get(stats))
        .route("/api/training", get(training))
        .route("/api/market-data", get(market_data))
        .route("/api/market-data/:symbol", get(candles))
        .route("/api/oanda", get(account))
        .layer(AddExtensionLayer::new(core))
}

#[derive(Debug, Deserialize)]
struct RecordsParams {
    strategy: Option<String>,
    symbol: Option<String>,
    #[serde(rename = "perPage")]
    per_page: Option<u32>,
    page: Option<u32>,
}

impl From<RecordsParams> for RecordQuery {
    fn from(params: RecordsParams) -> Self {
        let defaults = RecordQuery::default();
        RecordQuery {
            // An empty string means "no filter", the way the frontend
            // serializes an unset dropdown.
            strategy: params.strategy.filter(|s| !s.is_empty()),
            symbol: params.symbol.filter(|s| !s.is_empty()),
            per_page: params.per_page.unwrap_or(defaults.per_page),
            page: params.page.unwrap_or(defaults.page),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandlesParams {
    count: Option<u32>,
}

async fn health(Extension(core): Extension<Arc<Core>>) -> Json<Health> {
    Json(core.database.health().await)
}

async fn overview(Extension(core): Extension<Arc<Core>>) -> Json<Overview> {
    let sample = RecordQuery {
        per_page: OVERVIEW_SAMPLE_SIZE,
        ..RecordQuery::default()
    };
    let (experiences, health) = tokio::join!(
        core.database.training_experiences(&sample),
        core.database.health(),
    );

    // A dead database degrades to zeros instead of an error page.
    let overview = match experiences {
        Ok(page) => Overview::compute(&page, health.healthy),
        Err(_) => Overview::offline(),
    };
    Json(overview)
}

async fn stats(Extension(core): Extension<Arc<Core>>) -> (StatusCode, Json<StatsResponse>) {
    match core.database.stats().await {
        Ok(stats) => (StatusCode::OK, Json(StatsResponse::available(stats))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatsResponse::degraded(err.to_string())),
        ),
    }
}

async fn training(
    Extension(core): Extension<Arc<Core>>,
    Query(params): Query<RecordsParams>,
) -> (StatusCode, Json<Value>) {
    match core.database.training_experiences(&params.into()).await {
        Ok(page) => ok_json(&page),
        Err(err) => error_json(&err),
    }
}

async fn market_data(
    Extension(core): Extension<Arc<Core>>,
    Query(params): Query<RecordsParams>,
) -> (StatusCode, Json<Value>) {
    match core.database.market_data(&params.into()).await {
        Ok(page) => ok_json(&page),
        Err(err) => error_json(&err),
    }
}

async fn candles(
    Extension(core): Extension<Arc<Core>>,
    Path(symbol): Path<String>,
    Query(params): Query<CandlesParams>,
) -> (StatusCode, Json<Value>) {
    let count = params.count.unwrap_or(DEFAULT_CANDLE_COUNT);
    match core.database.candles(&symbol, count).await {
        Ok(candles) => ok_json(&candles),
        Err(err) => error_json(&err),
    }
}

async fn account(Extension(core): Extension<Arc<Core>>) -> (StatusCode, Json<Value>) {
    match core.broker.account_snapshot().await {
        Ok(snapshot) => ok_json(&snapshot),
        Err(err) => error_json(&err),
    }
}

fn ok_json<T: serde::Serialize>(value: &T) -> (StatusCode, Json<Value>) {
    match serde_json::to_value(value) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(err) => error_json(&err.into()),
    }
}

fn error_json(err: &anyhow::Error) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}
