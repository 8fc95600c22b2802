//! REST surface.
//!
//! JSON endpoints carry `Content-Type`, `Content-Length`, an md5 `ETag`
//! and, where a cache was consulted, a `Cache-Status` header.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use md5::{Digest, Md5};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::CacheStatus;
use crate::errors::ProxyError;
use crate::AppState;

pub mod coins;
pub mod health;
pub mod leaderboard;
pub mod prices;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/leaderboard/markets", get(leaderboard::get_markets))
        .route("/api/v1/leaderboard/prices", get(leaderboard::get_prices))
        .route(
            "/api/v1/leaderboard/simpleprices",
            get(leaderboard::get_simple_prices),
        )
        .route("/api/v1/coins/list", get(coins::get_coins_list))
        .route("/api/v1/coins/markets", get(coins::get_coins_markets))
        .route(
            "/api/v1/coins/{id}/market_chart",
            get(coins::get_market_chart),
        )
        .route("/api/v1/asset_platforms", get(coins::get_asset_platforms))
        .route("/api/v1/simple/price", get(prices::get_simple_price))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds a JSON response with the standard headers.
pub(crate) fn json_bytes(body: Vec<u8>, cache_status: Option<CacheStatus>) -> Response {
    let etag = format!("\"{}\"", hex::encode(Md5::digest(&body)));
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::ETAG, etag);
    if let Some(status) = cache_status {
        builder = builder.header("Cache-Status", status.as_str());
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Maps service errors onto the REST contract: 400 for bad parameters, 503
/// while the cache is empty or upstream is unavailable, permanent upstream
/// statuses preserved, 500 for internal invariants. Upstream body text is
/// never forwarded.
pub(crate) fn error_response(err: ProxyError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_for(&err);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn status_for(err: &ProxyError) -> StatusCode {
    match err {
        ProxyError::NoData => StatusCode::SERVICE_UNAVAILABLE,
        ProxyError::Field { .. } => StatusCode::BAD_REQUEST,
        ProxyError::UpstreamStatus { status } => match *status {
            429 => StatusCode::SERVICE_UNAVAILABLE,
            s if (400..500).contains(&s) => {
                StatusCode::from_u16(s).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::SERVICE_UNAVAILABLE,
        },
        ProxyError::AllKeysExhausted(_) | ProxyError::Request(_) | ProxyError::ReadTimeout(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProxyError::LoadFailed(cause) => status_for(cause),
        ProxyError::Decode(_)
        | ProxyError::WebSocket(_)
        | ProxyError::Config(_)
        | ProxyError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Splits a comma-separated query value into trimmed, non-empty items.
pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
