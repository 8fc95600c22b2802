use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<&'static str, &'static str>,
}

fn service_status(up: bool) -> &'static str {
    if up {
        "up"
    } else {
        "unknown"
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut services = BTreeMap::new();
    services.insert("markets", service_status(state.markets.has_data()));
    services.insert("prices", service_status(state.prices.healthy()));
    services.insert("coinslist", service_status(state.coinslist.healthy()));
    services.insert("coins", service_status(state.coins.tracked_count() > 0));
    services.insert("binance", service_status(state.binance.healthy()));

    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        services,
    })
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state.metrics.render();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
