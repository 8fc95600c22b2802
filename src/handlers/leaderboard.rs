use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{error_response, json_bytes, ErrorResponse};
use crate::AppState;

pub async fn get_markets(
    State(state): State<AppState>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let body = state
        .leaderboard
        .markets_payload()
        .map_err(error_response)?;
    Ok(json_bytes(body, None))
}

pub async fn get_prices(
    State(state): State<AppState>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let body = state.leaderboard.prices_payload().map_err(error_response)?;
    Ok(json_bytes(body, None))
}

#[derive(Debug, Deserialize)]
pub struct SimplePricesQuery {
    currency: Option<String>,
}

pub async fn get_simple_prices(
    State(state): State<AppState>,
    Query(query): Query<SimplePricesQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let Some(currency) = query.currency.as_deref() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "missing required parameter: currency".to_string(),
            }),
        ));
    };
    let body = state
        .leaderboard
        .simple_prices_payload(currency)
        .map_err(error_response)?;
    Ok(json_bytes(body, None))
}
