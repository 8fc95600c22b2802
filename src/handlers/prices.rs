use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{error_response, json_bytes, split_csv, ErrorResponse};
use crate::coingecko::params::PriceParams;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SimplePriceQuery {
    ids: Option<String>,
    vs_currencies: Option<String>,
    precision: Option<String>,
    include_market_cap: Option<bool>,
    include_24hr_vol: Option<bool>,
    include_24hr_change: Option<bool>,
    include_last_updated_at: Option<bool>,
}

pub async fn get_simple_price(
    State(state): State<AppState>,
    Query(query): Query<SimplePriceQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let ids = query.ids.as_deref().map(split_csv).unwrap_or_default();
    let currencies = query
        .vs_currencies
        .as_deref()
        .map(split_csv)
        .unwrap_or_default();
    if ids.is_empty() || currencies.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "missing required parameters: ids, vs_currencies".to_string(),
            }),
        ));
    }

    let params = PriceParams {
        ids,
        currencies,
        include_market_cap: query.include_market_cap.unwrap_or(true),
        include_24hr_vol: query.include_24hr_vol.unwrap_or(true),
        include_24hr_change: query.include_24hr_change.unwrap_or(true),
        include_last_updated_at: query.include_last_updated_at.unwrap_or(true),
        precision: query.precision,
    };
    let (body, status) = state
        .prices
        .simple_price(params)
        .await
        .map_err(error_response)?;
    Ok(json_bytes(body, Some(status)))
}
