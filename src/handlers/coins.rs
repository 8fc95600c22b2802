use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{error_response, json_bytes, split_csv, ErrorResponse};
use crate::coingecko::params::MarketsParams;
use crate::services::market_chart::ChartRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CoinsListQuery {
    include_platform: Option<String>,
}

pub async fn get_coins_list(
    State(state): State<AppState>,
    Query(query): Query<CoinsListQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let include_platform = match query.include_platform.as_deref() {
        None => false,
        Some("true") => true,
        Some(other) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("invalid include_platform value: {other:?}"),
                }),
            ))
        }
    };
    let body = state
        .coinslist
        .tokens(include_platform)
        .map_err(error_response)?;
    Ok(json_bytes(body, None))
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    vs_currency: Option<String>,
    ids: Option<String>,
    category: Option<String>,
    order: Option<String>,
    per_page: Option<u32>,
    page: Option<u32>,
    sparkline: Option<bool>,
    price_change_percentage: Option<String>,
    include_rehypothecated: Option<bool>,
}

impl MarketsQuery {
    fn into_params(self) -> MarketsParams {
        let defaults = MarketsParams::default();
        MarketsParams {
            vs_currency: self.vs_currency.unwrap_or(defaults.vs_currency),
            order: self.order.unwrap_or(defaults.order),
            per_page: self.per_page.unwrap_or(defaults.per_page),
            page: self.page.unwrap_or(defaults.page),
            category: self.category,
            ids: self.ids.as_deref().map(split_csv).unwrap_or_default(),
            sparkline: self.sparkline.unwrap_or(defaults.sparkline),
            price_change_percentage: self
                .price_change_percentage
                .as_deref()
                .map(split_csv)
                .unwrap_or_default(),
            include_rehypothecated: self.include_rehypothecated.unwrap_or(false),
        }
    }
}

pub async fn get_coins_markets(
    State(state): State<AppState>,
    Query(query): Query<MarketsQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (body, status) = state
        .markets
        .markets_payload(query.into_params())
        .await
        .map_err(error_response)?;
    Ok(json_bytes(body, Some(status)))
}

#[derive(Debug, Deserialize)]
pub struct MarketChartQuery {
    vs_currency: Option<String>,
    days: Option<String>,
    interval: Option<String>,
    data_filter: Option<String>,
}

pub async fn get_market_chart(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MarketChartQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let request = ChartRequest {
        id,
        vs_currency: query.vs_currency.unwrap_or_else(|| "usd".to_string()),
        days: query.days.unwrap_or_else(|| "30".to_string()),
        interval: query.interval,
        data_filter: query.data_filter,
    };
    let (body, status) = state
        .market_chart
        .market_chart(&request)
        .await
        .map_err(error_response)?;
    Ok(json_bytes(body, Some(status)))
}

#[derive(Debug, Deserialize)]
pub struct AssetPlatformsQuery {
    filter: Option<String>,
}

pub async fn get_asset_platforms(
    State(state): State<AppState>,
    Query(query): Query<AssetPlatformsQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (body, status) = state
        .asset_platforms
        .asset_platforms(query.filter.as_deref())
        .await
        .map_err(error_response)?;
    Ok(json_bytes(body, Some(status)))
}
