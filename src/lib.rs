use std::sync::Arc;

pub mod binance;
pub mod cache;
pub mod coingecko;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod scheduler;
pub mod services;
pub mod subscription;
pub mod tiers;

use metrics::Metrics;
use services::asset_platforms::AssetPlatformsService;
use services::binance::BinanceService;
use services::coins::CoinsService;
use services::coinslist::CoinsListService;
use services::leaderboard::LeaderboardService;
use services::market_chart::MarketChartService;
use services::markets::MarketsService;
use services::prices::PricesService;

#[derive(Clone)]
pub struct AppState {
    pub markets: Arc<MarketsService>,
    pub prices: Arc<PricesService>,
    pub coinslist: Arc<CoinsListService>,
    pub coins: Arc<CoinsService>,
    pub market_chart: Arc<MarketChartService>,
    pub asset_platforms: Arc<AssetPlatformsService>,
    pub binance: Arc<BinanceService>,
    pub leaderboard: Arc<LeaderboardService>,
    pub metrics: Metrics,
}
