//! Leaderboard aggregator: the top-N markets payload from the markets
//! service plus the live ticker quotes from the Binance service.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::LeaderboardConfig;
use crate::errors::{ProxyError, Result};
use crate::services::binance::BinanceService;
use crate::services::markets::MarketsService;

#[derive(Debug, Serialize)]
pub struct QuotePayload {
    pub price: f64,
    pub volume_24h: f64,
    pub percent_change_24h: f64,
}

pub struct LeaderboardService {
    markets: Arc<MarketsService>,
    binance: Arc<BinanceService>,
    config: LeaderboardConfig,
}

impl LeaderboardService {
    pub fn new(
        markets: Arc<MarketsService>,
        binance: Arc<BinanceService>,
        config: LeaderboardConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            markets,
            binance,
            config,
        })
    }

    /// Last refreshed top-markets payload.
    pub fn markets_payload(&self) -> Result<Vec<u8>> {
        self.markets.leaderboard_markets()
    }

    /// In-memory ticker quotes keyed by base symbol.
    pub fn prices_payload(&self) -> Result<Vec<u8>> {
        let quotes: HashMap<String, QuotePayload> = self
            .binance
            .quotes()
            .into_iter()
            .map(|(symbol, quote)| {
                (
                    symbol,
                    QuotePayload {
                        price: quote.price,
                        volume_24h: quote.volume_24h,
                        percent_change_24h: quote.percent_change_24h,
                    },
                )
            })
            .collect();
        Ok(serde_json::to_vec(&quotes)?)
    }

    /// Plain price map filtered by currency. Only the leaderboard currency
    /// and the exchange quote asset are known.
    pub fn simple_prices_payload(&self, currency: &str) -> Result<Vec<u8>> {
        if !self.supports_currency(currency) {
            return Err(ProxyError::Field {
                field: "currency",
                value: currency.to_string(),
            });
        }
        let prices: HashMap<String, f64> = self
            .binance
            .quotes()
            .into_iter()
            .map(|(symbol, quote)| (symbol, quote.price))
            .collect();
        Ok(serde_json::to_vec(&prices)?)
    }

    fn supports_currency(&self, currency: &str) -> bool {
        currency.eq_ignore_ascii_case(&self.config.vs_currency)
            || currency.eq_ignore_ascii_case(self.binance.quote_symbol())
    }
}
