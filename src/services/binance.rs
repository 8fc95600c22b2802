//! Binance ticker service: owns the WebSocket client and exposes the quote
//! map to the leaderboard.

use std::collections::HashMap;
use std::sync::Arc;

use crate::binance::ws::{BinanceWsClient, TickerQuote};
use crate::metrics::Metrics;

pub struct BinanceService {
    ws: Arc<BinanceWsClient>,
    quote_symbol: String,
}

impl BinanceService {
    pub fn new(quote_symbol: impl Into<String>, metrics: Metrics) -> Arc<Self> {
        Arc::new(Self {
            ws: Arc::new(BinanceWsClient::new(metrics)),
            quote_symbol: quote_symbol.into(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(ws: Arc<BinanceWsClient>, quote_symbol: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            ws,
            quote_symbol: quote_symbol.into(),
        })
    }

    pub fn start(&self) {
        self.ws.start();
    }

    pub async fn stop(&self) {
        self.ws.stop().await;
    }

    /// Rebuilds the ticker watch list from base symbols against the
    /// configured quote asset.
    pub fn set_watch_list(&self, base_symbols: &[String]) {
        self.ws.set_watch_list(base_symbols, &self.quote_symbol);
    }

    pub fn quotes(&self) -> HashMap<String, TickerQuote> {
        self.ws.quotes()
    }

    pub fn healthy(&self) -> bool {
        self.ws.healthy()
    }

    pub fn quote_symbol(&self) -> &str {
        &self.quote_symbol
    }
}
