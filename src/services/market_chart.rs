//! Market-chart proxy service.
//!
//! Chart responses are cached per (id, currency, window): short windows
//! under `hourly_ttl`, windows at or past `daily_data_threshold` days under
//! `daily_ttl`. Optionally tries the public API anonymously before spending
//! a key.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;
use serde_json::Value;
use tracing::debug;

use crate::cache::CacheStatus;
use crate::coingecko::params::market_chart_fingerprint;
use crate::coingecko::{CoinGeckoClient, RequestBuilder};
use crate::config::MarketChartConfig;
use crate::errors::Result;
use crate::metrics::Metrics;

const CHART_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct ChartRequest {
    pub id: String,
    pub vs_currency: String,
    pub days: String,
    pub interval: Option<String>,
    pub data_filter: Option<String>,
}

pub struct MarketChartService {
    client: Arc<CoinGeckoClient>,
    builder: RequestBuilder,
    config: MarketChartConfig,
    hourly: MokaCache<String, Arc<Vec<u8>>>,
    daily: MokaCache<String, Arc<Vec<u8>>>,
    metrics: Metrics,
}

impl MarketChartService {
    pub fn new(
        client: Arc<CoinGeckoClient>,
        builder: RequestBuilder,
        config: MarketChartConfig,
        metrics: Metrics,
    ) -> Arc<Self> {
        let hourly = MokaCache::builder()
            .max_capacity(CHART_CACHE_CAPACITY)
            .time_to_live(config.hourly_ttl)
            .build();
        let daily = MokaCache::builder()
            .max_capacity(CHART_CACHE_CAPACITY)
            .time_to_live(config.daily_ttl)
            .build();
        Arc::new(Self {
            client,
            builder,
            config,
            hourly,
            daily,
            metrics,
        })
    }

    pub async fn market_chart(&self, request: &ChartRequest) -> Result<(Vec<u8>, CacheStatus)> {
        let key = market_chart_fingerprint(
            &request.id,
            &request.vs_currency,
            &request.days,
            request.interval.as_deref(),
        );
        let cache = if self.is_daily(&request.days) {
            &self.daily
        } else {
            &self.hourly
        };

        if let Some(body) = cache.get(&key).await {
            self.metrics.observe_cache_request("market_chart", "Hit");
            return Ok((body.as_ref().clone(), CacheStatus::Hit));
        }
        self.metrics.observe_cache_request("market_chart", "Miss");

        let body = self.fetch(request).await?;
        // Reject shapes that are not a chart object before caching.
        serde_json::from_slice::<Value>(&body)?;
        cache.insert(key, Arc::new(body.clone())).await;
        Ok((body, CacheStatus::Miss))
    }

    async fn fetch(&self, request: &ChartRequest) -> Result<Vec<u8>> {
        if self.config.try_free_api_first {
            let attempt = self
                .client
                .fetch_anonymous("market_chart", |key| {
                    self.builder.market_chart(
                        key,
                        &request.id,
                        &request.vs_currency,
                        &request.days,
                        request.interval.as_deref(),
                        request.data_filter.as_deref(),
                    )
                })
                .await;
            match attempt {
                Ok(body) => return Ok(body),
                Err(e) => {
                    debug!(
                        "free-api market chart attempt for {:?} failed: {}, retrying with keys",
                        request.id, e
                    );
                }
            }
        }

        self.client
            .fetch("market_chart", |key| {
                self.builder.market_chart(
                    key,
                    &request.id,
                    &request.vs_currency,
                    &request.days,
                    request.interval.as_deref(),
                    request.data_filter.as_deref(),
                )
            })
            .await
    }

    fn is_daily(&self, days: &str) -> bool {
        match days.parse::<u32>() {
            Ok(days) => days >= self.config.daily_data_threshold,
            // "max" and other symbolic windows are long-range data.
            Err(_) => true,
        }
    }

    /// TTL the current configuration assigns to the given window, exposed
    /// for observability.
    pub fn ttl_for(&self, days: &str) -> Duration {
        if self.is_daily(days) {
            self.config.daily_ttl
        } else {
            self.config.hourly_ttl
        }
    }
}
