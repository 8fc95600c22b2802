//! Markets service.
//!
//! Keeps the /coins/markets universe warm through per-tier schedulers (tiers
//! are page ranges), maintains the top-N snapshot consumed by the
//! leaderboard, and serves caller requests through the cache with a live
//! loader fallback.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheStatus, FnLoader, KeyValues, Ttl};
use crate::coingecko::paginated::fetch_paginated;
use crate::coingecko::params::MarketsParams;
use crate::coingecko::{CoinGeckoClient, RequestBuilder};
use crate::config::MarketsConfig;
use crate::errors::{ProxyError, Result};
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::subscription::{Subscription, SubscriptionManager};
use crate::tiers::{Tier, TierSet};

pub struct MarketsService {
    client: Arc<CoinGeckoClient>,
    builder: RequestBuilder,
    cache: Arc<dyn Cache>,
    config: MarketsConfig,
    tier_set: TierSet,
    top_limit: usize,
    top_rows: RwLock<Vec<Value>>,
    subscriptions: SubscriptionManager,
    schedulers: Mutex<Vec<Arc<Scheduler>>>,
    metrics: Metrics,
}

impl MarketsService {
    pub fn new(
        client: Arc<CoinGeckoClient>,
        builder: RequestBuilder,
        cache: Arc<dyn Cache>,
        config: MarketsConfig,
        top_limit: usize,
        metrics: Metrics,
    ) -> Result<Arc<Self>> {
        let tier_set = config.tier_set()?;
        Ok(Arc::new(Self {
            client,
            builder,
            cache,
            config,
            tier_set,
            top_limit,
            top_rows: RwLock::new(Vec::new()),
            subscriptions: SubscriptionManager::new(),
            schedulers: Mutex::new(Vec::new()),
            metrics,
        }))
    }

    /// Spawns one scheduler per tier, each refreshing its page range on its
    /// own cadence with an immediate first run.
    pub fn start(self: &Arc<Self>) {
        let mut schedulers = self.schedulers.lock();
        if !schedulers.is_empty() {
            return;
        }
        for tier in self.tier_set.iter() {
            let service = self.clone();
            let tier = tier.clone();
            let name = format!("markets:{}", tier.name);
            let scheduler = Arc::new(Scheduler::new(name, tier.update_interval, move || {
                let service = service.clone();
                let tier = tier.clone();
                async move {
                    service.refresh_tier(&tier).await;
                }
            }));
            scheduler.start(true);
            schedulers.push(scheduler);
        }
    }

    pub async fn stop(&self) {
        let schedulers: Vec<_> = self.schedulers.lock().drain(..).collect();
        for scheduler in schedulers {
            scheduler.stop().await;
        }
        self.subscriptions.shutdown();
    }

    /// Signalled after every successful refresh of the tier containing the
    /// first page.
    pub fn subscribe(&self) -> Subscription {
        self.subscriptions.subscribe()
    }

    pub fn has_data(&self) -> bool {
        !self.top_rows.read().is_empty()
    }

    /// Ranked asset ids from the last top-markets refresh.
    pub fn top_ids(&self) -> Vec<String> {
        self.top_rows
            .read()
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Uppercased exchange symbols from the last top-markets refresh.
    pub fn top_symbols(&self) -> Vec<String> {
        self.top_rows
            .read()
            .iter()
            .filter_map(|row| {
                row.get("symbol")
                    .and_then(Value::as_str)
                    .map(str::to_uppercase)
            })
            .collect()
    }

    /// Last refreshed top-markets payload.
    pub fn leaderboard_markets(&self) -> Result<Vec<u8>> {
        let rows = self.top_rows.read();
        if rows.is_empty() {
            return Err(ProxyError::NoData);
        }
        Ok(serde_json::to_vec(&*rows)?)
    }

    /// Serves a caller /coins/markets request: normalizes the params into
    /// the cache-key fingerprint and falls through to a live upstream fetch
    /// on a miss.
    pub async fn markets_payload(&self, params: MarketsParams) -> Result<(Vec<u8>, CacheStatus)> {
        let params = params.normalize(&self.config.market_params_normalize);
        let key = params.fingerprint();
        let keys = vec![key.clone()];

        let (found, _) = self.cache.get(&keys).await;
        let status = CacheStatus::from_counts(found.len(), keys.len());
        self.metrics.observe_cache_request("markets", status.as_str());

        let client = self.client.clone();
        let builder = self.builder.clone();
        let fetch_params = params.clone();
        let loader = FnLoader::new(move |load_keys: Vec<String>| {
            let client = client.clone();
            let builder = builder.clone();
            let params = fetch_params.clone();
            async move {
                let body = client
                    .fetch("markets", |key| builder.markets(key, &params))
                    .await?;
                decode_rows(&body)?;
                Ok(load_keys
                    .into_iter()
                    .map(|key| (key, body.clone()))
                    .collect::<KeyValues>())
            }
        });

        let mut result = self
            .cache
            .get_or_load(&keys, &loader, true, Ttl::After(self.config.ttl))
            .await?;
        let body = result.remove(&key).ok_or(ProxyError::NoData)?;
        Ok((body, status))
    }

    pub(crate) async fn refresh_tier(&self, tier: &Tier) {
        match self.fetch_tier(tier).await {
            Ok(rows) => {
                self.metrics
                    .observe_tier_refresh("markets", &tier.name, "ok");
                if tier.contains(1) {
                    self.update_top(rows);
                    self.subscriptions.emit();
                }
            }
            Err(e) => {
                self.metrics
                    .observe_tier_refresh("markets", &tier.name, "error");
                warn!("markets tier {:?} refresh failed: {}", tier.name, e);
            }
        }
    }

    /// Paginated fetch over the tier's page range; every page is committed
    /// to the cache in one write after the last page lands, so a single
    /// page failure drops the whole tick.
    async fn fetch_tier(&self, tier: &Tier) -> Result<Vec<Value>> {
        let normalize = &self.config.market_params_normalize;
        let per_page = MarketsParams::default().normalize(normalize).per_page.max(1) as usize;
        let limit = tier.span() as usize * per_page;
        let entries = Mutex::new(KeyValues::new());

        let rows = fetch_paginated(limit, per_page, self.config.request_delay, |page| {
            let params = MarketsParams {
                page: tier.from - 1 + page,
                ..Default::default()
            }
            .normalize(normalize);
            let entries = &entries;
            async move {
                let body = self
                    .client
                    .fetch("markets", |key| self.builder.markets(key, &params))
                    .await?;
                let page_rows = decode_rows(&body)?;
                entries.lock().insert(params.fingerprint(), body);
                Ok(page_rows)
            }
        })
        .await?;

        self.cache
            .set(entries.into_inner(), Ttl::After(self.config.ttl))
            .await;
        debug!(
            "markets tier {:?} refreshed {} rows",
            tier.name,
            rows.len()
        );
        Ok(rows)
    }

    fn update_top(&self, mut rows: Vec<Value>) {
        rows.truncate(self.top_limit);
        *self.top_rows.write() = rows;
    }
}

fn decode_rows(body: &[u8]) -> Result<Vec<Value>> {
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::coingecko::{HttpTransport, KeyManager, RetryConfig, RetryingClient};
    use async_trait::async_trait;
    use std::time::Duration;
    use url::Url;

    struct ScriptedTransport {
        per_page: usize,
        total: usize,
        calls: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, url: Url) -> Result<(u16, Vec<u8>)> {
            self.calls.lock().push(url.to_string());
            let page: usize = url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .map(|(_, v)| v.parse().unwrap())
                .unwrap_or(1);
            let start = (page - 1) * self.per_page;
            let end = (start + self.per_page).min(self.total);
            let rows: Vec<Value> = (start..end)
                .map(|rank| {
                    serde_json::json!({
                        "id": format!("coin-{}", rank + 1),
                        "symbol": format!("c{}", rank + 1),
                        "market_cap_rank": rank + 1,
                    })
                })
                .collect();
            Ok((200, serde_json::to_vec(&rows).unwrap()))
        }
    }

    fn service(total: usize, top_limit: usize) -> (Arc<MarketsService>, Arc<MemoryCache>) {
        let metrics = Metrics::default();
        let transport = Arc::new(ScriptedTransport {
            per_page: 250,
            total,
            calls: parking_lot::Mutex::new(Vec::new()),
        });
        let client = Arc::new(CoinGeckoClient::new(
            RetryingClient::new(transport, RetryConfig::default(), metrics.clone()),
            Arc::new(KeyManager::new(Vec::new(), Vec::new(), metrics.clone())),
        ));
        let cache = Arc::new(MemoryCache::new(
            Duration::from_secs(60),
            Duration::ZERO,
        ));
        let config = MarketsConfig {
            request_delay: Duration::ZERO,
            tiers: vec![crate::config::TierEntry {
                name: "top".to_string(),
                from: 1,
                to: 2,
                update_interval: Duration::from_secs(60),
                fetch_coinslist_ids: false,
            }],
            ..Default::default()
        };
        let service = MarketsService::new(
            client,
            RequestBuilder::new(),
            cache.clone(),
            config,
            top_limit,
            metrics,
        )
        .unwrap();
        (service, cache)
    }

    #[tokio::test]
    async fn test_tier_refresh_caches_pages_and_updates_top() {
        let (service, cache) = service(300, 100);
        let tier = service.tier_set.iter().next().unwrap().clone();
        service.refresh_tier(&tier).await;

        assert!(service.has_data());
        let ids = service.top_ids();
        assert_eq!(ids.len(), 100);
        assert_eq!(ids[0], "coin-1");
        assert_eq!(ids[99], "coin-100");
        assert_eq!(service.top_symbols()[0], "C1");

        // Both page fingerprints are cached.
        let page1 = MarketsParams::default()
            .normalize(&service.config.market_params_normalize)
            .fingerprint();
        let (found, _) = cache.get(&[page1]).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_emits_to_subscribers() {
        let (service, _) = service(300, 10);
        let mut sub = service.subscribe();
        let tier = service.tier_set.iter().next().unwrap().clone();
        service.refresh_tier(&tier).await;
        assert_eq!(sub.recv().await, Some(()));
    }

    #[tokio::test]
    async fn test_markets_payload_hit_after_refresh() {
        let (service, _) = service(300, 10);
        let tier = service.tier_set.iter().next().unwrap().clone();
        service.refresh_tier(&tier).await;

        let (body, status) = service
            .markets_payload(MarketsParams {
                vs_currency: "eur".to_string(),
                per_page: 10,
                sparkline: true,
                ..Default::default()
            })
            .await
            .unwrap();
        // Normalization folds the request onto the refreshed page 1 entry.
        assert_eq!(status, CacheStatus::Hit);
        let rows: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 250);
    }

    #[tokio::test]
    async fn test_markets_payload_miss_loads_live() {
        let (service, cache) = service(300, 10);
        let params = MarketsParams {
            page: 2,
            ..Default::default()
        };
        let (_, status) = service.markets_payload(params.clone()).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);

        // Second call hits the freshly cached entry.
        let (_, status) = service.markets_payload(params).await.unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert!(!cache.is_empty());
    }

    #[tokio::test]
    async fn test_leaderboard_markets_empty_is_no_data() {
        let (service, _) = service(300, 10);
        assert!(matches!(
            service.leaderboard_markets(),
            Err(ProxyError::NoData)
        ));
    }
}
