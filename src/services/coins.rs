//! Fetch-by-id coin detail service.
//!
//! Tracks the top-ranked ids from the markets service (recomputed whenever
//! markets emits) and keeps one detail record per id warm in the cache.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheStatus, KeyValues, Ttl};
use crate::coingecko::params::{coin_detail_fingerprint, MarketsParams};
use crate::coingecko::{CoinGeckoClient, RequestBuilder};
use crate::config::{CoinsConfig, MarketsNormalize};
use crate::errors::Result;
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::services::markets::MarketsService;

pub struct CoinsService {
    client: Arc<CoinGeckoClient>,
    builder: RequestBuilder,
    cache: Arc<dyn Cache>,
    config: CoinsConfig,
    normalize: MarketsNormalize,
    markets: Arc<MarketsService>,
    ids: RwLock<Vec<String>>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    metrics: Metrics,
}

impl CoinsService {
    pub fn new(
        client: Arc<CoinGeckoClient>,
        builder: RequestBuilder,
        cache: Arc<dyn Cache>,
        config: CoinsConfig,
        normalize: MarketsNormalize,
        markets: Arc<MarketsService>,
        metrics: Metrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            builder,
            cache,
            config,
            normalize,
            markets,
            ids: RwLock::new(Vec::new()),
            scheduler: Mutex::new(None),
            watcher: Mutex::new(None),
            metrics,
        })
    }

    pub fn start(self: &Arc<Self>) {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return;
        }

        // Recompute the tracked id list every time markets refreshes.
        let service = self.clone();
        let watcher = self.markets.subscribe().watch(
            move || {
                let service = service.clone();
                async move {
                    service.recompute_ids();
                }
            },
            false,
        );
        *self.watcher.lock() = Some(watcher);

        let service = self.clone();
        let scheduler = Arc::new(Scheduler::new(
            "coins",
            self.config.update_interval,
            move || {
                let service = service.clone();
                async move {
                    match service.refresh().await {
                        Ok(count) => {
                            service
                                .metrics
                                .observe_tier_refresh("coins", "all", "ok");
                            debug!("coin details refreshed for {} ids", count);
                        }
                        Err(e) => {
                            service
                                .metrics
                                .observe_tier_refresh("coins", "all", "error");
                            warn!("coin detail refresh failed: {}", e);
                        }
                    }
                }
            },
        ));
        scheduler.start(true);
        *slot = Some(scheduler);
    }

    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }

    fn recompute_ids(&self) {
        let mut ids = self.markets.top_ids();
        ids.truncate(self.config.limit);
        debug!("coin detail id list recomputed, {} ids tracked", ids.len());
        *self.ids.write() = ids;
    }

    /// Refreshes the detail record for every tracked id, chunked and
    /// throttled; each chunk is committed as it lands.
    pub async fn refresh(&self) -> Result<usize> {
        if self.ids.read().is_empty() {
            self.recompute_ids();
        }
        let ids = self.ids.read().clone();
        let chunk_size = self.config.chunk_size.max(1);

        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            if index > 0 && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
            let params = MarketsParams {
                ids: chunk.to_vec(),
                ..Default::default()
            }
            .normalize(&self.normalize);
            let body = self
                .client
                .fetch("coin_detail", |key| self.builder.markets(key, &params))
                .await?;
            let rows: Vec<Value> = serde_json::from_slice(&body)?;

            let mut entries = KeyValues::with_capacity(rows.len());
            for row in &rows {
                if let Some(id) = row.get("id").and_then(Value::as_str) {
                    entries.insert(coin_detail_fingerprint(id), serde_json::to_vec(row)?);
                }
            }
            self.cache
                .set(entries, Ttl::After(self.config.ttl))
                .await;
        }
        Ok(ids.len())
    }

    pub async fn get_by_id(&self, id: &str) -> (Option<Vec<u8>>, CacheStatus) {
        let keys = vec![coin_detail_fingerprint(id)];
        let (mut found, _) = self.cache.get(&keys).await;
        let status = CacheStatus::from_counts(found.len(), 1);
        self.metrics.observe_cache_request("coins", status.as_str());
        (found.remove(&keys[0]), status)
    }

    /// Detail records for `ids`: found blobs keyed by id, the ids the cache
    /// could not serve, and the overall status.
    pub async fn get_multiple(
        &self,
        ids: &[String],
    ) -> (KeyValues, Vec<String>, CacheStatus) {
        let keys: Vec<String> = ids.iter().map(|id| coin_detail_fingerprint(id)).collect();
        let (found, _) = self.cache.get(&keys).await;
        let status = CacheStatus::from_counts(found.len(), keys.len());
        self.metrics.observe_cache_request("coins", status.as_str());

        let mut records = KeyValues::with_capacity(found.len());
        let mut missing = Vec::new();
        for (id, key) in ids.iter().zip(&keys) {
            match found.get(key) {
                Some(value) => {
                    records.insert(id.clone(), value.clone());
                }
                None => missing.push(id.clone()),
            }
        }
        (records, missing, status)
    }

    pub fn tracked_count(&self) -> usize {
        self.ids.read().len()
    }
}
