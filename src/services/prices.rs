//! Prices service.
//!
//! Tiers cover token ranks in the markets top list. A tier tick runs in two
//! phases: (A) fetch simple-price quotes for the ranked ids in the tier's
//! range, chunked and throttled; (B) when enabled, opportunistically fetch
//! supported-platform ids that no tier range covers. Quotes are cached as
//! per-(id, currency) slices so any caller subset assembles from cache.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cache::{Cache, CacheStatus, FnLoader, KeyValues, Ttl};
use crate::coingecko::params::{price_fingerprint, split_price_fingerprint, PriceParams};
use crate::coingecko::{CoinGeckoClient, RequestBuilder};
use crate::config::PricesConfig;
use crate::errors::{ProxyError, Result};
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::services::coinslist::CoinsListService;
use crate::services::markets::MarketsService;
use crate::subscription::{Subscription, SubscriptionManager};
use crate::tiers::{Tier, TierSet};

pub struct PricesService {
    client: Arc<CoinGeckoClient>,
    builder: RequestBuilder,
    cache: Arc<dyn Cache>,
    config: PricesConfig,
    tier_set: TierSet,
    markets: Arc<MarketsService>,
    coinslist: Arc<CoinsListService>,
    subscriptions: SubscriptionManager,
    schedulers: Mutex<Vec<Arc<Scheduler>>>,
    healthy: AtomicBool,
    metrics: Metrics,
}

impl PricesService {
    pub fn new(
        client: Arc<CoinGeckoClient>,
        builder: RequestBuilder,
        cache: Arc<dyn Cache>,
        config: PricesConfig,
        markets: Arc<MarketsService>,
        coinslist: Arc<CoinsListService>,
        metrics: Metrics,
    ) -> Result<Arc<Self>> {
        let tier_set = config.tier_set()?;
        Ok(Arc::new(Self {
            client,
            builder,
            cache,
            config,
            tier_set,
            markets,
            coinslist,
            subscriptions: SubscriptionManager::new(),
            schedulers: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(false),
            metrics,
        }))
    }

    pub fn start(self: &Arc<Self>) {
        let mut schedulers = self.schedulers.lock();
        if !schedulers.is_empty() {
            return;
        }
        for tier in self.tier_set.iter() {
            let service = self.clone();
            let tier = tier.clone();
            let name = format!("prices:{}", tier.name);
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

    /// Signalled after every successful tier refresh.
    pub fn subscribe(&self) -> Subscription {
        self.subscriptions.subscribe()
    }

    /// True once any tier has refreshed successfully.
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    async fn refresh_tier(&self, tier: &Tier) {
        let ranked = self.markets.top_ids();
        if ranked.is_empty() {
            debug!(
                "prices tier {:?}: no ranked ids yet, waiting for markets",
                tier.name
            );
            self.metrics
                .observe_tier_refresh("prices", &tier.name, "skipped");
            return;
        }

        let from = (tier.from as usize - 1).min(ranked.len());
        let to = (tier.to as usize).min(ranked.len());
        let ids = &ranked[from..to];

        match self.refresh_ids(ids).await {
            Ok(count) => {
                debug!("prices tier {:?} refreshed {} ids", tier.name, count);
                self.metrics
                    .observe_tier_refresh("prices", &tier.name, "ok");
                self.healthy.store(true, Ordering::Relaxed);
                self.subscriptions.emit();
            }
            Err(e) => {
                self.metrics
                    .observe_tier_refresh("prices", &tier.name, "error");
                warn!("prices tier {:?} refresh failed: {}", tier.name, e);
                return;
            }
        }

        if tier.fetch_coinslist_ids {
            // Phase B: supported-platform ids not covered by any tier range.
            let covered: HashSet<&String> = ranked
                .iter()
                .enumerate()
                .filter(|(index, _)| self.tier_set.covers(*index as u32 + 1))
                .map(|(_, id)| id)
                .collect();
            let extra: Vec<String> = self
                .coinslist
                .supported_platform_ids()
                .into_iter()
                .filter(|id| !covered.contains(id))
                .collect();
            if extra.is_empty() {
                return;
            }
            match self.refresh_ids(&extra).await {
                Ok(count) => debug!(
                    "prices tier {:?} fetched {} coinslist ids opportunistically",
                    tier.name, count
                ),
                Err(e) => warn!(
                    "prices tier {:?} coinslist phase failed: {}",
                    tier.name, e
                ),
            }
        }
    }

    /// Fetches quotes for `ids` in chunks, committing each chunk's slices
    /// as it lands. A chunk failure aborts the remaining chunks.
    async fn refresh_ids(&self, ids: &[String]) -> Result<usize> {
        let chunk_size = self.config.chunk_size.max(1);
        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            if index > 0 && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
            let params =
                PriceParams::new(chunk.to_vec(), self.config.currencies.clone()).normalize();
            let body = self
                .client
                .fetch("simple_price", |key| self.builder.simple_price(key, &params))
                .await?;
            let entries = split_simple_price(&body, &params.currencies)?;
            self.cache
                .set(entries, Ttl::After(self.config.ttl))
                .await;
        }
        Ok(ids.len())
    }

    /// Serves a caller /simple/price request from per-(id, currency) cache
    /// slices, loading any uncached ids live.
    pub async fn simple_price(&self, params: PriceParams) -> Result<(Vec<u8>, CacheStatus)> {
        let params = params.normalize();
        let keys = params.fingerprints();
        if keys.is_empty() {
            return Err(ProxyError::NoData);
        }

        let (found, _) = self.cache.get(&keys).await;
        let status = CacheStatus::from_counts(found.len(), keys.len());
        self.metrics.observe_cache_request("prices", status.as_str());

        let client = self.client.clone();
        let builder = self.builder.clone();
        let loader = FnLoader::new(move |load_keys: Vec<String>| {
            let client = client.clone();
            let builder = builder.clone();
            async move {
                let mut ids = Vec::new();
                let mut currencies = Vec::new();
                for key in &load_keys {
                    if let Some((id, currency)) = split_price_fingerprint(key) {
                        ids.push(id.to_string());
                        currencies.push(currency.to_string());
                    }
                }
                let params = PriceParams::new(ids, currencies).normalize();
                let body = client
                    .fetch("simple_price", |key| builder.simple_price(key, &params))
                    .await?;
                split_simple_price(&body, &params.currencies)
            }
        });

        let slices = self
            .cache
            .get_or_load(&keys, &loader, true, Ttl::After(self.config.ttl))
            .await?;
        let body = assemble_simple_price(&params, &slices)?;
        Ok((body, status))
    }
}

/// Splits an upstream simple-price response into per-(id, currency) cache
/// slices. Each slice keeps the currency-scoped fields plus the shared
/// `last_updated_at` stamp.
pub(crate) fn split_simple_price(body: &[u8], currencies: &[String]) -> Result<KeyValues> {
    let parsed: Map<String, Value> = serde_json::from_slice(body)?;
    let mut entries = KeyValues::new();

    for (id, quote) in parsed {
        let Some(quote) = quote.as_object() else {
            return Err(ProxyError::Field {
                field: "simple_price",
                value: format!("non-object quote for {id:?}"),
            });
        };
        for currency in currencies {
            let prefix = format!("{currency}_");
            let mut slice = Map::new();
            for (field, value) in quote {
                if field == currency || field.starts_with(&prefix) || field == "last_updated_at" {
                    slice.insert(field.clone(), value.clone());
                }
            }
            if slice.contains_key(currency.as_str()) {
                entries.insert(
                    price_fingerprint(&id, currency),
                    serde_json::to_vec(&Value::Object(slice))?,
                );
            }
        }
    }
    Ok(entries)
}

/// Merges cached slices back into the upstream response shape, restricted
/// to the requested ids and currencies.
pub(crate) fn assemble_simple_price(params: &PriceParams, slices: &KeyValues) -> Result<Vec<u8>> {
    let mut root = Map::new();
    for id in &params.ids {
        let mut merged = Map::new();
        for currency in &params.currencies {
            if let Some(bytes) = slices.get(&price_fingerprint(id, currency)) {
                let slice: Map<String, Value> = serde_json::from_slice(bytes)?;
                merged.extend(slice);
            }
        }
        if !merged.is_empty() {
            root.insert(id.clone(), Value::Object(merged));
        }
    }
    Ok(serde_json::to_vec(&Value::Object(root))?)
}
