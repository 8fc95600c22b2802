//! Coins-list service.
//!
//! Periodically refreshes the /coins/list universe (with platform maps) and
//! keeps the tokens that live on a configured supported platform.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{info, warn};

use crate::coingecko::{CoinGeckoClient, RequestBuilder};
use crate::config::CoinsListConfig;
use crate::errors::{ProxyError, Result};
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;

pub struct CoinsListService {
    client: Arc<CoinGeckoClient>,
    builder: RequestBuilder,
    config: CoinsListConfig,
    tokens: RwLock<Vec<Value>>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    healthy: AtomicBool,
    metrics: Metrics,
}

impl CoinsListService {
    pub fn new(
        client: Arc<CoinGeckoClient>,
        builder: RequestBuilder,
        config: CoinsListConfig,
        metrics: Metrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            builder,
            config,
            tokens: RwLock::new(Vec::new()),
            scheduler: Mutex::new(None),
            healthy: AtomicBool::new(false),
            metrics,
        })
    }

    pub fn start(self: &Arc<Self>) {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return;
        }
        let service = self.clone();
        let scheduler = Arc::new(Scheduler::new(
            "coinslist",
            self.config.update_interval,
            move || {
                let service = service.clone();
                async move {
                    if let Err(e) = service.refresh().await {
                        service
                            .metrics
                            .observe_tier_refresh("coinslist", "all", "error");
                        warn!("coins list refresh failed: {}", e);
                    } else {
                        service
                            .metrics
                            .observe_tier_refresh("coinslist", "all", "ok");
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
    }

    pub async fn refresh(&self) -> Result<()> {
        let body = self
            .client
            .fetch("coins_list", |key| self.builder.coins_list(key))
            .await?;
        let rows: Vec<Value> = serde_json::from_slice(&body)?;
        let total = rows.len();

        let filtered: Vec<Value> = rows
            .into_iter()
            .filter(|row| self.on_supported_platform(row))
            .collect();

        info!(
            "coins list refreshed: {} tokens on supported platforms (of {})",
            filtered.len(),
            total
        );
        *self.tokens.write() = filtered;
        self.healthy.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn on_supported_platform(&self, row: &Value) -> bool {
        let Some(platforms) = row.get("platforms").and_then(Value::as_object) else {
            return false;
        };
        self.config.supported_platforms.iter().any(|platform| {
            platforms
                .get(platform)
                .and_then(Value::as_str)
                .map(|address| !address.is_empty())
                .unwrap_or(false)
        })
    }

    /// Serialized token list, with or without the platform maps.
    pub fn tokens(&self, include_platform: bool) -> Result<Vec<u8>> {
        let tokens = self.tokens.read();
        if tokens.is_empty() {
            return Err(ProxyError::NoData);
        }
        if include_platform {
            return Ok(serde_json::to_vec(&*tokens)?);
        }
        let stripped: Vec<Value> = tokens
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if let Some(obj) = row.as_object_mut() {
                    obj.remove("platforms");
                }
                row
            })
            .collect();
        Ok(serde_json::to_vec(&stripped)?)
    }

    /// Ids of every tracked supported-platform token.
    pub fn supported_platform_ids(&self) -> Vec<String> {
        self.tokens
            .read()
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coingecko::{HttpTransport, KeyManager, RetryConfig, RetryingClient};
    use async_trait::async_trait;
    use url::Url;

    const LIST: &str = r#"[
        {"id": "bitcoin", "symbol": "btc", "name": "Bitcoin", "platforms": {}},
        {"id": "usd-coin", "symbol": "usdc", "name": "USDC",
         "platforms": {"ethereum": "0xa0b8...", "polygon-pos": "0x2791..."}},
        {"id": "wrapped-sol", "symbol": "wsol", "name": "Wrapped SOL",
         "platforms": {"solana": "So111..."}},
        {"id": "empty-address", "symbol": "x", "name": "X", "platforms": {"ethereum": ""}}
    ]"#;

    struct FixedTransport;

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn execute(&self, _url: Url) -> Result<(u16, Vec<u8>)> {
            Ok((200, LIST.as_bytes().to_vec()))
        }
    }

    fn service(platforms: &[&str]) -> Arc<CoinsListService> {
        let metrics = Metrics::default();
        let client = Arc::new(CoinGeckoClient::new(
            RetryingClient::new(Arc::new(FixedTransport), RetryConfig::default(), metrics.clone()),
            Arc::new(KeyManager::new(Vec::new(), Vec::new(), metrics.clone())),
        ));
        let config = CoinsListConfig {
            update_interval: std::time::Duration::from_secs(3600),
            supported_platforms: platforms.iter().map(|s| s.to_string()).collect(),
        };
        CoinsListService::new(client, RequestBuilder::new(), config, metrics)
    }

    #[tokio::test]
    async fn test_refresh_keeps_supported_platform_tokens() {
        let service = service(&["ethereum"]);
        service.refresh().await.unwrap();

        assert_eq!(service.supported_platform_ids(), vec!["usd-coin"]);
        assert!(service.healthy());
    }

    #[tokio::test]
    async fn test_empty_platform_address_not_supported() {
        let service = service(&["ethereum"]);
        service.refresh().await.unwrap();
        assert!(!service
            .supported_platform_ids()
            .contains(&"empty-address".to_string()));
    }

    #[tokio::test]
    async fn test_tokens_with_and_without_platforms() {
        let service = service(&["ethereum", "solana"]);
        service.refresh().await.unwrap();

        let with: Vec<Value> =
            serde_json::from_slice(&service.tokens(true).unwrap()).unwrap();
        assert_eq!(with.len(), 2);
        assert!(with[0].get("platforms").is_some());

        let without: Vec<Value> =
            serde_json::from_slice(&service.tokens(false).unwrap()).unwrap();
        assert!(without[0].get("platforms").is_none());
        assert!(without[0].get("id").is_some());
    }

    #[tokio::test]
    async fn test_tokens_empty_is_no_data() {
        let service = service(&["ethereum"]);
        assert!(matches!(service.tokens(true), Err(ProxyError::NoData)));
    }
}
