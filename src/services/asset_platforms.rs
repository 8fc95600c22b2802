//! Asset-platforms proxy: small, rarely-changing payload served through the
//! shared cache with the default expiration.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{Cache, CacheStatus, FnLoader, KeyValues, Ttl};
use crate::coingecko::params::asset_platforms_fingerprint;
use crate::coingecko::{CoinGeckoClient, RequestBuilder};
use crate::errors::{ProxyError, Result};
use crate::metrics::Metrics;

pub struct AssetPlatformsService {
    client: Arc<CoinGeckoClient>,
    builder: RequestBuilder,
    cache: Arc<dyn Cache>,
    metrics: Metrics,
}

impl AssetPlatformsService {
    pub fn new(
        client: Arc<CoinGeckoClient>,
        builder: RequestBuilder,
        cache: Arc<dyn Cache>,
        metrics: Metrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            builder,
            cache,
            metrics,
        })
    }

    pub async fn asset_platforms(
        &self,
        filter: Option<&str>,
    ) -> Result<(Vec<u8>, CacheStatus)> {
        let key = asset_platforms_fingerprint(filter);
        let keys = vec![key.clone()];

        let (found, _) = self.cache.get(&keys).await;
        let status = CacheStatus::from_counts(found.len(), keys.len());
        self.metrics
            .observe_cache_request("asset_platforms", status.as_str());

        let client = self.client.clone();
        let builder = self.builder.clone();
        let filter = filter.map(str::to_string);
        let loader = FnLoader::new(move |load_keys: Vec<String>| {
            let client = client.clone();
            let builder = builder.clone();
            let filter = filter.clone();
            async move {
                let body = client
                    .fetch("asset_platforms", |key| {
                        builder.asset_platforms(key, filter.as_deref())
                    })
                    .await?;
                serde_json::from_slice::<Vec<Value>>(&body)?;
                Ok(load_keys
                    .into_iter()
                    .map(|key| (key, body.clone()))
                    .collect::<KeyValues>())
            }
        });

        let mut result = self
            .cache
            .get_or_load(&keys, &loader, true, Ttl::Default)
            .await?;
        let body = result.remove(&key).ok_or(ProxyError::NoData)?;
        Ok((body, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::coingecko::{HttpTransport, KeyManager, RetryConfig, RetryingClient};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use url::Url;

    struct CountingTransport {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl HttpTransport for CountingTransport {
        async fn execute(&self, _url: Url) -> Result<(u16, Vec<u8>)> {
            *self.calls.lock() += 1;
            Ok((200, br#"[{"id": "ethereum", "chain_identifier": 1}]"#.to_vec()))
        }
    }

    #[tokio::test]
    async fn test_filtered_and_unfiltered_cache_separately() {
        let metrics = Metrics::default();
        let transport = Arc::new(CountingTransport {
            calls: Mutex::new(0),
        });
        let client = Arc::new(CoinGeckoClient::new(
            RetryingClient::new(transport.clone(), RetryConfig::default(), metrics.clone()),
            Arc::new(KeyManager::new(Vec::new(), Vec::new(), metrics.clone())),
        ));
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60), Duration::ZERO));
        let service =
            AssetPlatformsService::new(client, RequestBuilder::new(), cache, metrics);

        let (_, status) = service.asset_platforms(None).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        let (_, status) = service.asset_platforms(None).await.unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(*transport.calls.lock(), 1);

        let (_, status) = service.asset_platforms(Some("nft")).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(*transport.calls.lock(), 2);
    }
}
