//! Upstream HTTP execution: bounded retries with exponential backoff, and
//! the key-rotating request pipeline layered on top.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::keys::{ApiKey, KeyManager};
use crate::errors::{ProxyError, Result};
use crate::metrics::Metrics;

const USER_AGENT: &str = concat!("market-proxy/", env!("CARGO_PKG_VERSION"));

/// Raw HTTP seam, mockable in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, url: Url) -> Result<(u16, Vec<u8>)>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, url: Url) -> Result<(u16, Vec<u8>)> {
        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok((status, body))
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Duration of the final successful attempt only.
    pub elapsed: Duration,
}

/// Wraps a transport with per-status retry classification and backoff.
pub struct RetryingClient {
    transport: Arc<dyn HttpTransport>,
    config: RetryConfig,
    metrics: Metrics,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RetryConfig, metrics: Metrics) -> Self {
        Self {
            transport,
            config,
            metrics,
        }
    }

    /// Executes the request, retrying network errors, 429 and 5xx. Other
    /// 4xx statuses return immediately with the status preserved.
    pub async fn execute(&self, endpoint: &'static str, url: Url) -> Result<FetchResponse> {
        let mut last_error = ProxyError::NoData;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                self.metrics.observe_upstream_retry(endpoint);
                tokio::time::sleep(self.backoff_delay(attempt - 1)).await;
            }

            let started = Instant::now();
            match self.transport.execute(url.clone()).await {
                Ok((status, body)) => {
                    self.metrics
                        .observe_upstream_request(endpoint, status_class(status));
                    if (200..300).contains(&status) {
                        let elapsed = started.elapsed();
                        self.metrics
                            .observe_upstream_latency(endpoint, elapsed.as_secs_f64());
                        return Ok(FetchResponse {
                            status,
                            body,
                            elapsed,
                        });
                    }
                    let error = ProxyError::UpstreamStatus { status };
                    if !error.is_transient() {
                        return Err(error);
                    }
                    debug!("{} returned {}, attempt {}", endpoint, status, attempt + 1);
                    last_error = error;
                }
                Err(error) => {
                    self.metrics.observe_upstream_request(endpoint, "error");
                    if !error.is_transient() {
                        return Err(error);
                    }
                    debug!("{} failed: {}, attempt {}", endpoint, error, attempt + 1);
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    fn backoff_delay(&self, exponent: u32) -> Duration {
        let delay = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.backoff_ceiling);
        // ±20% jitter.
        delay.mul_f64(rand::rng().random_range(0.8..1.2))
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        429 => "429",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Key-rotating request pipeline: tries each eligible key in preference
/// order, falling through on transient failure and stopping on the first
/// success or permanent rejection.
pub struct CoinGeckoClient {
    http: RetryingClient,
    keys: Arc<KeyManager>,
}

impl CoinGeckoClient {
    pub fn new(http: RetryingClient, keys: Arc<KeyManager>) -> Self {
        Self { http, keys }
    }

    /// Single anonymous attempt against the public host, retried for
    /// transient failures but never rotated onto a key.
    pub async fn fetch_anonymous<F>(&self, endpoint: &'static str, build: F) -> Result<Vec<u8>>
    where
        F: Fn(&ApiKey) -> Result<Url>,
    {
        let url = build(&ApiKey::anonymous())?;
        Ok(self.http.execute(endpoint, url).await?.body)
    }

    pub async fn fetch<F>(&self, endpoint: &'static str, build: F) -> Result<Vec<u8>>
    where
        F: Fn(&ApiKey) -> Result<Url>,
    {
        let keys = self.keys.available_keys();
        let mut last_error = ProxyError::NoData;

        for key in &keys {
            let url = build(key)?;
            match self.http.execute(endpoint, url).await {
                Ok(response) => {
                    self.keys.mark_success(key);
                    return Ok(response.body);
                }
                Err(error) => {
                    if !error.is_transient() {
                        return Err(error);
                    }
                    warn!(
                        "{} failed with {} key: {}",
                        endpoint,
                        key.kind.as_str(),
                        error
                    );
                    self.keys.mark_failed(key);
                    last_error = error;
                }
            }
        }

        Err(ProxyError::AllKeysExhausted(Box::new(last_error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Responder = Box<dyn Fn(&Url) -> Result<(u16, Vec<u8>)> + Send + Sync>;

    struct MockTransport {
        responder: Responder,
        requests: Mutex<Vec<Url>>,
    }

    impl MockTransport {
        fn new(responder: Responder) -> Arc<Self> {
            Arc::new(Self {
                responder,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn execute(&self, url: Url) -> Result<(u16, Vec<u8>)> {
            self.requests.lock().push(url.clone());
            (self.responder)(&url)
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            backoff_ceiling: Duration::from_millis(5),
        }
    }

    fn url() -> Url {
        Url::parse("http://upstream.test/api/v3/coins/markets").unwrap()
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let transport = MockTransport::new(Box::new(|_| Ok((200, b"ok".to_vec()))));
        let client = RetryingClient::new(transport.clone(), fast_retry(), Metrics::default());
        let response = client.execute("markets", url()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_429_retried_until_success() {
        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_clone = attempts.clone();
        let transport = MockTransport::new(Box::new(move |_| {
            let mut n = attempts_clone.lock();
            *n += 1;
            if *n < 3 {
                Ok((429, Vec::new()))
            } else {
                Ok((200, b"recovered".to_vec()))
            }
        }));
        let client = RetryingClient::new(transport.clone(), fast_retry(), Metrics::default());
        let response = client.execute("markets", url()).await.unwrap();
        assert_eq!(response.body, b"recovered");
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_4xx_not_retried() {
        let transport = MockTransport::new(Box::new(|_| Ok((404, Vec::new()))));
        let client = RetryingClient::new(transport.clone(), fast_retry(), Metrics::default());
        let err = client.execute("markets", url()).await.unwrap_err();
        assert_eq!(err.upstream_status(), Some(404));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let transport = MockTransport::new(Box::new(|_| Ok((503, Vec::new()))));
        let client = RetryingClient::new(transport.clone(), fast_retry(), Metrics::default());
        let err = client.execute("markets", url()).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamStatus { status: 503 }));
        // Initial attempt + 3 retries.
        assert_eq!(transport.request_count(), 4);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let transport = MockTransport::new(Box::new(|_| Ok((200, Vec::new()))));
        let client = RetryingClient::new(
            transport,
            RetryConfig {
                max_retries: 5,
                backoff_base: Duration::from_secs(1),
                backoff_ceiling: Duration::from_secs(4),
            },
            Metrics::default(),
        );

        for (exponent, expected) in [(0u32, 1.0f64), (1, 2.0), (2, 4.0), (3, 4.0)] {
            let delay = client.backoff_delay(exponent).as_secs_f64();
            assert!(
                delay >= expected * 0.8 && delay <= expected * 1.2,
                "exponent {exponent}: got {delay}, expected ~{expected}"
            );
        }
    }

    #[tokio::test]
    async fn test_key_rotation_on_429() {
        // Pro key always gets 429, demo key succeeds.
        let transport = MockTransport::new(Box::new(|url: &Url| {
            let query = url.query().unwrap_or("");
            if query.contains("x_cg_pro_api_key") {
                Ok((429, Vec::new()))
            } else {
                Ok((200, b"demo-data".to_vec()))
            }
        }));
        let retry = RetryConfig {
            max_retries: 0,
            ..fast_retry()
        };
        let metrics = Metrics::default();
        let keys = Arc::new(KeyManager::new(
            vec!["pro1".to_string()],
            vec!["demo1".to_string()],
            metrics.clone(),
        ));
        let client = CoinGeckoClient::new(
            RetryingClient::new(transport.clone(), retry, metrics),
            keys.clone(),
        );

        let builder = super::super::request::RequestBuilder::with_base_urls(
            "http://upstream.test",
            "http://upstream.test",
        );
        let body = client
            .fetch("coins_list", |key| builder.coins_list(key))
            .await
            .unwrap();
        assert_eq!(body, b"demo-data");

        // The failed pro key is now cooling down.
        let available = keys.available_keys();
        assert!(available.iter().all(|k| k.secret != "pro1"));
    }

    #[tokio::test]
    async fn test_all_keys_exhausted() {
        let transport = MockTransport::new(Box::new(|_| Ok((500, Vec::new()))));
        let retry = RetryConfig {
            max_retries: 0,
            ..fast_retry()
        };
        let metrics = Metrics::default();
        let keys = Arc::new(KeyManager::new(
            vec!["pro1".to_string()],
            Vec::new(),
            metrics.clone(),
        ));
        let client = CoinGeckoClient::new(
            RetryingClient::new(transport, retry, metrics),
            keys,
        );

        let builder = super::super::request::RequestBuilder::with_base_urls(
            "http://upstream.test",
            "http://upstream.test",
        );
        let err = client
            .fetch("coins_list", |key| builder.coins_list(key))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::AllKeysExhausted(_)));
    }

    #[tokio::test]
    async fn test_permanent_rejection_stops_rotation() {
        let transport = MockTransport::new(Box::new(|_| Ok((400, Vec::new()))));
        let metrics = Metrics::default();
        let keys = Arc::new(KeyManager::new(
            vec!["pro1".to_string()],
            vec!["demo1".to_string()],
            metrics.clone(),
        ));
        let client = CoinGeckoClient::new(
            RetryingClient::new(transport.clone(), fast_retry(), metrics),
            keys,
        );

        let builder = super::super::request::RequestBuilder::with_base_urls(
            "http://upstream.test",
            "http://upstream.test",
        );
        let err = client
            .fetch("markets", |key| builder.markets(key, &Default::default()))
            .await
            .unwrap_err();
        assert_eq!(err.upstream_status(), Some(400));
        assert_eq!(transport.request_count(), 1);
    }
}
