//! Prometheus metrics for the proxy.
//!
//! All metrics use the `market_proxy_` prefix. A single `Metrics` instance is
//! created at startup and cloned into every service.

use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Upstream HTTP requests by endpoint and status class ("2xx", "429", ...)
    pub upstream_requests_total: CounterVec,
    /// Retries performed by the HTTP client
    pub upstream_retries_total: CounterVec,
    /// Latency of the final successful attempt per endpoint
    pub upstream_request_seconds: HistogramVec,
    /// API key failures by key kind
    pub key_failures_total: CounterVec,
    /// Tier refresh outcomes by family, tier name and outcome
    pub tier_refresh_total: CounterVec,
    /// Cache lookups by family and status (hit/partial/miss)
    pub cache_requests_total: CounterVec,
    /// WebSocket reconnect attempts
    pub websocket_reconnects_total: CounterVec,
    /// WebSocket ticker batches by outcome (applied/parse_error/ignored)
    pub websocket_messages_total: CounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let upstream_requests_total = CounterVec::new(
            Opts::new(
                "market_proxy_upstream_requests_total",
                "Upstream HTTP requests by endpoint and status class",
            ),
            &["endpoint", "status_class"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_retries_total = CounterVec::new(
            Opts::new(
                "market_proxy_upstream_retries_total",
                "Retries performed by the HTTP client",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(upstream_retries_total.clone()))?;

        let upstream_request_seconds = HistogramVec::new(
            HistogramOpts::new(
                "market_proxy_upstream_request_seconds",
                "Latency of the final successful upstream attempt",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["endpoint"],
        )?;
        registry.register(Box::new(upstream_request_seconds.clone()))?;

        let key_failures_total = CounterVec::new(
            Opts::new(
                "market_proxy_key_failures_total",
                "API key failures by key kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(key_failures_total.clone()))?;

        let tier_refresh_total = CounterVec::new(
            Opts::new(
                "market_proxy_tier_refresh_total",
                "Tier refresh outcomes by family and tier",
            ),
            &["family", "tier", "outcome"],
        )?;
        registry.register(Box::new(tier_refresh_total.clone()))?;

        let cache_requests_total = CounterVec::new(
            Opts::new(
                "market_proxy_cache_requests_total",
                "Cache lookups by family and status",
            ),
            &["family", "status"],
        )?;
        registry.register(Box::new(cache_requests_total.clone()))?;

        let websocket_reconnects_total = CounterVec::new(
            Opts::new(
                "market_proxy_websocket_reconnects_total",
                "WebSocket reconnect attempts by stream",
            ),
            &["stream"],
        )?;
        registry.register(Box::new(websocket_reconnects_total.clone()))?;

        let websocket_messages_total = CounterVec::new(
            Opts::new(
                "market_proxy_websocket_messages_total",
                "WebSocket ticker batches by outcome",
            ),
            &["stream", "outcome"],
        )?;
        registry.register(Box::new(websocket_messages_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            upstream_requests_total,
            upstream_retries_total,
            upstream_request_seconds,
            key_failures_total,
            tier_refresh_total,
            cache_requests_total,
            websocket_reconnects_total,
            websocket_messages_total,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn observe_upstream_request(&self, endpoint: &str, status_class: &str) {
        self.upstream_requests_total
            .with_label_values(&[endpoint, status_class])
            .inc();
    }

    pub fn observe_upstream_retry(&self, endpoint: &str) {
        self.upstream_retries_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn observe_upstream_latency(&self, endpoint: &str, seconds: f64) {
        self.upstream_request_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn observe_key_failure(&self, kind: &str) {
        self.key_failures_total.with_label_values(&[kind]).inc();
    }

    pub fn observe_tier_refresh(&self, family: &str, tier: &str, outcome: &str) {
        self.tier_refresh_total
            .with_label_values(&[family, tier, outcome])
            .inc();
    }

    pub fn observe_cache_request(&self, family: &str, status: &str) {
        self.cache_requests_total
            .with_label_values(&[family, status])
            .inc();
    }

    pub fn observe_ws_reconnect(&self, stream: &str) {
        self.websocket_reconnects_total
            .with_label_values(&[stream])
            .inc();
    }

    pub fn observe_ws_message(&self, stream: &str, outcome: &str) {
        self.websocket_messages_total
            .with_label_values(&[stream, outcome])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.observe_upstream_request("markets", "2xx");
        metrics.observe_upstream_retry("markets");
        metrics.observe_cache_request("prices", "hit");
        let output = metrics.render();
        assert!(output.contains("market_proxy_upstream_requests_total"));
        assert!(output.contains("market_proxy_cache_requests_total"));
    }

    #[test]
    fn test_labelled_counters_accumulate() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.observe_tier_refresh("markets", "top", "ok");
        metrics.observe_tier_refresh("markets", "top", "ok");
        metrics.observe_tier_refresh("markets", "top", "error");
        let output = metrics.render();
        assert!(output.contains("market_proxy_tier_refresh_total"));
        assert!(output.contains("outcome=\"ok\""));
        assert!(output.contains("outcome=\"error\""));
    }
}
