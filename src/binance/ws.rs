//! Binance ticker WebSocket client.
//!
//! Maintains a single upstream connection with automatic reconnect. Reads
//! carry a deadline equal to the pong timeout, so a silent server trips the
//! deadline and forces a redial; ping payloads are echoed back as pongs.
//! Decoded ticker batches update an in-memory quote map for watched base
//! symbols only, all-or-nothing per message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::errors::{ProxyError, Result};
use crate::metrics::Metrics;

pub const BINANCE_WS_URL: &str = "wss://data-stream.binance.vision/ws/!ticker@arr";

const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const STREAM_LABEL: &str = "binance_ticker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Dialing,
    Connected,
    Reconnecting,
    Stopped,
}

/// Last observed quote for a watched base symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerQuote {
    pub price: f64,
    pub volume_24h: f64,
    pub percent_change_24h: f64,
}

#[derive(Debug, Deserialize)]
struct TickerRecord {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "P")]
    price_change_percent: String,
    #[serde(rename = "v")]
    volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TickerMessage {
    Batch(Vec<TickerRecord>),
    Single(TickerRecord),
}

pub struct BinanceWsClient {
    url: String,
    /// Full pair symbol ("BTCUSDT") -> base symbol ("BTC").
    watch: Arc<RwLock<HashMap<String, String>>>,
    quotes: Arc<RwLock<HashMap<String, TickerQuote>>>,
    state: Arc<RwLock<ConnectionState>>,
    healthy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    metrics: Metrics,
    pong_timeout: Duration,
    reconnect_delay: Duration,
}

impl BinanceWsClient {
    pub fn new(metrics: Metrics) -> Self {
        Self::with_url(BINANCE_WS_URL, metrics)
    }

    pub fn with_url(url: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            url: url.into(),
            watch: Arc::new(RwLock::new(HashMap::new())),
            quotes: Arc::new(RwLock::new(HashMap::new())),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            healthy: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            metrics,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_timeouts(mut self, pong_timeout: Duration, reconnect_delay: Duration) -> Self {
        self.pong_timeout = pong_timeout;
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Recomputes the pair-symbol map from base symbols and a quote symbol
    /// ("BTC" + "USDT" -> "BTCUSDT") and clears previously observed quotes.
    /// Incoming messages for symbols absent from the map are ignored.
    pub fn set_watch_list(&self, base_symbols: &[String], quote_symbol: &str) {
        let quote = quote_symbol.to_uppercase();
        let mut map = HashMap::with_capacity(base_symbols.len());
        for base in base_symbols {
            let base = base.to_uppercase();
            map.insert(format!("{base}{quote}"), base);
        }
        *self.watch.write() = map;
        self.quotes.write().clear();
        debug!("watch list updated, tracking {} pairs", base_symbols.len());
    }

    /// Snapshot of the quote map keyed by base symbol.
    pub fn quotes(&self) -> HashMap<String, TickerQuote> {
        self.quotes.read().clone()
    }

    /// True once at least one message batch has been applied.
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Dials the upstream and spawns the read/reconnect loop. A second call
    /// while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let client = self.clone();
        let handle = tokio::spawn(async move {
            client.run().await;
        });
        *self.handle.lock() = Some(handle);
    }

    /// Cancels the connection loop and joins it. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        *self.state.write() = ConnectionState::Stopped;
    }

    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            *self.state.write() = ConnectionState::Dialing;
            match connect_async(&self.url).await {
                Ok((stream, _)) => {
                    *self.state.write() = ConnectionState::Connected;
                    info!("connected to {}", self.url);
                    if let Err(e) = self.read_loop(stream).await {
                        warn!("ticker stream read failed: {}", e);
                    }
                }
                Err(e) => {
                    error!("failed to dial {}: {}", self.url, e);
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            *self.state.write() = ConnectionState::Reconnecting;
            self.metrics.observe_ws_reconnect(STREAM_LABEL);
            tokio::time::sleep(self.reconnect_delay).await;
        }
        *self.state.write() = ConnectionState::Stopped;
    }

    async fn read_loop<S>(&self, stream: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            // Each read carries a deadline: no traffic (not even a ping)
            // within the pong timeout fails the read and forces a redial.
            let message = match tokio::time::timeout(self.pong_timeout, read.next()).await {
                Err(_) => return Err(ProxyError::ReadTimeout(self.pong_timeout)),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Text(text) => match self.apply_message(&text) {
                    Ok(applied) => {
                        self.healthy.store(true, Ordering::Relaxed);
                        self.metrics.observe_ws_message(STREAM_LABEL, "applied");
                        if applied > 0 {
                            debug!("applied {} ticker updates", applied);
                        }
                    }
                    Err(e) => {
                        self.metrics.observe_ws_message(STREAM_LABEL, "parse_error");
                        warn!("discarding ticker message: {}", e);
                    }
                },
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
    }

    /// Decodes a ticker message (array or single record) and commits the
    /// quotes for watched symbols. Any unparseable field aborts the whole
    /// message; nothing is committed.
    pub(crate) fn apply_message(&self, text: &str) -> Result<usize> {
        let records = match serde_json::from_str::<TickerMessage>(text)? {
            TickerMessage::Batch(records) => records,
            TickerMessage::Single(record) => vec![record],
        };

        let watch = self.watch.read();
        let mut updates = Vec::new();
        for record in &records {
            let Some(base) = watch.get(&record.symbol) else {
                continue;
            };
            updates.push((base.clone(), parse_quote(record)?));
        }
        drop(watch);

        let applied = updates.len();
        if applied > 0 {
            let mut quotes = self.quotes.write();
            for (base, quote) in updates {
                quotes.insert(base, quote);
            }
        }
        Ok(applied)
    }
}

fn parse_quote(record: &TickerRecord) -> Result<TickerQuote> {
    Ok(TickerQuote {
        price: parse_field("lastPrice", &record.last_price)?,
        volume_24h: parse_field("volume24h", &record.volume)?,
        percent_change_24h: parse_field("priceChangePercent", &record.price_change_percent)?,
    })
}

fn parse_field(field: &'static str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| ProxyError::Field {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const BATCH: &str = r#"[
        {"s":"BTCUSDT","c":"50000.00","P":"1.5","v":"100"},
        {"s":"ETHUSDT","c":"3000","P":"-0.5","v":"1000"},
        {"s":"DOGEUSDT","c":"1","P":"0","v":"0"}
    ]"#;

    fn client() -> BinanceWsClient {
        let client = BinanceWsClient::with_url("ws://unused.test", Metrics::default());
        client.set_watch_list(&["BTC".to_string(), "ETH".to_string()], "USDT");
        client
    }

    #[test]
    fn test_batch_updates_watched_symbols_only() {
        let client = client();
        let applied = client.apply_message(BATCH).unwrap();
        assert_eq!(applied, 2);

        let quotes = client.quotes();
        assert_eq!(quotes.len(), 2);
        let btc = quotes.get("BTC").unwrap();
        assert_eq!(btc.price, 50000.0);
        assert_eq!(btc.percent_change_24h, 1.5);
        assert_eq!(btc.volume_24h, 100.0);
        let eth = quotes.get("ETH").unwrap();
        assert_eq!(eth.price, 3000.0);
        assert_eq!(eth.percent_change_24h, -0.5);
        assert!(!quotes.contains_key("DOGE"));
    }

    #[test]
    fn test_single_record_message() {
        let client = client();
        let applied = client
            .apply_message(r#"{"s":"ETHUSDT","c":"2500.5","P":"2.0","v":"42"}"#)
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(client.quotes().get("ETH").unwrap().price, 2500.5);
    }

    #[test]
    fn test_unparseable_field_aborts_whole_message() {
        let client = client();
        client.apply_message(BATCH).unwrap();

        let bad = r#"[
            {"s":"BTCUSDT","c":"51000","P":"1.0","v":"10"},
            {"s":"ETHUSDT","c":"not-a-number","P":"0","v":"0"}
        ]"#;
        let err = client.apply_message(bad).unwrap_err();
        assert!(matches!(err, ProxyError::Field { .. }));

        // No partial update: BTC still holds the previous batch's price.
        assert_eq!(client.quotes().get("BTC").unwrap().price, 50000.0);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let client = client();
        assert!(client.apply_message("{not json").is_err());
    }

    #[test]
    fn test_set_watch_list_clears_quotes() {
        let client = client();
        client.apply_message(BATCH).unwrap();
        assert!(!client.quotes().is_empty());

        client.set_watch_list(&["SOL".to_string()], "usdt");
        assert!(client.quotes().is_empty());

        // Old symbols are no longer watched, new ones are.
        assert_eq!(client.apply_message(BATCH).unwrap(), 0);
        assert_eq!(
            client
                .apply_message(r#"{"s":"SOLUSDT","c":"150","P":"3","v":"7"}"#)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_ping_echoed_and_batch_applied() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Ping(b"hello".to_vec())).await.unwrap();

            // The client echoes the ping payload back as a pong.
            let pong = loop {
                match ws.next().await {
                    Some(Ok(Message::Pong(payload))) => break payload,
                    Some(Ok(_)) => continue,
                    other => panic!("expected pong, got {other:?}"),
                }
            };
            assert_eq!(pong, b"hello");

            ws.send(Message::Text(BATCH.to_string())).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = Arc::new(
            BinanceWsClient::with_url(format!("ws://{addr}"), Metrics::default())
                .with_timeouts(Duration::from_secs(5), Duration::from_millis(50)),
        );
        client.set_watch_list(&["BTC".to_string()], "USDT");
        client.start();

        let mut healthy = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if client.healthy() {
                healthy = true;
                break;
            }
        }
        assert!(healthy, "client never applied a batch");
        assert_eq!(client.quotes().get("BTC").unwrap().price, 50000.0);

        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Stopped);
        server.abort();
    }

    #[tokio::test]
    async fn test_silent_server_triggers_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    // Accept and then stay silent: no pings, no data.
                    let _ws = accept_async(stream).await.unwrap();
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });

        let client = Arc::new(
            BinanceWsClient::with_url(format!("ws://{addr}"), Metrics::default())
                .with_timeouts(Duration::from_millis(100), Duration::from_millis(300)),
        );
        client.start();

        let mut saw_reconnecting = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if client.state() == ConnectionState::Reconnecting {
                saw_reconnecting = true;
                break;
            }
        }
        assert!(saw_reconnecting, "silent server must force a reconnect");

        client.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let client = Arc::new(BinanceWsClient::with_url(
            "ws://127.0.0.1:1",
            Metrics::default(),
        ));
        client.start();
        client.stop().await;
        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Stopped);
    }
}
