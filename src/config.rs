//! YAML configuration for the proxy.
//!
//! Durations accept either a number of seconds or a suffixed string such as
//! `"30s"`, `"10m"` or `"1h"`. Tier configuration is validated at startup;
//! an overlapping or malformed tier list is a fatal error.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::errors::{ProxyError, Result};
use crate::tiers::{Tier, TierSet};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub coingecko_leaderboard: LeaderboardConfig,
    pub coingecko_markets: MarketsConfig,
    pub coingecko_prices: PricesConfig,
    pub coingecko_market_chart: MarketChartConfig,
    pub coingecko_coinslist: CoinsListConfig,
    pub coingecko_coins: CoinsConfig,
    pub tokens_file: String,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProxyError::Config(format!(
                "cannot read config file {:?}: {e}",
                path.as_ref()
            ))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)
            .map_err(|e| ProxyError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Fails fast on malformed tier configuration.
    pub fn validate(&self) -> Result<()> {
        self.coingecko_markets.tier_set()?;
        self.coingecko_prices.tier_set()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "go_cache")]
    pub memory: MemoryCacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryCacheSettings {
    #[serde(deserialize_with = "de_duration")]
    pub default_expiration: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub cleanup_interval: Duration,
}

impl Default for MemoryCacheSettings {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// How many top-ranked assets the leaderboard tracks.
    pub limit: usize,
    pub vs_currency: String,
    /// Quote asset for the exchange ticker watch list.
    pub quote_symbol: String,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            vs_currency: "usd".to_string(),
            quote_symbol: "USDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketsConfig {
    #[serde(deserialize_with = "de_duration")]
    pub request_delay: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub ttl: Duration,
    pub market_params_normalize: MarketsNormalize,
    pub tiers: Vec<TierEntry>,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(2),
            ttl: Duration::from_secs(300),
            market_params_normalize: MarketsNormalize::default(),
            tiers: Vec::new(),
        }
    }
}

impl MarketsConfig {
    pub fn tier_set(&self) -> Result<TierSet> {
        TierSet::new(
            "coingecko_markets",
            self.tiers.iter().map(TierEntry::to_tier).collect(),
        )
    }
}

/// Fields forced to fixed values before fingerprinting and fetching.
/// `None` leaves the caller-supplied value in place.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketsNormalize {
    pub vs_currency: Option<String>,
    pub order: Option<String>,
    pub per_page: Option<u32>,
    pub sparkline: Option<bool>,
    pub price_change_percentage: Option<Vec<String>>,
    pub include_rehypothecated: Option<bool>,
}

impl Default for MarketsNormalize {
    fn default() -> Self {
        Self {
            vs_currency: Some("usd".to_string()),
            order: Some("market_cap_desc".to_string()),
            per_page: Some(250),
            sparkline: Some(false),
            price_change_percentage: None,
            include_rehypothecated: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricesConfig {
    pub chunk_size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub request_delay: Duration,
    pub currencies: Vec<String>,
    #[serde(deserialize_with = "de_duration")]
    pub ttl: Duration,
    pub tiers: Vec<TierEntry>,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            chunk_size: 250,
            request_delay: Duration::from_secs(2),
            currencies: vec!["usd".to_string()],
            ttl: Duration::from_secs(300),
            tiers: Vec::new(),
        }
    }
}

impl PricesConfig {
    pub fn tier_set(&self) -> Result<TierSet> {
        TierSet::new(
            "coingecko_prices",
            self.tiers.iter().map(TierEntry::to_tier).collect(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketChartConfig {
    #[serde(deserialize_with = "de_duration")]
    pub hourly_ttl: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub daily_ttl: Duration,
    /// Chart windows of at least this many days cache under `daily_ttl`.
    pub daily_data_threshold: u32,
    pub try_free_api_first: bool,
}

impl Default for MarketChartConfig {
    fn default() -> Self {
        Self {
            hourly_ttl: Duration::from_secs(1800),
            daily_ttl: Duration::from_secs(12 * 3600),
            daily_data_threshold: 90,
            try_free_api_first: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoinsListConfig {
    #[serde(deserialize_with = "de_duration")]
    pub update_interval: Duration,
    pub supported_platforms: Vec<String>,
}

impl Default for CoinsListConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(3600),
            supported_platforms: vec!["ethereum".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoinsConfig {
    #[serde(deserialize_with = "de_duration")]
    pub update_interval: Duration,
    pub limit: usize,
    pub chunk_size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub request_delay: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub ttl: Duration,
}

impl Default for CoinsConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(1800),
            limit: 500,
            chunk_size: 100,
            request_delay: Duration::from_secs(2),
            ttl: Duration::from_secs(1800),
        }
    }
}

/// One tier entry. The range bounds accept the family-specific key names
/// (`page_from`/`page_to` for markets, `token_from`/`token_to` for prices).
#[derive(Debug, Clone, Deserialize)]
pub struct TierEntry {
    pub name: String,
    #[serde(alias = "page_from", alias = "token_from")]
    pub from: u32,
    #[serde(alias = "page_to", alias = "token_to")]
    pub to: u32,
    #[serde(deserialize_with = "de_duration")]
    pub update_interval: Duration,
    #[serde(default)]
    pub fetch_coinslist_ids: bool,
}

impl TierEntry {
    pub fn to_tier(&self) -> Tier {
        Tier {
            name: self.name.clone(),
            from: self.from,
            to: self.to,
            update_interval: self.update_interval,
            fetch_coinslist_ids: self.fetch_coinslist_ids,
        }
    }
}

/// API tokens file: `{"api_tokens": [...], "demo_api_tokens": [...]}`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiTokens {
    pub api_tokens: Vec<String>,
    pub demo_api_tokens: Vec<String>,
}

impl ApiTokens {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProxyError::Config(format!(
                "cannot read tokens file {:?}: {e}",
                path.as_ref()
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ProxyError::Config(format!("invalid tokens file: {e}")))
    }
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(f64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Seconds(s) if s >= 0.0 => Ok(Duration::from_secs_f64(s)),
        Repr::Seconds(s) => Err(serde::de::Error::custom(format!(
            "negative duration: {s}"
        ))),
        Repr::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {text:?}"))),
    }
}

/// Parses `"30s"`, `"10m"`, `"1h"`, `"500ms"` or a bare number of seconds.
fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (value, scale) = if let Some(v) = text.strip_suffix("ms") {
        (v, 0.001)
    } else if let Some(v) = text.strip_suffix('s') {
        (v, 1.0)
    } else if let Some(v) = text.strip_suffix('m') {
        (v, 60.0)
    } else if let Some(v) = text.strip_suffix('h') {
        (v, 3600.0)
    } else {
        (text, 1.0)
    };
    let value: f64 = value.trim().parse().ok()?;
    (value >= 0.0).then(|| Duration::from_secs_f64(value * scale))
}

/// Listener port: `PORT` env override, default 8080.
pub fn listen_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}
