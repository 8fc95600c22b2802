//! Request parameters and cache-key fingerprints.
//!
//! A fingerprint is a canonical serialization of normalized params; it is
//! both the cache key and, transitively, the upstream request identity. Two
//! requests that would fetch the same upstream URL share one cache entry.

use crate::config::MarketsNormalize;

pub const DEFAULT_ORDER: &str = "market_cap_desc";
pub const DEFAULT_PER_PAGE: u32 = 250;
pub const MAX_PER_PAGE: u32 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketsParams {
    pub vs_currency: String,
    pub order: String,
    pub per_page: u32,
    pub page: u32,
    pub category: Option<String>,
    pub ids: Vec<String>,
    pub sparkline: bool,
    pub price_change_percentage: Vec<String>,
    pub include_rehypothecated: bool,
}

impl Default for MarketsParams {
    fn default() -> Self {
        Self {
            vs_currency: "usd".to_string(),
            order: DEFAULT_ORDER.to_string(),
            per_page: DEFAULT_PER_PAGE,
            page: 1,
            category: None,
            ids: Vec::new(),
            sparkline: false,
            price_change_percentage: Vec::new(),
            include_rehypothecated: false,
        }
    }
}

impl MarketsParams {
    /// Applies the configured overrides and canonicalizes collection fields.
    /// Two semantically equivalent requests normalize to identical values.
    pub fn normalize(mut self, overrides: &MarketsNormalize) -> Self {
        if let Some(vs_currency) = &overrides.vs_currency {
            self.vs_currency = vs_currency.clone();
        }
        if let Some(order) = &overrides.order {
            self.order = order.clone();
        }
        if let Some(per_page) = overrides.per_page {
            self.per_page = per_page;
        }
        if let Some(sparkline) = overrides.sparkline {
            self.sparkline = sparkline;
        }
        if let Some(pcp) = &overrides.price_change_percentage {
            self.price_change_percentage = pcp.clone();
        }
        if let Some(include) = overrides.include_rehypothecated {
            self.include_rehypothecated = include;
        }

        self.vs_currency = self.vs_currency.to_lowercase();
        self.per_page = self.per_page.min(MAX_PER_PAGE);
        self.page = self.page.max(1);
        self.ids = canonical_list(std::mem::take(&mut self.ids));
        self.price_change_percentage =
            canonical_list(std::mem::take(&mut self.price_change_percentage));
        self
    }

    /// Deterministic cache key over all normalized fields.
    pub fn fingerprint(&self) -> String {
        format!(
            "coingecko:markets:vs_currency={}&order={}&per_page={}&page={}&category={}&ids={}&sparkline={}&price_change_percentage={}&include_rehypothecated={}",
            self.vs_currency,
            self.order,
            self.per_page,
            self.page,
            self.category.as_deref().unwrap_or(""),
            self.ids.join(","),
            self.sparkline,
            self.price_change_percentage.join(","),
            self.include_rehypothecated,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceParams {
    pub ids: Vec<String>,
    pub currencies: Vec<String>,
    pub include_market_cap: bool,
    pub include_24hr_vol: bool,
    pub include_24hr_change: bool,
    pub include_last_updated_at: bool,
    pub precision: Option<String>,
}

impl Default for PriceParams {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            currencies: vec!["usd".to_string()],
            include_market_cap: true,
            include_24hr_vol: true,
            include_24hr_change: true,
            include_last_updated_at: true,
            precision: None,
        }
    }
}

impl PriceParams {
    pub fn new(ids: Vec<String>, currencies: Vec<String>) -> Self {
        Self {
            ids,
            currencies,
            ..Self::default()
        }
    }

    /// Canonicalizes ids and currencies and widens the include flags so that
    /// cached slices are supersets of any caller's selection.
    pub fn normalize(mut self) -> Self {
        self.ids = canonical_list(std::mem::take(&mut self.ids));
        self.currencies = canonical_list(
            std::mem::take(&mut self.currencies)
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
        );
        self.include_market_cap = true;
        self.include_24hr_vol = true;
        self.include_24hr_change = true;
        self.include_last_updated_at = true;
        self.precision = None;
        self
    }

    /// One cache key per (id, currency) pair, so chunked fetches produce
    /// per-token cacheable slices.
    pub fn fingerprints(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.ids.len() * self.currencies.len());
        for id in &self.ids {
            for currency in &self.currencies {
                keys.push(price_fingerprint(id, currency));
            }
        }
        keys
    }
}

pub fn price_fingerprint(id: &str, currency: &str) -> String {
    format!("coingecko:price:{}:{}", id, currency.to_lowercase())
}

/// Splits a per-(id,currency) fingerprint back into its parts.
pub fn split_price_fingerprint(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("coingecko:price:")?;
    rest.split_once(':')
}

pub fn coin_detail_fingerprint(id: &str) -> String {
    format!("coingecko:coin:{id}")
}

pub fn market_chart_fingerprint(id: &str, vs_currency: &str, days: &str, interval: Option<&str>) -> String {
    format!(
        "coingecko:market_chart:{}:{}:{}:{}",
        id,
        vs_currency.to_lowercase(),
        days,
        interval.unwrap_or("")
    )
}

pub fn asset_platforms_fingerprint(filter: Option<&str>) -> String {
    format!("coingecko:asset_platforms:{}", filter.unwrap_or(""))
}

fn canonical_list(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items.dedup();
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> MarketsNormalize {
        MarketsNormalize {
            vs_currency: Some("usd".to_string()),
            order: Some(DEFAULT_ORDER.to_string()),
            per_page: Some(250),
            sparkline: Some(false),
            price_change_percentage: None,
            include_rehypothecated: None,
        }
    }

    #[test]
    fn test_overridden_fields_produce_equal_fingerprints() {
        let a = MarketsParams {
            vs_currency: "eur".to_string(),
            per_page: 10,
            sparkline: true,
            ..Default::default()
        }
        .normalize(&overrides());

        let b = MarketsParams::default().normalize(&overrides());

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_non_overridden_fields_distinguish_fingerprints() {
        let a = MarketsParams {
            page: 1,
            ..Default::default()
        }
        .normalize(&overrides());
        let b = MarketsParams {
            page: 2,
            ..Default::default()
        }
        .normalize(&overrides());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_id_order_does_not_matter() {
        let a = MarketsParams {
            ids: vec!["ethereum".to_string(), "bitcoin".to_string()],
            ..Default::default()
        }
        .normalize(&overrides());
        let b = MarketsParams {
            ids: vec!["bitcoin".to_string(), "ethereum".to_string(), "bitcoin".to_string()],
            ..Default::default()
        }
        .normalize(&overrides());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_per_page_clamped_to_upstream_max() {
        let no_override = MarketsNormalize {
            vs_currency: None,
            order: None,
            per_page: None,
            sparkline: None,
            price_change_percentage: None,
            include_rehypothecated: None,
        };
        let params = MarketsParams {
            per_page: 1000,
            ..Default::default()
        }
        .normalize(&no_override);
        assert_eq!(params.per_page, MAX_PER_PAGE);
    }

    #[test]
    fn test_price_fingerprints_per_id_and_currency() {
        let params = PriceParams::new(
            vec!["bitcoin".to_string(), "ethereum".to_string()],
            vec!["USD".to_string(), "eur".to_string()],
        )
        .normalize();

        let keys = params.fingerprints();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&"coingecko:price:bitcoin:usd".to_string()));
        assert!(keys.contains(&"coingecko:price:ethereum:eur".to_string()));
    }

    #[test]
    fn test_price_normalize_widens_flags() {
        let params = PriceParams {
            ids: vec!["bitcoin".to_string()],
            currencies: vec!["usd".to_string()],
            include_market_cap: false,
            include_24hr_vol: false,
            include_24hr_change: false,
            include_last_updated_at: false,
            precision: Some("2".to_string()),
        }
        .normalize();

        assert!(params.include_market_cap);
        assert!(params.include_last_updated_at);
        assert_eq!(params.precision, None);
    }

    #[test]
    fn test_split_price_fingerprint() {
        let key = price_fingerprint("bitcoin", "usd");
        assert_eq!(split_price_fingerprint(&key), Some(("bitcoin", "usd")));
        assert_eq!(split_price_fingerprint("coingecko:markets:x"), None);
    }
}
