//! Upstream URL composition per endpoint family.
//!
//! The base URL depends on the key kind (Pro keys talk to the pro host) and
//! the key itself rides along as a query parameter.

use url::Url;

use super::keys::{ApiKey, KeyKind};
use super::params::{MarketsParams, PriceParams};
use crate::errors::{ProxyError, Result};

pub const PRO_BASE_URL: &str = "https://pro-api.coingecko.com";
pub const PUBLIC_BASE_URL: &str = "https://api.coingecko.com";

const PRO_KEY_PARAM: &str = "x_cg_pro_api_key";
const DEMO_KEY_PARAM: &str = "x_cg_demo_api_key";

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    pro_base: String,
    public_base: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            pro_base: PRO_BASE_URL.to_string(),
            public_base: PUBLIC_BASE_URL.to_string(),
        }
    }

    /// Points both hosts at a custom base, used by tests and the
    /// free-api-first path of the market-chart service.
    pub fn with_base_urls(pro_base: impl Into<String>, public_base: impl Into<String>) -> Self {
        Self {
            pro_base: pro_base.into(),
            public_base: public_base.into(),
        }
    }

    fn base_for(&self, kind: KeyKind) -> &str {
        match kind {
            KeyKind::Pro => &self.pro_base,
            KeyKind::Demo | KeyKind::None => &self.public_base,
        }
    }

    fn url(&self, key: &ApiKey, path: &str) -> Result<Url> {
        let mut url = Url::parse(self.base_for(key.kind))
            .and_then(|base| base.join(path))
            .map_err(|e| ProxyError::Config(format!("invalid upstream URL: {e}")))?;
        match key.kind {
            KeyKind::Pro => {
                url.query_pairs_mut()
                    .append_pair(PRO_KEY_PARAM, &key.secret);
            }
            KeyKind::Demo => {
                url.query_pairs_mut()
                    .append_pair(DEMO_KEY_PARAM, &key.secret);
            }
            KeyKind::None => {}
        }
        Ok(url)
    }

    pub fn markets(&self, key: &ApiKey, params: &MarketsParams) -> Result<Url> {
        let mut url = self.url(key, "/api/v3/coins/markets")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("vs_currency", &params.vs_currency);
            query.append_pair("order", &params.order);
            query.append_pair("per_page", &params.per_page.to_string());
            query.append_pair("page", &params.page.to_string());
            if let Some(category) = &params.category {
                query.append_pair("category", category);
            }
            if !params.ids.is_empty() {
                query.append_pair("ids", &params.ids.join(","));
            }
            query.append_pair("sparkline", bool_str(params.sparkline));
            if !params.price_change_percentage.is_empty() {
                query.append_pair(
                    "price_change_percentage",
                    &params.price_change_percentage.join(","),
                );
            }
            if params.include_rehypothecated {
                query.append_pair("include_rehypothecated", "true");
            }
        }
        Ok(url)
    }

    pub fn simple_price(&self, key: &ApiKey, params: &PriceParams) -> Result<Url> {
        let mut url = self.url(key, "/api/v3/simple/price")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ids", &params.ids.join(","));
            query.append_pair("vs_currencies", &params.currencies.join(","));
            query.append_pair(
                "include_market_cap",
                bool_str(params.include_market_cap),
            );
            query.append_pair("include_24hr_vol", bool_str(params.include_24hr_vol));
            query.append_pair(
                "include_24hr_change",
                bool_str(params.include_24hr_change),
            );
            query.append_pair(
                "include_last_updated_at",
                bool_str(params.include_last_updated_at),
            );
            if let Some(precision) = &params.precision {
                query.append_pair("precision", precision);
            }
        }
        Ok(url)
    }

    pub fn coins_list(&self, key: &ApiKey) -> Result<Url> {
        let mut url = self.url(key, "/api/v3/coins/list")?;
        url.query_pairs_mut()
            .append_pair("include_platform", "true");
        Ok(url)
    }

    pub fn asset_platforms(&self, key: &ApiKey, filter: Option<&str>) -> Result<Url> {
        let mut url = self.url(key, "/api/v3/asset_platforms")?;
        if let Some(filter) = filter {
            url.query_pairs_mut().append_pair("filter", filter);
        }
        Ok(url)
    }

    pub fn market_chart(
        &self,
        key: &ApiKey,
        id: &str,
        vs_currency: &str,
        days: &str,
        interval: Option<&str>,
        data_filter: Option<&str>,
    ) -> Result<Url> {
        let mut url = self.url(key, &format!("/api/v3/coins/{id}/market_chart"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("vs_currency", vs_currency);
            query.append_pair("days", days);
            if let Some(interval) = interval {
                query.append_pair("interval", interval);
            }
            if let Some(data_filter) = data_filter {
                query.append_pair("data_filter", data_filter);
            }
        }
        Ok(url)
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
