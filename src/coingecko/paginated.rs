//! Page-by-page fetching with inter-request throttling.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;

/// Fetches ⌈limit / per_page⌉ pages sequentially, sleeping `request_delay`
/// between consecutive submissions (not before the first, not after the
/// last), and returns the concatenated rows truncated to `limit`. Any page
/// failure fails the whole fetch.
pub async fn fetch_paginated<F, Fut>(
    limit: usize,
    per_page: usize,
    request_delay: Duration,
    fetch_page: F,
) -> Result<Vec<Value>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Vec<Value>>>,
{
    if limit == 0 || per_page == 0 {
        return Ok(Vec::new());
    }

    let page_count = limit.div_ceil(per_page) as u32;
    let mut rows = Vec::with_capacity(limit);

    for page in 1..=page_count {
        if page > 1 && !request_delay.is_zero() {
            tokio::time::sleep(request_delay).await;
        }
        let page_rows = fetch_page(page).await?;
        let received = page_rows.len();
        rows.extend(page_rows);
        debug!("fetched page {}/{} ({} rows)", page, page_count, received);
        // Upstream signalled the end of the listing early.
        if received < per_page {
            break;
        }
    }

    rows.truncate(limit);
    Ok(rows)
}
