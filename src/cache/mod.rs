//! Generic key/value cache with a `get_or_load` contract.
//!
//! Keys are opaque strings (request-param fingerprints in practice) and
//! values are opaque byte buffers; only the cache interprets expiry. The
//! trait seam exists so a remote layer could be slotted in behind the same
//! contract; only the in-memory implementation is provided.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{ProxyError, Result};

pub mod memory;

pub use memory::MemoryCache;

pub type KeyValues = HashMap<String, Vec<u8>>;

/// Per-write expiry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Use the cache's configured default expiration.
    Default,
    /// Never expire.
    Never,
    /// Expire after the given duration.
    After(Duration),
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::After(d)
    }
}

/// How completely the cache satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Partial,
    Miss,
}

impl CacheStatus {
    pub fn from_counts(found: usize, requested: usize) -> Self {
        if requested == 0 || found == requested {
            CacheStatus::Hit
        } else if found == 0 {
            CacheStatus::Miss
        } else {
            CacheStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "Hit",
            CacheStatus::Partial => "Partial",
            CacheStatus::Miss => "Miss",
        }
    }
}

/// Fills cache misses. Loaders may return keys that were not asked for;
/// those are cached as well.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, keys: Vec<String>) -> Result<KeyValues>;
}

/// Adapter turning an async closure into a [`Loader`].
pub struct FnLoader<F>(pub F);

impl<F> FnLoader<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<KeyValues>> + Send,
    {
        FnLoader(f)
    }
}

#[async_trait]
impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<KeyValues>> + Send,
{
    async fn load(&self, keys: Vec<String>) -> Result<KeyValues> {
        (self.0)(keys).await
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Looks up `keys`, partitioning them into found values and missing keys.
    /// Entries past their expiry count as missing.
    async fn get(&self, keys: &[String]) -> (KeyValues, Vec<String>);

    /// Writes `entries` with the given expiry policy. Last writer wins.
    async fn set(&self, entries: KeyValues, ttl: Ttl);

    /// Returns cached values for `keys`, invoking `loader` to fill misses.
    ///
    /// With `only_missing` the loader sees only the keys the cache could not
    /// serve and the result is the union of both sides; without it the loader
    /// sees the full request and its output wins, falling back to cached
    /// values for any requested key the loader omitted. Everything the loader
    /// returns is written back, including keys outside the request set. A
    /// loader error propagates as [`ProxyError::LoadFailed`] and leaves the
    /// cache untouched.
    async fn get_or_load(
        &self,
        keys: &[String],
        loader: &dyn Loader,
        only_missing: bool,
        ttl: Ttl,
    ) -> Result<KeyValues> {
        let (mut cached, missing) = self.get(keys).await;
        if missing.is_empty() {
            return Ok(cached);
        }

        let load_keys = if only_missing {
            missing
        } else {
            keys.to_vec()
        };
        let mut loaded = loader
            .load(load_keys)
            .await
            .map_err(|e| ProxyError::LoadFailed(Box::new(e)))?;
        self.set(loaded.clone(), ttl).await;

        let mut result = KeyValues::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = loaded.remove(key) {
                result.insert(key.clone(), value);
            } else if let Some(value) = cached.remove(key) {
                result.insert(key.clone(), value);
            }
        }
        Ok(result)
    }
}
