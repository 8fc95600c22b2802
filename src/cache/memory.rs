//! In-memory TTL cache backing the [`Cache`](super::Cache) trait.
//!
//! Reads take a short read lock and never block on the sweeper; expired
//! entries are treated as missing on lookup and physically removed by a
//! background sweep on `cleanup_interval`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{Cache, KeyValues, Ttl};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

pub struct MemoryCache {
    store: Arc<RwLock<HashMap<String, Entry>>>,
    default_ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    /// `default_ttl` applies to writes with [`Ttl::Default`]; a zero value
    /// means such writes never expire. A zero `cleanup_interval` disables the
    /// background sweep (lookups still honor expiry).
    pub fn new(default_ttl: Duration, cleanup_interval: Duration) -> Self {
        let store: Arc<RwLock<HashMap<String, Entry>>> = Arc::new(RwLock::new(HashMap::new()));

        let sweeper = if cleanup_interval.is_zero() {
            None
        } else {
            let store = store.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(cleanup_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let now = Instant::now();
                    let mut store = store.write();
                    let before = store.len();
                    store.retain(|_, entry| entry.is_live(now));
                    let evicted = before - store.len();
                    drop(store);
                    if evicted > 0 {
                        debug!("cache sweep evicted {} expired entries", evicted);
                    }
                }
            }))
        };

        Self {
            store,
            default_ttl,
            sweeper: Mutex::new(sweeper),
        }
    }

    fn expires_at(&self, ttl: Ttl, now: Instant) -> Option<Instant> {
        match ttl {
            Ttl::Never => None,
            Ttl::After(d) => Some(now + d),
            Ttl::Default => {
                if self.default_ttl.is_zero() {
                    None
                } else {
                    Some(now + self.default_ttl)
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, keys: &[String]) -> (KeyValues, Vec<String>) {
        let now = Instant::now();
        let store = self.store.read();
        let mut found = KeyValues::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match store.get(key) {
                Some(entry) if entry.is_live(now) => {
                    found.insert(key.clone(), entry.value.clone());
                }
                _ => missing.push(key.clone()),
            }
        }
        (found, missing)
    }

    async fn set(&self, entries: KeyValues, ttl: Ttl) {
        let now = Instant::now();
        let expires_at = self.expires_at(ttl, now);
        let mut store = self.store.write();
        for (key, value) in entries {
            store.insert(key, Entry { value, expires_at });
        }
    }
}
