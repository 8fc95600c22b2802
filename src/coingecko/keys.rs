//! API key pool with per-key exponential cool-down.
//!
//! Selection prefers Pro over Demo over anonymous, preserving insertion
//! order within a kind. Eligibility is a pure function of an explicit
//! `not_before` instant per key, so the manager is testable without real
//! time.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    Pro,
    Demo,
    None,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Pro => "pro",
            KeyKind::Demo => "demo",
            KeyKind::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub secret: String,
    pub kind: KeyKind,
}

impl ApiKey {
    pub fn anonymous() -> Self {
        Self {
            secret: String::new(),
            kind: KeyKind::None,
        }
    }
}

struct KeyBackoff {
    failure_count: u32,
    not_before: Instant,
}

pub struct KeyManager {
    /// Pro keys, then Demo keys, then the anonymous pseudo-key.
    keys: Vec<ApiKey>,
    backoff: Mutex<HashMap<String, KeyBackoff>>,
    backoff_base: Duration,
    backoff_exponent_cap: u32,
    metrics: Metrics,
}

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);
const DEFAULT_EXPONENT_CAP: u32 = 6;

impl KeyManager {
    pub fn new(pro: Vec<String>, demo: Vec<String>, metrics: Metrics) -> Self {
        let mut keys: Vec<ApiKey> = Vec::with_capacity(pro.len() + demo.len() + 1);
        keys.extend(pro.into_iter().map(|secret| ApiKey {
            secret,
            kind: KeyKind::Pro,
        }));
        keys.extend(demo.into_iter().map(|secret| ApiKey {
            secret,
            kind: KeyKind::Demo,
        }));
        keys.push(ApiKey::anonymous());

        Self {
            keys,
            backoff: Mutex::new(HashMap::new()),
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_exponent_cap: DEFAULT_EXPONENT_CAP,
            metrics,
        }
    }

    pub fn with_backoff(mut self, base: Duration, exponent_cap: u32) -> Self {
        self.backoff_base = base;
        self.backoff_exponent_cap = exponent_cap;
        self
    }

    /// Eligible keys ordered Pro, Demo, None, preserving insertion order
    /// within a kind. When every key is cooling down, the anonymous
    /// pseudo-key is returned alone so unauthenticated attempts still
    /// proceed.
    pub fn available_keys(&self) -> Vec<ApiKey> {
        self.available_keys_at(Instant::now())
    }

    pub fn available_keys_at(&self, now: Instant) -> Vec<ApiKey> {
        let backoff = self.backoff.lock();
        let eligible: Vec<ApiKey> = self
            .keys
            .iter()
            .filter(|key| {
                backoff
                    .get(&key.secret)
                    .map(|b| now >= b.not_before)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if eligible.is_empty() {
            warn!("all API keys are cooling down, falling back to anonymous access");
            return vec![ApiKey::anonymous()];
        }
        eligible
    }

    /// Records a failure: schedules the key's next eligibility at
    /// `now + base * 2^min(failures, cap)` with up to 20% extra jitter.
    pub fn mark_failed(&self, key: &ApiKey) {
        self.mark_failed_at(key, Instant::now());
    }

    pub fn mark_failed_at(&self, key: &ApiKey, now: Instant) {
        let mut backoff = self.backoff.lock();
        let entry = backoff.entry(key.secret.clone()).or_insert(KeyBackoff {
            failure_count: 0,
            not_before: now,
        });
        let exponent = entry.failure_count.min(self.backoff_exponent_cap);
        let cooldown = self.backoff_base * 2u32.pow(exponent);
        let jitter = cooldown.mul_f64(rand::rng().random_range(0.0..0.2));
        entry.failure_count += 1;
        entry.not_before = now + cooldown + jitter;

        self.metrics.observe_key_failure(key.kind.as_str());
        debug!(
            "API key ({}) marked failed, cooling down for ~{:?} (failure #{})",
            key.kind.as_str(),
            cooldown,
            entry.failure_count
        );
    }

    /// Resets the key's backoff; it becomes eligible immediately.
    pub fn mark_success(&self, key: &ApiKey) {
        self.backoff.lock().remove(&key.secret);
    }
}
