//! Process-scoped counters for cache behaviour, upstream usage, and quota cooling.
//!
//! A [`Metrics`] instance is created once and handed by `Arc` to everything that records into
//! it, so tests can inject a fresh one instead of sharing ambient global state.

use jiff::Timestamp;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    joins: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug)]
pub struct Metrics {
    cache: CacheCounters,
    quota_cooling_events: AtomicU64,
    data_api_calls: Mutex<BTreeMap<&'static str, u64>>,
    last_reset: Mutex<Timestamp>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache: CacheCounters::default(),
            quota_cooling_events: AtomicU64::new(0),
            data_api_calls: Mutex::new(BTreeMap::new()),
            last_reset: Mutex::new(Timestamp::now()),
        }
    }

    pub fn record_data_api_call(&self, endpoint: &'static str) {
        let mut calls = self
            .data_api_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *calls.entry(endpoint).or_default() += 1;
    }

    pub fn record_cache_hit(&self) {
        self.cache.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_store(&self) {
        self.cache.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_join(&self) {
        self.cache.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quota_cooling_event(&self) {
        self.quota_cooling_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of upstream calls made against `endpoint` since the last reset.
    pub fn data_api_calls(&self, endpoint: &str) -> u64 {
        self.data_api_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Total upstream calls across all endpoints since the last reset.
    pub fn total_data_api_calls(&self) -> u64 {
        self.data_api_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    pub fn reset(&self) {
        self.data_api_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for counter in [
            &self.cache.hits,
            &self.cache.misses,
            &self.cache.stores,
            &self.cache.joins,
            &self.cache.errors,
            &self.quota_cooling_events,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_reset.lock().unwrap_or_else(PoisonError::into_inner) = Timestamp::now();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generated_at: Timestamp::now(),
            last_reset: *self.last_reset.lock().unwrap_or_else(PoisonError::into_inner),
            data_api_calls: self
                .data_api_calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(endpoint, calls)| (endpoint.to_string(), *calls))
                .collect(),
            cache: CacheSnapshot {
                hits: self.cache.hits.load(Ordering::Relaxed),
                misses: self.cache.misses.load(Ordering::Relaxed),
                stores: self.cache.stores.load(Ordering::Relaxed),
                joins: self.cache.joins.load(Ordering::Relaxed),
                errors: self.cache.errors.load(Ordering::Relaxed),
            },
            quota: QuotaSnapshot {
                cooling_events: self.quota_cooling_events.load(Ordering::Relaxed),
            },
        }
    }
}

/// Point-in-time copy of all counters, suitable for an admin usage view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub generated_at: Timestamp,
    pub last_reset: Timestamp,
    pub data_api_calls: BTreeMap<String, u64>,
    pub cache: CacheSnapshot,
    pub quota: QuotaSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub joins: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub cooling_events: u64,
}
