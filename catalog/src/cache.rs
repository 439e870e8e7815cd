//! Value cache with time-to-live and single-flight request coalescing.
//!
//! [`ValueCache::get_or_load`] consults the shared store first. On a miss, concurrent callers
//! asking for the same key in this process share one load instead of each hitting the upstream:
//! the first caller registers a pending entry in the in-flight map before the load starts, later
//! callers join it, and the entry is removed once the load settles whichever way it went.
//!
//! Loads run on their own task, so a caller that gives up waiting (for example because its
//! request was cancelled) only detaches from the load. The load still completes and still
//! populates the store for whoever asks next. Duplicate loads across processes are accepted.

use crate::error::{CatalogError, Result};
use crate::metrics::Metrics;
use crate::store::CacheStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

type Settled<T> = Option<Result<T>>;
type InFlight = Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>;

#[derive(Debug, Clone)]
pub struct ValueCache {
    store: Arc<dyn CacheStore>,
    metrics: Arc<Metrics>,
    in_flight: InFlight,
}

enum Role<T> {
    Join(watch::Receiver<Settled<T>>),
    Lead(watch::Sender<Settled<T>>, watch::Receiver<Settled<T>>),
    /// The key is in flight with a value of another type; load without touching that entry.
    Alone,
}

/// Removes an in-flight entry when dropped, so the map is cleared on success, failure, or panic.
struct InFlightGuard {
    in_flight: InFlight,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ValueCache {
    pub fn new(store: Arc<dyn CacheStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            in_flight: Arc::default(),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Reads and decodes `key`, treating store failures and undecodable entries as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache store read failed; treating as miss");
                self.metrics.record_cache_error();
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value did not decode; treating as miss");
                self.metrics.record_cache_error();
                None
            }
        }
    }

    /// Encodes and writes `value` under `key`. Failures are logged and counted, never returned.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, error = %e, "value did not encode for caching");
                self.metrics.record_cache_error();
                return;
            }
        };
        match self.store.set(key, encoded, ttl).await {
            Ok(()) => {
                tracing::debug!(key, ttl_secs = ttl.as_secs(), "cache store");
                self.metrics.record_cache_store();
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache store write failed");
                self.metrics.record_cache_error();
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    /// Returns the cached value for `key`, or runs `loader` once to produce and cache it.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_or_load_with(key, move |_: &T| ttl, loader).await
    }

    /// Like [`Self::get_or_load`], but the time-to-live is chosen from the loaded value.
    ///
    /// This lets a negative result (say, "no such category") live for a different span than a
    /// positive one under the same key.
    pub async fn get_or_load_with<T, F, Fut, Ttl>(
        &self,
        key: &str,
        ttl_for: Ttl,
        loader: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        Ttl: FnOnce(&T) -> Duration + Send + 'static,
    {
        if let Some(value) = self.get::<T>(key).await {
            tracing::debug!(key, "cache hit");
            self.metrics.record_cache_hit();
            return Ok(value);
        }
        self.metrics.record_cache_miss();

        let role = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(key) {
                Some(pending) => match pending.downcast_ref::<watch::Receiver<Settled<T>>>() {
                    Some(rx) => Role::Join(rx.clone()),
                    None => {
                        tracing::warn!(
                            key,
                            "key is already loading a value of another type; not coalescing"
                        );
                        Role::Alone
                    }
                },
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key.to_string(), Arc::new(rx.clone()));
                    Role::Lead(tx, rx)
                }
            }
        };

        let mut pending = match role {
            Role::Join(rx) => {
                tracing::debug!(key, "cache miss; joining in-flight load");
                self.metrics.record_cache_join();
                rx
            }
            Role::Lead(tx, rx) => {
                tracing::debug!(key, "cache miss; starting load");
                let guard = InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key: key.to_string(),
                };
                self.spawn_load(guard, ttl_for, loader(), tx);
                rx
            }
            Role::Alone => {
                let result = loader().await;
                match &result {
                    Ok(value) => self.set(key, value, ttl_for(value)).await,
                    Err(_) => self.metrics.record_cache_error(),
                }
                return result;
            }
        };

        let settled = pending
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|settled| settled.clone());
        settled.unwrap_or_else(|| {
            Err(CatalogError::LoadAbandoned {
                key: key.to_string(),
            })
        })
    }

    fn spawn_load<T, Fut, Ttl>(
        &self,
        guard: InFlightGuard,
        ttl_for: Ttl,
        load: Fut,
        tx: watch::Sender<Settled<T>>,
    ) where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        Ttl: FnOnce(&T) -> Duration + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            let result = load.await;
            match &result {
                Ok(value) => cache.set(&guard.key, value, ttl_for(value)).await,
                Err(e) => {
                    tracing::debug!(key = %guard.key, error = %e, "load failed");
                    cache.metrics.record_cache_error();
                }
            }
            // clear the in-flight entry before waking waiters so a retry after failure starts fresh
            drop(guard);
            let _ = tx.send(Some(result));
        });
    }
}
