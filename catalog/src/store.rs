//! The raw key-value store underneath every cache in this crate.
//!
//! Values are opaque strings (JSON produced by the layers above) with a per-entry time-to-live.
//! The store is assumed to be shared across processes and has no transactional semantics: the
//! last writer wins.

use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process store with lazy expiry; used when no shared store is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Shared store backed by the Upstash Redis REST API.
#[derive(Clone)]
pub struct UpstashStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

// the bearer token stays out of logs
impl fmt::Debug for UpstashStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstashStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, serde::Deserialize)]
struct UpstashResult {
    result: Option<String>,
}

impl UpstashStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    fn url(&self, command: &str, key: &str) -> String {
        // byte_serialize form-encodes spaces, which a path segment would read literally
        let key = form_urlencoded::byte_serialize(key.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        format!("{}/{command}/{key}", self.base_url)
    }
}

#[async_trait]
impl CacheStore for UpstashStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url("get", key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(CatalogError::store)?;
        if !response.status().is_success() {
            tracing::debug!(key, status = %response.status(), "shared store get treated as miss");
            return Ok(None);
        }
        let body: UpstashResult = response.json().await.map_err(CatalogError::store)?;
        Ok(body.result)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let body = serde_json::json!({ "value": value, "ex": ttl.as_secs().max(1) });
        let response = self
            .client
            .post(self.url("set", key))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(CatalogError::store)?;
        if !response.status().is_success() {
            return Err(CatalogError::store(format!(
                "set {key} failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("del", key))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(CatalogError::store)?;
        if !response.status().is_success() {
            return Err(CatalogError::store(format!(
                "delete {key} failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
