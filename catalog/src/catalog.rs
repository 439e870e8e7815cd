//! The caller-facing catalog service.
//!
//! [`Catalog`] ties the upstream client, the value cache, and the configuration together and
//! exposes the operations a request handler needs. Every list operation clamps its caller input,
//! derives a cache key from the clamped values, and runs the underlying aggregation at most once
//! per key across concurrent callers in this process.

use crate::aggregate::{Page, QueryShape};
use crate::cache::ValueCache;
use crate::config::CatalogConfig;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::store::{CacheStore, MemoryStore, UpstashStore};
use crate::video::NormalizedVideo;
use crate::youtube_api::YouTubeClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Region used when a caller does not name one.
pub const DEFAULT_REGION: &str = "US";

/// Paging knobs shared by the list operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Cursor returned as `next_page_token` by a previous call.
    pub page_token: Option<String>,
    /// Desired number of items; clamped to the configured bounds.
    pub target_size: Option<usize>,
    /// Items this long or shorter are excluded; raised to the configured floor.
    pub min_duration_secs: Option<u64>,
}

/// Input for [`Catalog::global_most_popular`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalRequest {
    pub target_size: Option<usize>,
    pub min_duration_secs: Option<u64>,
    /// Human category name, resolved per region.
    pub category_title: Option<String>,
    /// Category id, used as-is in every region. Takes precedence over `category_title`.
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub(crate) config: Arc<CatalogConfig>,
    pub(crate) client: YouTubeClient,
    pub(crate) cache: ValueCache,
}

impl Catalog {
    pub fn new(config: CatalogConfig, store: Arc<dyn CacheStore>) -> Self {
        Self::with_http_client(config, store, reqwest::Client::new())
    }

    pub fn with_http_client(
        config: CatalogConfig,
        store: Arc<dyn CacheStore>,
        http: reqwest::Client,
    ) -> Self {
        let cache = ValueCache::new(store, Arc::new(Metrics::new()));
        let client = YouTubeClient::new(&config, http, cache.clone());
        Self {
            config: Arc::new(config),
            client,
            cache,
        }
    }

    /// Configuration from the environment, backed by Upstash when `UPSTASH_REDIS_REST_URL` and
    /// `UPSTASH_REDIS_REST_TOKEN` are both set and by an in-process store otherwise.
    pub fn from_env() -> Self {
        let config = CatalogConfig::from_env();
        let http = reqwest::Client::new();
        let upstash = std::env::var("UPSTASH_REDIS_REST_URL")
            .ok()
            .zip(std::env::var("UPSTASH_REDIS_REST_TOKEN").ok())
            .filter(|(url, token)| !url.is_empty() && !token.is_empty());
        let store: Arc<dyn CacheStore> = match upstash {
            Some((url, token)) => {
                tracing::info!(%url, "using shared Upstash store");
                Arc::new(UpstashStore::new(url, token, http.clone()))
            }
            None => {
                tracing::info!("using in-process store");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_http_client(config, store, http)
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.cache.metrics()
    }

    /// Counters for an admin usage view.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics().snapshot()
    }

    /// A single video with its channel avatar, or `None` if the upstream has no such video.
    #[instrument(skip(self))]
    pub async fn get_video(&self, id: &str) -> Result<Option<NormalizedVideo>> {
        let this = self.clone();
        let id = id.trim().to_string();
        let key = format!("video:{}", key_part(&id));
        self.cache
            .get_or_load(&key, self.config.value_ttl, move || async move {
                let mut videos = this.fetch_videos(std::slice::from_ref(&id)).await?;
                this.hydrate_avatars(&mut videos).await;
                Ok(videos.pop())
            })
            .await
    }

    /// Keyword search, `region` biasing results towards one country.
    #[instrument(skip(self, request))]
    pub async fn search(
        &self,
        query: &str,
        region: Option<&str>,
        request: &PageRequest,
    ) -> Result<Page> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Page::default());
        }
        let target = self.config.clamp_target(request.target_size);
        let threshold = self.config.clamp_threshold(request.min_duration_secs);
        let region = region.map(normalize_region).filter(|r| !r.is_empty());
        let key = search_key(
            query,
            region.as_deref(),
            request.page_token.as_deref(),
            target,
            threshold,
        );
        let shape = QueryShape::Search {
            query: query.to_string(),
            region,
        };
        self.cached_aggregate(key, shape, target, threshold, request.page_token.clone())
            .await
    }

    /// The region's `mostPopular` chart, optionally restricted to one category.
    #[instrument(skip(self, request))]
    pub async fn most_popular(
        &self,
        region: &str,
        category_id: Option<&str>,
        request: &PageRequest,
    ) -> Result<Page> {
        let target = self.config.clamp_target(request.target_size);
        let threshold = self.config.clamp_threshold(request.min_duration_secs);
        self.popular_page(
            &normalize_region(region),
            category_id,
            target,
            threshold,
            request.page_token.as_deref(),
        )
        .await
    }

    /// Videos related to `video_id`.
    #[instrument(skip(self, request))]
    pub async fn related(&self, video_id: &str, request: &PageRequest) -> Result<Page> {
        let target = self.config.clamp_target(request.target_size);
        let threshold = self.config.clamp_threshold(request.min_duration_secs);
        let video_id = video_id.trim();
        let key = format!(
            "related:{}:{}:{target}:{threshold}",
            key_part(video_id),
            optional_part(request.page_token.as_deref(), "root"),
        );
        let shape = QueryShape::Related {
            video_id: video_id.to_string(),
        };
        self.cached_aggregate(key, shape, target, threshold, request.page_token.clone())
            .await
    }

    /// A worldwide approximation of the popular chart, merged across the configured regions.
    #[instrument(skip(self))]
    pub async fn global_most_popular(&self, request: &GlobalRequest) -> Result<Page> {
        let target = self.config.clamp_target(request.target_size);
        let threshold = self.config.clamp_threshold(request.min_duration_secs);
        let category_id = request
            .category_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let category_title = request
            .category_title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string);
        let filter = match (&category_id, &category_title) {
            (Some(id), _) => format!("id={}", key_part(id)),
            (None, Some(title)) => format!(
                "title={}",
                key_part(&crate::category::category_slug(title))
            ),
            (None, None) => "all".to_string(),
        };
        let key = format!("global:{filter}:{threshold}:{target}");

        let this = self.clone();
        self.cache
            .get_or_load(&key, self.config.value_ttl, move || async move {
                let items = this
                    .aggregate_global(
                        target,
                        threshold,
                        category_title.as_deref(),
                        category_id.as_deref(),
                    )
                    .await?;
                Ok(Page {
                    items,
                    next_page_token: None,
                })
            })
            .await
    }

    /// Regions the upstream serves, as `{code, name}` pairs.
    #[instrument(skip(self))]
    pub async fn regions(&self) -> Result<Vec<Region>> {
        let client = self.client.clone();
        self.cache
            .get_or_load("regions", self.config.regions_ttl, move || async move {
                let regions = client.list_regions().await?;
                Ok(regions
                    .into_iter()
                    .map(|region| Region {
                        code: region.snippet.gl,
                        name: region.snippet.name,
                    })
                    .collect::<Vec<_>>())
            })
            .await
    }

    /// The popular-chart page for already clamped input, through the value cache.
    pub(crate) async fn popular_page(
        &self,
        region: &str,
        category_id: Option<&str>,
        target: usize,
        threshold: u64,
        page_token: Option<&str>,
    ) -> Result<Page> {
        let key = popular_key(region, category_id, threshold, target, page_token);
        let shape = QueryShape::MostPopular {
            region: region.to_string(),
            category_id: category_id.map(str::to_string),
        };
        self.cached_aggregate(key, shape, target, threshold, page_token.map(str::to_string))
            .await
    }

    async fn cached_aggregate(
        &self,
        key: String,
        shape: QueryShape,
        target: usize,
        threshold: u64,
        cursor: Option<String>,
    ) -> Result<Page> {
        let this = self.clone();
        self.cache
            .get_or_load(&key, self.config.value_ttl, move || async move {
                this.aggregate(&shape, target, threshold, cursor.as_deref())
                    .await
            })
            .await
    }
}

pub(crate) fn normalize_region(region: &str) -> String {
    region.trim().to_ascii_uppercase()
}

/// Escapes one caller-supplied component of a cache key, so `:` and `,` only ever separate.
pub(crate) fn key_part(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// An optional key component. Present values are marked with `@`, which escaping never
/// produces, so they cannot collide with the `absent` placeholder.
pub(crate) fn optional_part(value: Option<&str>, absent: &str) -> String {
    match value {
        Some(value) => format!("@{}", key_part(value)),
        None => absent.to_string(),
    }
}

pub(crate) fn search_key(
    query: &str,
    region: Option<&str>,
    page_token: Option<&str>,
    target: usize,
    threshold: u64,
) -> String {
    format!(
        "search:{}:{}:{}:{target}:{threshold}",
        key_part(query),
        optional_part(page_token, "root"),
        region.map(key_part).unwrap_or_default(),
    )
}

pub(crate) fn popular_key(
    region: &str,
    category_id: Option<&str>,
    threshold: u64,
    target: usize,
    page_token: Option<&str>,
) -> String {
    format!(
        "popular:{}:{}:{threshold}:{target}:{}",
        key_part(region),
        optional_part(category_id, "all"),
        optional_part(page_token, "root"),
    )
}
