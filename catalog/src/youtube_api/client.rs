//! Quota-aware YouTube Data API client with retry and conditional revalidation.

use crate::cache::ValueCache;
use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::metrics::Metrics;
use crate::youtube_api::{
    categories::{VideoCategory, VideoCategoryListResponse},
    channels::{Channel, ChannelListResponse},
    playlists::PlaylistItemListResponse,
    regions::{I18nRegion, I18nRegionListResponse},
    search::SearchListResponse,
    types::ErrorResponse,
    videos::{Video, VideoListResponse},
};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Maximum ids accepted by the batch `list` endpoints in one call.
pub const MAX_IDS_PER_CALL: usize = 50;

/// Error reason the API uses when the daily quota is spent.
const QUOTA_EXCEEDED_REASON: &str = "quotaExceeded";

/// The upstream endpoints this crate talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Videos,
    Search,
    Channels,
    PlaylistItems,
    VideoCategories,
    I18nRegions,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Videos => "videos",
            Endpoint::Search => "search",
            Endpoint::Channels => "channels",
            Endpoint::PlaylistItems => "playlistItems",
            Endpoint::VideoCategories => "videoCategories",
            Endpoint::I18nRegions => "i18nRegions",
        }
    }
}

/// A previously fetched response body and the validator it was served with.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEntry {
    payload: String,
    etag: Option<String>,
}

enum Reply {
    Fresh { body: String, etag: Option<String> },
    NotModified,
}

/// Canonical form of a request: the endpoint plus its query parameters in sorted order,
/// with the credential stripped. Used for raw cache keys and logs.
pub fn request_signature(endpoint: Endpoint, params: &BTreeMap<&str, &str>) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    format!("{}?{}", endpoint.path(), query)
}

/// Client for the read-only parts of the YouTube Data API v3 used by the catalog.
///
/// Every call is metered against the project's quota, so the client never retries a
/// quota rejection, retries server and transport failures a bounded number of times with linear
/// backoff, and can revalidate previously seen responses with `If-None-Match` so unchanged
/// resources are not transferred again.
#[derive(Clone)]
pub struct YouTubeClient {
    api_key: Option<Arc<str>>,
    api_base: String,
    /// HTTP client for API requests
    client: reqwest::Client,
    /// Holds raw response bodies for revalidation.
    raw: ValueCache,
    metrics: Arc<Metrics>,
    raw_ttl: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    page_size: u32,
}

// the credential must never end up in logs
impl fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("api_base", &self.api_base)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl YouTubeClient {
    pub fn new(config: &CatalogConfig, client: reqwest::Client, raw: ValueCache) -> Self {
        Self {
            api_key: config.api_key.as_deref().map(Arc::from),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
            metrics: Arc::clone(raw.metrics()),
            raw,
            raw_ttl: config.raw_ttl,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay,
            page_size: config.upstream_page_size,
        }
    }

    /// Fetches `endpoint` with `params` and decodes the body as `T`.
    ///
    /// With `revalidate`, the raw body is kept under the request's signature and later calls
    /// present its `ETag`; a `304 Not Modified` answer is served from the kept body.
    #[instrument(skip(self, params), fields(endpoint = endpoint.path()))]
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &[(&str, &str)],
        revalidate: bool,
    ) -> Result<T> {
        let body = self.fetch_raw(endpoint, params, revalidate).await?;
        serde_json::from_str(&body).map_err(|e| CatalogError::Decode {
            endpoint: endpoint.path(),
            message: e.to_string(),
        })
    }

    async fn fetch_raw(
        &self,
        endpoint: Endpoint,
        params: &[(&str, &str)],
        revalidate: bool,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CatalogError::Configuration("YT_API_KEY is not configured".into()))?;

        let params: BTreeMap<&str, &str> = params
            .iter()
            .copied()
            .filter(|(k, _)| *k != "key")
            .collect();
        let signature = request_signature(endpoint, &params);
        let raw_key = format!("raw:{signature}");

        // the kept body is read before sending, so it cannot expire between the request and a 304
        let mut cached: Option<RawEntry> = if revalidate {
            self.raw.get(&raw_key).await
        } else {
            None
        };
        let etag = cached.as_ref().and_then(|entry| entry.etag.clone());
        let mut attempt = 1;

        loop {
            match self
                .send_once(endpoint, &params, api_key, etag.as_deref())
                .await
            {
                Ok(Reply::Fresh { body, etag: new_etag }) => {
                    tracing::debug!(signature, attempt, "fetched");
                    if revalidate {
                        let entry = RawEntry {
                            payload: body.clone(),
                            etag: new_etag,
                        };
                        self.raw.set(&raw_key, &entry, self.raw_ttl).await;
                    }
                    return Ok(body);
                }
                Ok(Reply::NotModified) => match cached.take() {
                    Some(entry) => {
                        tracing::trace!(signature, "not modified; serving kept body");
                        // refresh the lifetime of a body that was just confirmed current
                        self.raw.set(&raw_key, &entry, self.raw_ttl).await;
                        return Ok(entry.payload);
                    }
                    None => {
                        return Err(CatalogError::upstream(
                            Some(StatusCode::NOT_MODIFIED.as_u16()),
                            "not modified without a validator",
                        ));
                    }
                },
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay = self.retry_delay * attempt;
                    tracing::warn!(signature, attempt, ?delay, error = %e, "retrying upstream call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        endpoint: Endpoint,
        params: &BTreeMap<&str, &str>,
        api_key: &str,
        etag: Option<&str>,
    ) -> Result<Reply> {
        self.metrics.record_data_api_call(endpoint.path());

        // credential goes last, after the canonical parameters
        let mut query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, *v)).collect();
        query.push(("key", api_key));

        let mut request = self
            .client
            .get(format!("{}/{}", self.api_base, endpoint.path()))
            .header(ACCEPT, "application/json")
            .query(&query);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            // the URL carries the credential
            .map_err(|e| CatalogError::upstream(None, e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Reply::NotModified);
        }
        if status.is_success() {
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response
                .text()
                .await
                .map_err(|e| CatalogError::upstream(None, e.without_url().to_string()))?;
            return Ok(Reply::Fresh { body, etag });
        }

        let error_text = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorResponse>(&error_text).ok();
        if parsed
            .as_ref()
            .is_some_and(|e| e.has_reason(QUOTA_EXCEEDED_REASON))
        {
            tracing::warn!(endpoint = endpoint.path(), "upstream quota exceeded");
            return Err(CatalogError::QuotaExceeded);
        }
        let message = parsed
            .map(|e| e.error.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("YouTube API error: {status}"));
        Err(CatalogError::upstream(Some(status.as_u16()), message))
    }

    /// Gets full records for up to any number of ids, one metered call per batch of
    /// [`MAX_IDS_PER_CALL`]. Unknown or private ids are silently absent from the result.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn list_videos_by_ids(&self, ids: &[String]) -> Result<Vec<Video>> {
        let mut videos = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_IDS_PER_CALL) {
            let joined = batch.join(",");
            let max_results = batch.len().to_string();
            let response: VideoListResponse = self
                .fetch(
                    Endpoint::Videos,
                    &[
                        ("part", "contentDetails,snippet,statistics"),
                        ("id", &joined),
                        ("maxResults", &max_results),
                    ],
                    true,
                )
                .await?;
            videos.extend(response.items);
        }
        tracing::debug!(returned = videos.len(), "fetched videos by id");
        Ok(videos)
    }

    /// One page of keyword search results (ids only).
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/search/list>
    #[instrument(skip(self))]
    pub async fn search_videos(
        &self,
        query: &str,
        page_token: Option<&str>,
        region_code: Option<&str>,
    ) -> Result<SearchListResponse> {
        let max_results = self.page_size.to_string();
        let mut params = vec![
            ("part", "id"),
            ("type", "video"),
            ("q", query),
            ("maxResults", max_results.as_str()),
            ("videoEmbeddable", "true"),
            ("safeSearch", "none"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        if let Some(region) = region_code {
            params.push(("regionCode", region));
        }
        self.fetch(Endpoint::Search, &params, false).await
    }

    /// One page of the `mostPopular` chart for a region, optionally restricted to a category.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self))]
    pub async fn list_most_popular(
        &self,
        region_code: &str,
        page_token: Option<&str>,
        category_id: Option<&str>,
    ) -> Result<VideoListResponse> {
        let max_results = self.page_size.to_string();
        let mut params = vec![
            ("part", "contentDetails,snippet,statistics"),
            ("chart", "mostPopular"),
            ("regionCode", region_code),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        if let Some(category) = category_id {
            params.push(("videoCategoryId", category));
        }
        self.fetch(Endpoint::Videos, &params, true).await
    }

    /// One page of videos related to `video_id` (ids only).
    #[instrument(skip(self))]
    pub async fn search_related(
        &self,
        video_id: &str,
        page_token: Option<&str>,
    ) -> Result<SearchListResponse> {
        let max_results = self.page_size.to_string();
        let mut params = vec![
            ("part", "id"),
            ("type", "video"),
            ("relatedToVideoId", video_id),
            ("maxResults", max_results.as_str()),
            ("videoEmbeddable", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        self.fetch(Endpoint::Search, &params, false).await
    }

    /// Channel snippets (title and avatar) for any number of ids, batched.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn list_channels(&self, ids: &[String]) -> Result<Vec<Channel>> {
        self.list_channels_with_part(ids, "snippet").await
    }

    /// Maps each channel id to the id of its "all uploads" playlist, batched.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn list_channel_uploads_playlists(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let channels = self.list_channels_with_part(ids, "contentDetails").await?;
        Ok(channels
            .into_iter()
            .filter_map(|channel| {
                let uploads = channel.content_details?.related_playlists.uploads?;
                Some((channel.id, uploads))
            })
            .collect())
    }

    async fn list_channels_with_part(&self, ids: &[String], part: &str) -> Result<Vec<Channel>> {
        let mut channels = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_IDS_PER_CALL) {
            let joined = batch.join(",");
            let max_results = batch.len().to_string();
            let response: ChannelListResponse = self
                .fetch(
                    Endpoint::Channels,
                    &[("part", part), ("id", &joined), ("maxResults", &max_results)],
                    true,
                )
                .await?;
            channels.extend(response.items);
        }
        Ok(channels)
    }

    /// Ids of the most recent `max_results` entries of a playlist (single page).
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/playlistItems/list>
    #[instrument(skip(self))]
    pub async fn list_playlist_items(
        &self,
        playlist_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>> {
        let max_results = max_results.clamp(1, MAX_IDS_PER_CALL as u32).to_string();
        let response: PlaylistItemListResponse = self
            .fetch(
                Endpoint::PlaylistItems,
                &[
                    ("part", "contentDetails"),
                    ("playlistId", playlist_id),
                    ("maxResults", &max_results),
                ],
                true,
            )
            .await?;
        Ok(response
            .items
            .into_iter()
            .map(|item| item.content_details.video_id)
            .collect())
    }

    /// The category taxonomy for a region.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videoCategories/list>
    #[instrument(skip(self))]
    pub async fn list_video_categories(&self, region_code: &str) -> Result<Vec<VideoCategory>> {
        let response: VideoCategoryListResponse = self
            .fetch(
                Endpoint::VideoCategories,
                &[("part", "snippet"), ("regionCode", region_code)],
                true,
            )
            .await?;
        Ok(response.items)
    }

    /// Regions the site is available in.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/i18nRegions/list>
    #[instrument(skip(self))]
    pub async fn list_regions(&self) -> Result<Vec<I18nRegion>> {
        let response: I18nRegionListResponse = self
            .fetch(Endpoint::I18nRegions, &[("part", "snippet")], true)
            .await?;
        Ok(response.items)
    }
}
