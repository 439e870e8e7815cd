//! Canonical video and channel records, and the batched lookups that produce them.

use crate::catalog::{Catalog, key_part};
use crate::duration::{HasDuration, parse_duration};
use crate::error::{CatalogError, Result};
use crate::youtube_api::{Channel, Thumbnails, Video};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// A video as served to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedVideo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnails: Thumbnails,
    pub duration_sec: u64,
    pub channel_title: String,
    pub channel_id: String,
    pub published_at: Timestamp,
    /// Zero when the upstream withholds statistics.
    pub view_count: u64,
    /// `None` means "unknown", which is not the same as zero likes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    /// Filled in by [`Catalog::hydrate_avatars`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_avatar_url: Option<String>,
}

impl HasDuration for NormalizedVideo {
    fn duration_secs(&self) -> u64 {
        self.duration_sec
    }
}

impl TryFrom<Video> for NormalizedVideo {
    type Error = CatalogError;

    fn try_from(video: Video) -> Result<Self> {
        let duration_sec = parse_duration(&video.content_details.duration)?;
        let (view_count, like_count) = match &video.statistics {
            Some(statistics) => (
                parse_count(statistics.view_count.as_deref()).unwrap_or(0),
                parse_count(statistics.like_count.as_deref()),
            ),
            None => (0, None),
        };
        let snippet = video.snippet;
        Ok(Self {
            id: video.id,
            title: snippet.title,
            description: snippet.description,
            thumbnails: snippet.thumbnails,
            duration_sec,
            channel_title: snippet.channel_title,
            channel_id: snippet.channel_id,
            published_at: snippet.published_at,
            view_count,
            like_count,
            channel_avatar_url: None,
        })
    }
}

fn parse_count(raw: Option<&str>) -> Option<u64> {
    raw?.parse().ok()
}

/// Display metadata for a channel, cached separately from videos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ChannelInfo {
    /// `None` if the channel was fetched without its snippet.
    pub fn from_api(channel: Channel) -> Option<Self> {
        let snippet = channel.snippet?;
        Some(Self {
            avatar_url: snippet.avatar_url().map(str::to_string),
            title: snippet.title,
            id: channel.id,
        })
    }
}

fn channel_key(id: &str) -> String {
    format!("channel:{}", key_part(id))
}

impl Catalog {
    /// Full records for `ids`, in the order requested. Ids the upstream does not know are dropped.
    pub(crate) async fn fetch_videos(&self, ids: &[String]) -> Result<Vec<NormalizedVideo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id = self
            .client
            .list_videos_by_ids(ids)
            .await?
            .into_iter()
            .map(|video| NormalizedVideo::try_from(video).map(|v| (v.id.clone(), v)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Channel metadata for `ids`, read from the cache where possible.
    ///
    /// Cache misses are fetched in batches and stored one entry per channel. Channels the upstream
    /// does not return are remembered as missing for `channel_miss_ttl`, and concurrent lookups of
    /// the same missing set share one fetch.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn channel_infos(&self, ids: &[String]) -> Result<HashMap<String, ChannelInfo>> {
        let metrics = self.cache.metrics();
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.cache.get::<Option<ChannelInfo>>(&channel_key(id)).await {
                Some(cached) => {
                    metrics.record_cache_hit();
                    if let Some(info) = cached {
                        found.insert(id.clone(), info);
                    }
                }
                None => {
                    metrics.record_cache_miss();
                    missing.push(id.clone());
                }
            }
        }

        if !missing.is_empty() {
            missing.sort();
            let key = format!(
                "channels:{}",
                missing.iter().map(|id| key_part(id)).collect::<Vec<_>>().join(",")
            );
            let this = self.clone();
            let loaded: HashMap<String, Option<ChannelInfo>> = self
                .cache
                .get_or_load(&key, self.config.channel_miss_ttl, move || async move {
                    this.load_channels(missing).await
                })
                .await?;
            found.extend(
                loaded
                    .into_iter()
                    .filter_map(|(id, info)| info.map(|info| (id, info))),
            );
        }
        Ok(found)
    }

    async fn load_channels(
        &self,
        ids: Vec<String>,
    ) -> Result<HashMap<String, Option<ChannelInfo>>> {
        tracing::debug!(missing = ids.len(), "loading channel metadata");
        let mut loaded: HashMap<String, Option<ChannelInfo>> =
            ids.iter().map(|id| (id.clone(), None)).collect();
        for channel in self.client.list_channels(&ids).await? {
            if let Some(info) = ChannelInfo::from_api(channel) {
                loaded.insert(info.id.clone(), Some(info));
            }
        }
        for (id, info) in &loaded {
            let ttl = match info {
                Some(_) => self.config.channel_ttl,
                None => {
                    tracing::debug!(channel = %id, "channel not returned upstream");
                    self.config.channel_miss_ttl
                }
            };
            self.cache.set(&channel_key(id), info, ttl).await;
        }
        Ok(loaded)
    }

    /// Fills in each video's channel avatar.
    ///
    /// Avatars are decoration: if the channel lookup fails the videos are left as they are.
    pub async fn hydrate_avatars(&self, videos: &mut [NormalizedVideo]) {
        let mut ids: Vec<String> = Vec::new();
        for video in videos.iter() {
            if !ids.contains(&video.channel_id) {
                ids.push(video.channel_id.clone());
            }
        }
        if ids.is_empty() {
            return;
        }
        match self.channel_infos(&ids).await {
            Ok(channels) => {
                for video in videos.iter_mut() {
                    video.channel_avatar_url = channels
                        .get(&video.channel_id)
                        .and_then(|channel| channel.avatar_url.clone());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel lookup failed; leaving avatars unset");
            }
        }
    }
}
