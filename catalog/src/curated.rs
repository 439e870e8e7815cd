//! The editorial fallback feed built from a fixed list of channels.
//!
//! The catalog is assembled from each channel's most recent uploads, sorted newest first, and
//! cached as a single value. Callers page through it with a numeric offset cursor.

use crate::aggregate::Page;
use crate::catalog::{Catalog, PageRequest, key_part};
use crate::duration::filter_out_shorts;
use crate::error::{CatalogError, Result};
use crate::video::NormalizedVideo;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::instrument;

const CURATED_KEY: &str = "curated:catalog";

/// One slice of the curated catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratedPage {
    pub items: Vec<NormalizedVideo>,
    /// Offset of the next slice, or `None` after the last one.
    pub next_page_token: Option<String>,
    /// Items in the whole catalog that clear the duration threshold.
    pub total_available: usize,
}

impl From<CuratedPage> for Page {
    fn from(page: CuratedPage) -> Self {
        Page {
            items: page.items,
            next_page_token: page.next_page_token,
        }
    }
}

/// Slices `catalog` for one request. Unparseable cursors start from the beginning.
pub fn curated_page(
    catalog: &[NormalizedVideo],
    page_token: Option<&str>,
    target: usize,
    threshold_secs: u64,
) -> CuratedPage {
    let available = filter_out_shorts(catalog.to_vec(), threshold_secs);
    let offset = page_token
        .and_then(|token| token.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let end = offset.saturating_add(target).min(available.len());
    let items = available.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
    CuratedPage {
        next_page_token: (end < available.len()).then(|| end.to_string()),
        total_available: available.len(),
        items,
    }
}

impl Catalog {
    /// The full curated catalog, newest first, built on first use and cached for `curated_ttl`.
    pub async fn curated_catalog(&self) -> Result<Vec<NormalizedVideo>> {
        let this = self.clone();
        self.cache
            .get_or_load(CURATED_KEY, self.config.curated_ttl, move || async move {
                this.build_curated_catalog().await
            })
            .await
    }

    /// The curated catalog only if it is already cached. Makes no upstream calls.
    pub async fn cached_curated_catalog(&self) -> Option<Vec<NormalizedVideo>> {
        self.cache.get(CURATED_KEY).await
    }

    /// One page of the curated catalog for a caller.
    #[instrument(skip(self))]
    pub async fn curated_catalog_page(&self, request: &PageRequest) -> Result<CuratedPage> {
        let catalog = self.curated_catalog().await?;
        Ok(curated_page(
            &catalog,
            request.page_token.as_deref(),
            self.config.clamp_target(request.target_size),
            self.config.clamp_threshold(request.min_duration_secs),
        ))
    }

    /// Drops the cached catalog so the next request rebuilds it.
    pub async fn invalidate_curated(&self) -> Result<()> {
        tracing::info!("invalidating curated catalog");
        self.cache.delete(CURATED_KEY).await
    }

    /// Harvests recent uploads from every configured channel and assembles them newest first.
    ///
    /// A channel whose uploads cannot be listed is skipped. Running out of quota aborts the
    /// build, as does ending up with nothing at all, so that an empty catalog is never cached.
    #[instrument(skip(self))]
    pub async fn build_curated_catalog(&self) -> Result<Vec<NormalizedVideo>> {
        let channels = &self.config.curated_channels;
        if channels.is_empty() {
            return Err(CatalogError::Configuration(
                "no curated channels configured".into(),
            ));
        }
        let uploads = self.uploads_playlists(channels).await?;
        let cap = self.config.curated_cap;

        let mut ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for channel in channels {
            if ids.len() >= cap {
                break;
            }
            let Some(playlist) = uploads.get(channel) else {
                tracing::warn!(%channel, "channel has no uploads playlist; skipping");
                continue;
            };
            match self
                .client
                .list_playlist_items(playlist, self.config.curated_per_channel)
                .await
            {
                Ok(video_ids) => {
                    for id in video_ids {
                        if ids.len() >= cap {
                            break;
                        }
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                }
                Err(e) if e.is_quota_exceeded() => return Err(e),
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "could not list channel uploads; skipping");
                }
            }
        }

        let mut videos = self.fetch_videos(&ids).await?;
        if videos.is_empty() {
            return Err(CatalogError::upstream(
                None,
                "no curated channel yielded any videos",
            ));
        }
        self.hydrate_avatars(&mut videos).await;
        videos.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        tracing::info!(videos = videos.len(), "built curated catalog");
        Ok(videos)
    }

    /// Channel id to uploads playlist id, cached per set of channels.
    async fn uploads_playlists(&self, channels: &[String]) -> Result<HashMap<String, String>> {
        let mut sorted = channels.to_vec();
        sorted.sort();
        sorted.dedup();
        let key = format!(
            "uploads:{}",
            sorted.iter().map(|id| key_part(id)).collect::<Vec<_>>().join(",")
        );
        let client = self.client.clone();
        self.cache
            .get_or_load(&key, self.config.uploads_ttl, move || async move {
                client.list_channel_uploads_playlists(&sorted).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        MockReply, MockYouTube, RecordedRequest, channels_by_id, test_catalog_with, video_json,
        video_json_on, videos_by_id,
    };
    use crate::youtube_api::Video;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalog_of(durations: &[u64]) -> Vec<NormalizedVideo> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let raw: Video = serde_json::from_value(video_json(&format!("v{i}"), *d)).unwrap();
                NormalizedVideo::try_from(raw).unwrap()
            })
            .collect()
    }

    fn ids(page: &CuratedPage) -> Vec<&str> {
        page.items.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn pages_by_offset() {
        let catalog = catalog_of(&[300, 30, 300, 300, 300]);

        let first = curated_page(&catalog, None, 2, 60);
        assert_eq!(ids(&first), ["v0", "v2"]);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));
        assert_eq!(first.total_available, 4);

        let second = curated_page(&catalog, first.next_page_token.as_deref(), 2, 60);
        assert_eq!(ids(&second), ["v3", "v4"]);
        assert_eq!(second.next_page_token, None);

        let past_end = curated_page(&catalog, Some("40"), 2, 60);
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.next_page_token, None);
    }

    #[test]
    fn invalid_cursor_starts_over() {
        let catalog = catalog_of(&[300, 300, 300]);
        let page = curated_page(&catalog, Some("not-a-number"), 2, 60);
        assert_eq!(ids(&page), ["v0", "v1"]);
    }

    /// Channels `UC*` upload to `UU*`, and each playlist lists its channel's scripted videos.
    fn curated_upstream(
        req: &RecordedRequest,
        playlists: &HashMap<&str, Vec<&str>>,
        videos: &[serde_json::Value],
    ) -> MockReply {
        match req.endpoint.as_str() {
            "channels" if req.param("part") == Some("contentDetails") => {
                let items: Vec<_> = req
                    .param("id")
                    .unwrap_or("")
                    .split(',')
                    .map(|id| {
                        json!({
                            "id": id,
                            "contentDetails": {
                                "relatedPlaylists": { "uploads": id.replacen("UC", "UU", 1) }
                            }
                        })
                    })
                    .collect();
                MockReply::json(json!({ "items": items }))
            }
            "channels" => channels_by_id(req),
            "playlistItems" => {
                let playlist = req.param("playlistId").unwrap_or("");
                match playlists.get(playlist) {
                    Some(ids) => {
                        let items: Vec<_> = ids
                            .iter()
                            .map(|id| json!({ "contentDetails": { "videoId": id } }))
                            .collect();
                        MockReply::json(json!({ "items": items }))
                    }
                    None => MockReply::error(500, "backendError", "playlist unavailable"),
                }
            }
            "videos" => videos_by_id(req, videos),
            _ => MockReply::error(404, "notFound", "unexpected endpoint"),
        }
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_sink_the_build() {
        let playlists: HashMap<&str, Vec<&str>> =
            [("UU1", vec!["a1", "a2"]), ("UU3", vec!["c1", "a1"])]
                .into_iter()
                .collect();
        let videos = vec![
            video_json_on("a1", 600, "UC1", "2024-01-01T00:00:00Z"),
            video_json_on("a2", 600, "UC1", "2024-03-01T00:00:00Z"),
            video_json_on("c1", 600, "UC3", "2024-02-01T00:00:00Z"),
        ];
        let mock = MockYouTube::start(move |req| curated_upstream(req, &playlists, &videos)).await;
        let catalog = test_catalog_with(&mock, |config| {
            config.curated_channels = vec!["UC1".into(), "UC2".into(), "UC3".into()];
        });

        let built = catalog.curated_catalog().await.unwrap();
        let ids: Vec<_> = built.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["a2", "c1", "a1"]);
        assert!(built.iter().all(|v| v.channel_avatar_url.is_some()));

        // served from cache afterwards
        let calls = mock.request_count();
        let page = catalog
            .curated_catalog_page(&PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_available, 3);
        assert_eq!(mock.request_count(), calls);
    }

    #[tokio::test]
    async fn respects_per_channel_request_and_overall_cap() {
        let playlists: HashMap<&str, Vec<&str>> =
            [("UU1", vec!["a1", "a2", "a3"]), ("UU2", vec!["b1"])]
                .into_iter()
                .collect();
        let videos = vec![
            video_json("a1", 600),
            video_json("a2", 600),
            video_json("a3", 600),
            video_json("b1", 600),
        ];
        let mock = MockYouTube::start(move |req| curated_upstream(req, &playlists, &videos)).await;
        let catalog = test_catalog_with(&mock, |config| {
            config.curated_channels = vec!["UC1".into(), "UC2".into()];
            config.curated_per_channel = 3;
            config.curated_cap = 2;
        });

        let built = catalog.build_curated_catalog().await.unwrap();
        assert_eq!(built.len(), 2);
        assert_eq!(mock.count("playlistItems"), 1);
        let listing = mock
            .requests()
            .into_iter()
            .find(|r| r.endpoint == "playlistItems")
            .unwrap();
        assert_eq!(listing.param("maxResults"), Some("3"));
    }

    #[tokio::test]
    async fn quota_exhaustion_aborts_the_build() {
        let mock = MockYouTube::start(|req| match req.endpoint.as_str() {
            "playlistItems" => MockReply::error(403, "quotaExceeded", "quota"),
            _ => curated_upstream(req, &HashMap::new(), &[]),
        })
        .await;
        let catalog = test_catalog_with(&mock, |config| {
            config.curated_channels = vec!["UC1".into(), "UC2".into()];
        });

        let e = catalog.curated_catalog().await.unwrap_err();
        assert!(e.is_quota_exceeded());
        assert_eq!(mock.count("playlistItems"), 1);
        assert_eq!(catalog.cached_curated_catalog().await, None);
    }

    #[tokio::test]
    async fn invalidation_forces_a_rebuild() {
        let playlists: HashMap<&str, Vec<&str>> = [("UU1", vec!["a1"])].into_iter().collect();
        let videos = vec![video_json("a1", 600)];
        let mock = MockYouTube::start(move |req| curated_upstream(req, &playlists, &videos)).await;
        let catalog = test_catalog_with(&mock, |config| {
            config.curated_channels = vec!["UC1".into()];
        });

        catalog.curated_catalog().await.unwrap();
        catalog.invalidate_curated().await.unwrap();
        assert_eq!(catalog.cached_curated_catalog().await, None);
        catalog.curated_catalog().await.unwrap();

        assert_eq!(mock.count("playlistItems"), 2);
        // uploads playlists have their own, longer-lived entry
        assert_eq!(
            mock.requests()
                .iter()
                .filter(|r| r.endpoint == "channels" && r.param("part") == Some("contentDetails"))
                .count(),
            1
        );
    }
}
