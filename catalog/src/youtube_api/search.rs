//! YouTube Search API types.

use crate::youtube_api::types::PageInfo;
use serde::{Deserialize, Serialize};

/// Response structure for the `search.list` API call.
///
/// Search results only identify videos; details come from a follow-up `videos.list` call.
///
/// See: <https://developers.google.com/youtube/v3/docs/search/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchResult>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: PageInfo,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: SearchResultId,
}

/// Identifies the matched resource. With `type=video` only `videoId` is set, but the API
/// still reserves the right to return channels and playlists.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResultId {
    pub kind: Option<String>,
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

impl SearchListResponse {
    /// Video ids in result order, skipping non-video results.
    pub fn video_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.id.video_id.clone())
            .collect()
    }
}
