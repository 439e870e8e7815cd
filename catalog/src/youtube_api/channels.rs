//! YouTube Channels API types.

use crate::youtube_api::types::{PageInfo, Thumbnails};
use serde::{Deserialize, Serialize};

/// Response structure for the `channels.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/docs/channels/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelListResponse {
    /// A list of channels that match the request criteria.
    #[serde(default)]
    pub items: Vec<Channel>,
    #[serde(rename = "pageInfo", default)]
    pub page_info: PageInfo,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// A `channel` resource, with whichever of `snippet` and `contentDetails` were requested.
///
/// See: <https://developers.google.com/youtube/v3/docs/channels#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct Channel {
    /// The ID that YouTube uses to uniquely identify the channel.
    pub id: String,
    pub snippet: Option<ChannelSnippet>,
    #[serde(rename = "contentDetails")]
    pub content_details: Option<ChannelContentDetails>,
}

/// See: <https://developers.google.com/youtube/v3/docs/channels#snippet>
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelSnippet {
    /// The channel's title.
    pub title: String,
    /// The channel's avatar in several sizes.
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelatedPlaylists {
    /// The playlist holding every public upload of the channel.
    pub uploads: Option<String>,
}

impl ChannelSnippet {
    /// The smallest available avatar rendition.
    pub fn avatar_url(&self) -> Option<&str> {
        ["default", "medium", "high"]
            .iter()
            .find_map(|variant| self.thumbnails.get(*variant))
            .map(|thumbnail| thumbnail.url.as_str())
    }
}
