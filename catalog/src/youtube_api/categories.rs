//! YouTube VideoCategories API types.

use serde::{Deserialize, Serialize};

/// Response structure for the `videoCategories.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/docs/videoCategories/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoCategoryListResponse {
    #[serde(default)]
    pub items: Vec<VideoCategory>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoCategory {
    pub id: String,
    pub snippet: VideoCategorySnippet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoCategorySnippet {
    pub title: String,
    /// Whether videos can be associated with the category.
    #[serde(default)]
    pub assignable: bool,
}
