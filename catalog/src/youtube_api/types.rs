//! Types shared by several YouTube Data API responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Paging details for lists of resources.
///
/// See: <https://developers.google.com/youtube/v3/docs/pageInfo>
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    /// The total number of results in the result set.
    #[serde(rename = "totalResults", default)]
    pub total_results: u32,
    /// The number of results included in the API response.
    #[serde(rename = "resultsPerPage", default)]
    pub results_per_page: u32,
}

/// One rendition of a thumbnail image.
///
/// See: <https://developers.google.com/youtube/v3/docs/thumbnails>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Thumbnails keyed by variant name (`default`, `medium`, `high`, `standard`, `maxres`).
pub type Thumbnails = BTreeMap<String, Thumbnail>;

/// The error envelope returned with non-2xx responses.
///
/// See: <https://developers.google.com/youtube/v3/docs/errors>
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorItem {
    pub reason: Option<String>,
}

impl ErrorResponse {
    /// Whether any of the reported errors carries `reason`.
    pub fn has_reason(&self, reason: &str) -> bool {
        self.error
            .errors
            .iter()
            .any(|e| e.reason.as_deref() == Some(reason))
    }
}
