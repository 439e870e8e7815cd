//! YouTube I18nRegions API types.

use serde::{Deserialize, Serialize};

/// Response structure for the `i18nRegions.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/docs/i18nRegions/list>
#[derive(Debug, Serialize, Deserialize)]
pub struct I18nRegionListResponse {
    #[serde(default)]
    pub items: Vec<I18nRegion>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct I18nRegion {
    pub id: String,
    pub snippet: I18nRegionSnippet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct I18nRegionSnippet {
    /// Two-letter ISO country code.
    pub gl: String,
    /// Display name of the region.
    pub name: String,
}
