//! Runtime configuration.

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Long-form education channels backing the curated fallback feed.
pub const EDUCATION_CHANNEL_IDS: &[&str] = &[
    "UCX6b17PVsYBQ0ip5gyeme-Q", // Khan Academy
    "UC4a-Gbdw7vOaccHmFo40b9g", // CrashCourse
    "UC9-y-6csu5WGm29I7JiwpnA", // Kurzgesagt
    "UC6nSFpj9HTCZ5t-N3Rm3-HA", // Veritasium
    "UCsXVk37bltHxD1rDPwtNM8Q", // TED-Ed
    "UCZYTClx2T1of7BRZ86-8fow", // SciShow
    "UCiDJtJKMICpb9B1qf7qjEOA", // 3Blue1Brown
    "UCPHnEGKK0wpOXw4dqmHPm_w", // Numberphile
    "UC-sGorAVt79iThhIlwX2tsA", // SmarterEveryDay
    "UCoxcjq-8xIDTYp3uz647V5A", // Vsauce
];

/// Regions sampled to approximate a worldwide "most popular" chart.
pub const GLOBAL_REGIONS: &[&str] = &["US", "GB", "IN", "CA", "AU", "DE", "FR", "BR", "JP", "KR"];

/// How the worldwide feed orders what it collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalOrdering {
    /// Category-filtered items first in region order, then uncategorized top-up items.
    #[default]
    CategoryFirst,
    /// Everything collected, sorted by view count (highest first). Ties keep collection order.
    ViewCount,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Credential appended to every upstream call. Never logged and never part of a cache key.
    #[serde(skip)]
    pub api_key: Option<String>,
    pub api_base: String,

    #[serde(with = "secs")]
    pub value_ttl: Duration,
    #[serde(with = "secs")]
    pub raw_ttl: Duration,
    #[serde(with = "secs")]
    pub channel_ttl: Duration,
    /// How long a channel the upstream did not return is remembered as missing.
    #[serde(with = "secs")]
    pub channel_miss_ttl: Duration,
    #[serde(with = "secs")]
    pub category_ttl: Duration,
    #[serde(with = "secs")]
    pub category_miss_ttl: Duration,
    #[serde(with = "secs")]
    pub uploads_ttl: Duration,
    #[serde(with = "secs")]
    pub curated_ttl: Duration,
    #[serde(with = "secs")]
    pub regions_ttl: Duration,

    /// Upper bound on upstream page fetches behind one aggregation call.
    pub max_page_fetches: usize,
    /// `maxResults` asked of paginated upstream endpoints.
    pub upstream_page_size: u32,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Caller thresholds are raised to at least this many seconds.
    pub min_duration_floor: u64,

    /// Total attempts for a call failing with a server or transport error.
    pub retry_attempts: u32,
    #[serde(with = "millis")]
    pub retry_delay: Duration,

    pub curated_channels: Vec<String>,
    pub curated_per_channel: u32,
    pub curated_cap: usize,

    pub global_regions: Vec<String>,
    pub global_ordering: GlobalOrdering,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            value_ttl: 6 * HOUR,
            raw_ttl: 6 * HOUR,
            channel_ttl: DAY,
            channel_miss_ttl: HOUR,
            category_ttl: 7 * DAY,
            category_miss_ttl: 6 * HOUR,
            uploads_ttl: 7 * DAY,
            curated_ttl: 6 * HOUR,
            regions_ttl: DAY,
            max_page_fetches: 5,
            upstream_page_size: 25,
            default_page_size: 24,
            max_page_size: 50,
            min_duration_floor: 60,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            curated_channels: EDUCATION_CHANNEL_IDS.iter().map(|s| s.to_string()).collect(),
            curated_per_channel: 10,
            curated_cap: 200,
            global_regions: GLOBAL_REGIONS.iter().map(|s| s.to_string()).collect(),
            global_ordering: GlobalOrdering::CategoryFirst,
        }
    }
}

impl CatalogConfig {
    /// Defaults overlaid with `YT_API_KEY` and `YT_API_BASE` from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key = std::env::var("YT_API_KEY").ok().filter(|k| !k.is_empty());
        if let Ok(base) = std::env::var("YT_API_BASE") {
            config.api_base = base;
        }
        config
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Clamps a caller-requested page size into `1..=max_page_size`.
    pub fn clamp_target(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }

    /// Raises a caller-requested duration threshold to at least the configured floor.
    pub fn clamp_threshold(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.min_duration_floor)
            .max(self.min_duration_floor)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
