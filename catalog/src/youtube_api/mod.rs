//! YouTube Data API v3 client library, restricted to the read-only catalog endpoints.
//!
//! # Quota
//!
//! Every request is metered against the project's daily quota, and a batch call costs the same
//! as a single-id call. The client is therefore built around spending as few calls as possible:
//!
//! - batch endpoints ([`YouTubeClient::list_videos_by_ids`], [`YouTubeClient::list_channels`])
//!   are chunked at [`client::MAX_IDS_PER_CALL`] ids per call;
//! - responses for stable resources are revalidated with `If-None-Match`, so an unchanged
//!   resource comes back as `304 Not Modified` without a body;
//! - an exhausted quota surfaces as [`crate::CatalogError::QuotaExceeded`] and is never retried.
//!
//! Search and related-video pages only identify videos. Their ids must be hydrated with a
//! follow-up `videos.list` call, whereas `mostPopular` chart pages carry full records.

pub mod categories;
pub mod channels;
pub mod client;
pub mod playlists;
pub mod regions;
pub mod search;
pub mod types;
pub mod videos;

pub use client::{Endpoint, YouTubeClient};
pub use types::{PageInfo, Thumbnail, Thumbnails};

pub use categories::VideoCategory;
pub use channels::{Channel, ChannelSnippet};
pub use regions::I18nRegion;
pub use videos::{Video, VideoListResponse};
