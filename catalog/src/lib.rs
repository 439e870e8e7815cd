//! Aggregation and caching over the YouTube Data API for a long-form video catalog.
//!
//! The upstream is metered per call and pages by continuation token. This crate turns it into a
//! "give me N videos longer than T seconds" interface:
//!
//! - [`youtube_api::YouTubeClient`] talks to the API with retries, quota detection, and
//!   `If-None-Match` revalidation;
//! - [`cache::ValueCache`] caches derived values with a time-to-live and coalesces concurrent
//!   identical loads within the process;
//! - [`Catalog`] exposes the caller operations (search, charts, related videos, the worldwide
//!   feed, the curated fallback catalog) on top of both;
//! - [`fallback`] decides what to serve when the primary source cannot answer.

pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod category;
pub mod config;
pub mod curated;
pub mod duration;
pub mod error;
pub mod fallback;
pub mod global;
pub mod metrics;
pub mod store;
pub mod video;
pub mod youtube_api;

#[cfg(test)]
mod mock;

pub use aggregate::{Page, QueryShape};
pub use catalog::{Catalog, GlobalRequest, PageRequest, Region};
pub use config::{CatalogConfig, GlobalOrdering};
pub use curated::CuratedPage;
pub use error::{CatalogError, Result};
pub use fallback::{FallbackReason, Outcome};
pub use video::{ChannelInfo, NormalizedVideo};
