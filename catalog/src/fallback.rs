//! Request-level fallback decisions, expressed as values.
//!
//! The aggregation layer reports failures as errors and does not pick substitutes itself. The
//! functions here are the decision tree a request handler runs on top of it: when the primary
//! source cannot answer, they serve something already at hand and say why through
//! [`Outcome::Fallback`].

use crate::aggregate::Page;
use crate::catalog::{Catalog, DEFAULT_REGION, PageRequest, normalize_region, popular_key};
use crate::curated::curated_page;
use crate::duration::filter_out_shorts;
use crate::error::{CatalogError, Result};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The upstream quota is spent for the current period.
    QuotaExceeded,
    /// The requested category does not exist in the requested region.
    CategoryUnavailable,
}

/// What a request produced, and whether it came from the source the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Fresh(T),
    Fallback { reason: FallbackReason, data: T },
}

impl<T> Outcome<T> {
    pub fn data(&self) -> &T {
        match self {
            Outcome::Fresh(data) | Outcome::Fallback { data, .. } => data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Outcome::Fresh(data) | Outcome::Fallback { data, .. } => data,
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Outcome::Fresh(_) => None,
            Outcome::Fallback { reason, .. } => Some(*reason),
        }
    }
}

/// Keyword search, falling back to the region's cached popular chart when the quota is spent.
///
/// Only a chart page that is already cached for the same size and threshold is used; if there is
/// none, the quota error is returned.
#[instrument(skip(catalog, request))]
pub async fn search_or_fallback(
    catalog: &Catalog,
    query: &str,
    region: Option<&str>,
    request: &PageRequest,
) -> Result<Outcome<Page>> {
    let e = match catalog.search(query, region, request).await {
        Ok(page) => return Ok(Outcome::Fresh(page)),
        Err(e) if e.is_quota_exceeded() => e,
        Err(e) => return Err(e),
    };
    catalog.metrics().record_quota_cooling_event();

    let config = catalog.config();
    let target = config.clamp_target(request.target_size);
    let threshold = config.clamp_threshold(request.min_duration_secs);
    let region = normalize_region(region.unwrap_or(DEFAULT_REGION));
    let key = popular_key(&region, None, threshold, target, None);

    match catalog.cache.get::<Page>(&key).await {
        Some(cached) => {
            tracing::info!(%region, "quota exhausted; serving cached popular chart instead of search");
            let mut items = filter_out_shorts(cached.items, threshold);
            items.truncate(target);
            Ok(Outcome::Fallback {
                reason: FallbackReason::QuotaExceeded,
                data: Page {
                    items,
                    next_page_token: None,
                },
            })
        }
        None => {
            tracing::warn!(%region, "quota exhausted and no cached chart to fall back on");
            Err(e)
        }
    }
}

/// A region's popular chart filtered to a named category.
///
/// When the region has no such category the curated catalog is served instead. When the quota is
/// spent the curated catalog is served if it is already cached.
#[instrument(skip(catalog, request))]
pub async fn category_feed(
    catalog: &Catalog,
    region: &str,
    category_title: &str,
    request: &PageRequest,
) -> Result<Outcome<Page>> {
    let primary = match catalog.resolve_category_id(region, category_title).await {
        Ok(Some(category_id)) => {
            catalog
                .most_popular(region, Some(&category_id), request)
                .await
        }
        Ok(None) => {
            tracing::info!(region, category_title, "category unavailable; serving curated catalog");
            let page = catalog.curated_catalog_page(request).await?;
            return Ok(Outcome::Fallback {
                reason: FallbackReason::CategoryUnavailable,
                data: page.into(),
            });
        }
        Err(e) => Err(e),
    };

    match primary {
        Ok(page) => Ok(Outcome::Fresh(page)),
        Err(e) if e.is_quota_exceeded() => {
            catalog.metrics().record_quota_cooling_event();
            cached_curated_fallback(catalog, request, e).await
        }
        Err(e) => Err(e),
    }
}

async fn cached_curated_fallback(
    catalog: &Catalog,
    request: &PageRequest,
    e: CatalogError,
) -> Result<Outcome<Page>> {
    let Some(curated) = catalog.cached_curated_catalog().await else {
        tracing::warn!("quota exhausted and curated catalog not cached");
        return Err(e);
    };
    let config = catalog.config();
    let page = curated_page(
        &curated,
        request.page_token.as_deref(),
        config.clamp_target(request.target_size),
        config.clamp_threshold(request.min_duration_secs),
    );
    Ok(Outcome::Fallback {
        reason: FallbackReason::QuotaExceeded,
        data: page.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        MockReply, MockYouTube, RecordedRequest, channels_by_id, test_catalog_with, video_json,
        video_page,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ids(page: &Page) -> Vec<&str> {
        page.items.iter().map(|v| v.id.as_str()).collect()
    }

    /// Popular charts work; search is out of quota.
    fn quota_for_search(req: &RecordedRequest) -> MockReply {
        match req.endpoint.as_str() {
            "search" => MockReply::error(403, "quotaExceeded", "quota"),
            "videos" => MockReply::json(video_page(
                vec![video_json("pop-1", 300), video_json("pop-2", 300)],
                Some("next"),
            )),
            _ => channels_by_id(req),
        }
    }

    #[tokio::test]
    async fn search_falls_back_to_cached_chart() {
        let mock = MockYouTube::start(quota_for_search).await;
        let catalog = test_catalog_with(&mock, |_| {});
        let request = PageRequest::default();

        catalog.most_popular("US", None, &request).await.unwrap();

        let outcome = search_or_fallback(&catalog, "jazz", Some("us"), &request)
            .await
            .unwrap();
        assert_eq!(outcome.fallback_reason(), Some(FallbackReason::QuotaExceeded));
        assert_eq!(ids(outcome.data()), ["pop-1", "pop-2"]);
        assert_eq!(outcome.data().next_page_token, None);
        assert_eq!(catalog.metrics_snapshot().quota.cooling_events, 1);
    }

    #[tokio::test]
    async fn search_without_cached_chart_reports_quota() {
        let mock = MockYouTube::start(quota_for_search).await;
        let catalog = test_catalog_with(&mock, |_| {});

        let e = search_or_fallback(&catalog, "jazz", None, &PageRequest::default())
            .await
            .unwrap_err();
        assert!(e.is_quota_exceeded());
        assert_eq!(catalog.metrics_snapshot().quota.cooling_events, 1);
    }

    #[tokio::test]
    async fn fresh_search_is_not_a_fallback() {
        let mock = MockYouTube::start(|req| match req.endpoint.as_str() {
            "search" => MockReply::json(json!({ "items": [] })),
            _ => channels_by_id(req),
        })
        .await;
        let catalog = test_catalog_with(&mock, |_| {});

        let outcome = search_or_fallback(&catalog, "jazz", None, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Fresh(Page::default()));
    }

    /// Taxonomy with "Education" only; a curated catalog from one channel.
    fn category_upstream(req: &RecordedRequest, quota_spent: bool) -> MockReply {
        match req.endpoint.as_str() {
            "videoCategories" => MockReply::json(json!({
                "items": [{ "id": "27", "snippet": { "title": "Education", "assignable": true } }]
            })),
            "videos" if req.param("chart").is_some() => {
                if quota_spent {
                    MockReply::error(403, "quotaExceeded", "quota")
                } else {
                    MockReply::json(video_page(vec![video_json("edu-1", 600)], None))
                }
            }
            "videos" => MockReply::json(video_page(vec![video_json("cur-1", 600)], None)),
            "channels" if req.param("part") == Some("contentDetails") => MockReply::json(json!({
                "items": [{ "id": "UC1", "contentDetails": { "relatedPlaylists": { "uploads": "UU1" } } }]
            })),
            "playlistItems" => MockReply::json(json!({
                "items": [{ "contentDetails": { "videoId": "cur-1" } }]
            })),
            _ => channels_by_id(req),
        }
    }

    fn one_curated_channel(config: &mut crate::CatalogConfig) {
        config.curated_channels = vec!["UC1".into()];
    }

    #[tokio::test]
    async fn resolved_category_is_fresh() {
        let mock = MockYouTube::start(|req| category_upstream(req, false)).await;
        let catalog = test_catalog_with(&mock, one_curated_channel);

        let outcome = category_feed(&catalog, "US", "education", &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.fallback_reason(), None);
        assert_eq!(ids(outcome.data()), ["edu-1"]);
        let chart = mock
            .requests()
            .into_iter()
            .find(|r| r.param("chart").is_some())
            .unwrap();
        assert_eq!(chart.param("videoCategoryId"), Some("27"));
    }

    #[tokio::test]
    async fn unknown_category_serves_curated() {
        let mock = MockYouTube::start(|req| category_upstream(req, false)).await;
        let catalog = test_catalog_with(&mock, one_curated_channel);

        let outcome = category_feed(&catalog, "US", "Gaming", &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(
            outcome.fallback_reason(),
            Some(FallbackReason::CategoryUnavailable)
        );
        assert_eq!(ids(outcome.data()), ["cur-1"]);
    }

    #[tokio::test]
    async fn quota_serves_cached_curated_only() {
        let mock = MockYouTube::start(|req| category_upstream(req, true)).await;
        let catalog = test_catalog_with(&mock, one_curated_channel);
        let request = PageRequest::default();

        // nothing cached yet
        let e = category_feed(&catalog, "US", "Education", &request)
            .await
            .unwrap_err();
        assert!(e.is_quota_exceeded());

        catalog.curated_catalog().await.unwrap();
        let outcome = category_feed(&catalog, "US", "Education", &request)
            .await
            .unwrap();
        assert_eq!(outcome.fallback_reason(), Some(FallbackReason::QuotaExceeded));
        assert_eq!(ids(&outcome.into_data()), ["cur-1"]);
        assert_eq!(catalog.metrics_snapshot().quota.cooling_events, 2);
    }
}
