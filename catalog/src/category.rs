//! Maps human category names to the upstream's per-region category ids.

use crate::catalog::{Catalog, key_part, normalize_region};
use crate::error::Result;
use tracing::instrument;

/// Lower-cased title with every run of non-alphanumeric characters collapsed to a single `-`.
///
/// `"Science & Technology"` and `"science-technology"` share the slug `science-technology`.
pub fn category_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

impl Catalog {
    /// The assignable category in `region` whose title matches `title`, ignoring case and
    /// punctuation.
    ///
    /// A region without such a category resolves to `None`. That answer is cached too (for
    /// `category_miss_ttl` rather than `category_ttl`), so repeated lookups cost no quota.
    #[instrument(skip(self))]
    pub async fn resolve_category_id(&self, region: &str, title: &str) -> Result<Option<String>> {
        let slug = category_slug(title);
        if slug.is_empty() {
            return Ok(None);
        }
        let region = normalize_region(region);
        let key = format!("category:{}:{}", key_part(&region), key_part(&slug));
        let (hit_ttl, miss_ttl) = (self.config.category_ttl, self.config.category_miss_ttl);
        let client = self.client.clone();

        self.cache
            .get_or_load_with(
                &key,
                move |id: &Option<String>| if id.is_some() { hit_ttl } else { miss_ttl },
                move || async move {
                    let categories = client.list_video_categories(&region).await?;
                    let found = categories
                        .into_iter()
                        .find(|c| c.snippet.assignable && category_slug(&c.snippet.title) == slug)
                        .map(|c| c.id);
                    if found.is_none() {
                        tracing::debug!(%region, %slug, "no assignable category matches");
                    }
                    Ok(found)
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockYouTube, test_catalog};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn taxonomy() -> MockReply {
        MockReply::json(json!({
            "items": [
                { "id": "1", "snippet": { "title": "Film & Animation", "assignable": true } },
                { "id": "18", "snippet": { "title": "Short Movies", "assignable": false } },
                { "id": "27", "snippet": { "title": "Education", "assignable": true } },
                { "id": "28", "snippet": { "title": "Science & Technology", "assignable": true } }
            ]
        }))
    }

    #[test]
    fn slugs() {
        assert_eq!(category_slug("Science & Technology"), "science-technology");
        assert_eq!(category_slug("  Film & Animation!! "), "film-animation");
        assert_eq!(category_slug("EDUCATION"), "education");
        assert_eq!(category_slug("--"), "");
    }

    #[tokio::test]
    async fn resolves_case_insensitively() {
        let mock = MockYouTube::start(|_| taxonomy()).await;
        let catalog = test_catalog(&mock);

        assert_eq!(
            catalog.resolve_category_id("us", "education").await.unwrap(),
            Some("27".to_string())
        );
        assert_eq!(
            catalog
                .resolve_category_id("US", "science & TECHNOLOGY")
                .await
                .unwrap(),
            Some("28".to_string())
        );
        assert_eq!(mock.request_count(), 2);
        assert_eq!(mock.requests()[0].param("regionCode"), Some("US"));

        // cached per (region, slug)
        catalog.resolve_category_id("US", "Education").await.unwrap();
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn unassignable_categories_do_not_match() {
        let mock = MockYouTube::start(|_| taxonomy()).await;
        let catalog = test_catalog(&mock);

        assert_eq!(
            catalog
                .resolve_category_id("US", "Short Movies")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn absence_is_cached_as_a_sentinel() {
        let mock = MockYouTube::start(|_| taxonomy()).await;
        let catalog = test_catalog(&mock);

        assert_eq!(
            catalog.resolve_category_id("KR", "Gaming").await.unwrap(),
            None
        );
        assert_eq!(mock.request_count(), 1);

        assert_eq!(
            catalog.resolve_category_id("KR", "Gaming").await.unwrap(),
            None
        );
        assert_eq!(mock.request_count(), 1, "sentinel served from cache");

        // a different region is a different entry
        catalog.resolve_category_id("JP", "Gaming").await.unwrap();
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn blank_titles_resolve_to_none_without_calls() {
        let mock = MockYouTube::start(|_| taxonomy()).await;
        let catalog = test_catalog(&mock);

        assert_eq!(catalog.resolve_category_id("US", " & ").await.unwrap(), None);
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn upstream_failures_are_not_cached() {
        let mock = MockYouTube::start(|_| MockReply::error(400, "invalidRegionCode", "bad region"))
            .await;
        let catalog = test_catalog(&mock);

        assert!(catalog.resolve_category_id("ZZ", "Music").await.is_err());
        assert!(catalog.resolve_category_id("ZZ", "Music").await.is_err());
        assert_eq!(mock.request_count(), 2);
    }
}
