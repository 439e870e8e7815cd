//! A "worldwide" popular feed, approximated by merging per-region charts.
//!
//! The upstream only offers region-scoped charts. This walks a fixed list of representative
//! regions, merges their popular pages without duplicates, and stops as soon as it has enough.

use crate::catalog::Catalog;
use crate::config::GlobalOrdering;
use crate::error::Result;
use crate::video::NormalizedVideo;
use std::collections::HashSet;
use tracing::instrument;

/// Running, duplicate-free merge of several regions' results.
struct Merge {
    items: Vec<NormalizedVideo>,
    seen: HashSet<String>,
    target: usize,
}

impl Merge {
    fn new(target: usize) -> Self {
        Self {
            items: Vec::with_capacity(target),
            seen: HashSet::new(),
            target,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.target
    }

    fn extend(&mut self, videos: Vec<NormalizedVideo>) -> usize {
        let before = self.items.len();
        for video in videos {
            if self.is_full() {
                break;
            }
            if self.seen.insert(video.id.clone()) {
                self.items.push(video);
            }
        }
        self.items.len() - before
    }
}

impl Catalog {
    /// Up to `target` popular videos longer than `threshold_secs`, across the configured regions.
    ///
    /// With a category constraint, each region's chart is filtered by that category. Regions
    /// where the category cannot be resolved or whose chart fails are skipped. If the filtered
    /// pass falls short of `target`, one unfiltered pass tops the result up. Only an exhausted
    /// quota fails the whole operation. There is no continuation cursor.
    #[instrument(skip(self))]
    pub async fn aggregate_global(
        &self,
        target: usize,
        threshold_secs: u64,
        category_title: Option<&str>,
        category_id: Option<&str>,
    ) -> Result<Vec<NormalizedVideo>> {
        let mut merge = Merge::new(target);
        let categorized = category_title.is_some() || category_id.is_some();

        for region in &self.config.global_regions {
            if merge.is_full() {
                break;
            }
            let category = match (category_id, category_title) {
                (Some(id), _) => Some(id.to_string()),
                (None, Some(title)) => match self.resolve_category_id(region, title).await {
                    Ok(Some(id)) => Some(id),
                    Ok(None) => {
                        tracing::debug!(%region, title, "category not offered in region; skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(%region, title, error = %e, "category resolution failed; skipping region");
                        continue;
                    }
                },
                (None, None) => None,
            };
            self.merge_region(&mut merge, region, category.as_deref(), threshold_secs)
                .await?;
        }

        if categorized && !merge.is_full() {
            tracing::debug!(
                collected = merge.items.len(),
                target,
                "category pass fell short; topping up without category"
            );
            for region in &self.config.global_regions {
                if merge.is_full() {
                    break;
                }
                self.merge_region(&mut merge, region, None, threshold_secs)
                    .await?;
            }
        }

        let mut items = merge.items;
        if self.config.global_ordering == GlobalOrdering::ViewCount {
            // stable, so ties keep collection order
            items.sort_by(|a, b| b.view_count.cmp(&a.view_count));
        }
        Ok(items)
    }

    /// Merges one region's first popular page. Failures other than quota exhaustion skip the region.
    async fn merge_region(
        &self,
        merge: &mut Merge,
        region: &str,
        category_id: Option<&str>,
        threshold_secs: u64,
    ) -> Result<()> {
        match self
            .popular_page(region, category_id, merge.target, threshold_secs, None)
            .await
        {
            Ok(page) => {
                let added = merge.extend(page.items);
                tracing::debug!(%region, category_id, added, total = merge.items.len(), "merged region");
                Ok(())
            }
            Err(e) if e.is_quota_exceeded() => Err(e),
            Err(e) => {
                tracing::warn!(%region, category_id, error = %e, "popular chart failed; skipping region");
                Ok(())
            }
        }
    }
}
