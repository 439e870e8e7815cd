//! Accumulates qualifying videos across upstream pages until a caller's target is met.
//!
//! The upstream pages by continuation token and its pages are fixed-size, but after short-form
//! clips are dropped a single page may hold far fewer usable items than a caller asked for. The
//! aggregator keeps following continuation tokens, filtering and de-duplicating as it goes, until
//! it has `target` items, the upstream runs out, or it has spent its page-fetch budget.
//!
//! The cursor handed back to callers is opaque. When the target is reached partway through an
//! upstream page it names that page together with how many of its entries were already used,
//! so the next call picks up exactly where this one stopped.

use crate::catalog::Catalog;
use crate::duration::is_short;
use crate::error::Result;
use crate::video::NormalizedVideo;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// Separates the upstream page token from the in-page offset in a resume cursor.
///
/// Upstream page tokens are URL-safe base64 and never contain it.
const OFFSET_SEPARATOR: char = '~';

/// The kinds of paginated upstream query the aggregator can drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    /// Keyword search. Pages carry ids only.
    Search {
        query: String,
        region: Option<String>,
    },
    /// The `mostPopular` chart. Pages carry full records.
    MostPopular {
        region: String,
        category_id: Option<String>,
    },
    /// Videos related to a seed video. Pages carry ids only.
    Related { video_id: String },
}

impl QueryShape {
    fn label(&self) -> &'static str {
        match self {
            QueryShape::Search { .. } => "search",
            QueryShape::MostPopular { .. } => "most_popular",
            QueryShape::Related { .. } => "related",
        }
    }
}

/// One page of results as handed to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<NormalizedVideo>,
    /// Where to resume. `None` once no further qualifying items exist.
    pub next_page_token: Option<String>,
}

/// A position in an upstream result sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Resume {
    /// Upstream page to fetch; `None` is the first page.
    page_token: Option<String>,
    /// Entries at the start of that page that were already handed out.
    skip: usize,
}

impl Resume {
    /// Reads a caller cursor. Anything that is not `{token}~{offset}` is a plain upstream token.
    fn parse(cursor: Option<&str>) -> Self {
        let Some(cursor) = cursor.filter(|c| !c.is_empty()) else {
            return Self::default();
        };
        match cursor.rsplit_once(OFFSET_SEPARATOR) {
            Some((token, skip)) => match skip.parse() {
                Ok(skip) => Self {
                    page_token: (!token.is_empty()).then(|| token.to_string()),
                    skip,
                },
                Err(_) => Self {
                    page_token: Some(cursor.to_string()),
                    skip: 0,
                },
            },
            None => Self {
                page_token: Some(cursor.to_string()),
                skip: 0,
            },
        }
    }

    /// The caller-facing cursor, or `None` for the very start of the sequence.
    fn encode(&self) -> Option<String> {
        let token = self.page_token.as_deref().unwrap_or("");
        match self.skip {
            0 if token.is_empty() => None,
            0 => Some(token.to_string()),
            skip => Some(format!("{token}{OFFSET_SEPARATOR}{skip}")),
        }
    }
}

/// Candidates from a single upstream page, already normalized, each with its position on the page.
struct UpstreamPage {
    candidates: Vec<(usize, NormalizedVideo)>,
    next_page_token: Option<String>,
}

fn qualifies(video: &NormalizedVideo, threshold_secs: u64, seen: &HashSet<String>) -> bool {
    !is_short(video.duration_sec, threshold_secs) && !seen.contains(&video.id)
}

impl Catalog {
    /// Collects up to `target` videos longer than `threshold_secs` for `shape`, starting at
    /// `start_cursor`.
    ///
    /// Upstream order is kept. At most `max_page_fetches` upstream pages are read per call. The
    /// returned cursor resumes right after the last item handed out, inside its upstream page if
    /// need be, and is `None` only once that page holds nothing further and the upstream has no
    /// next page.
    #[instrument(skip(self, shape), fields(shape = shape.label()))]
    pub async fn aggregate(
        &self,
        shape: &QueryShape,
        target: usize,
        threshold_secs: u64,
        start_cursor: Option<&str>,
    ) -> Result<Page> {
        let mut items: Vec<NormalizedVideo> = Vec::with_capacity(target);
        let mut seen: HashSet<String> = HashSet::new();
        let mut at = Resume::parse(start_cursor);
        let mut fetches = 0;

        let next = loop {
            if items.len() >= target {
                break Some(at);
            }
            if fetches >= self.config.max_page_fetches {
                tracing::debug!(
                    fetches,
                    total = items.len(),
                    "page budget spent before reaching target"
                );
                break Some(at);
            }

            let page = self
                .fetch_page(shape, at.page_token.as_deref(), at.skip, &seen)
                .await?;
            fetches += 1;

            let before = items.len();
            let mut leftover = None;
            let mut candidates = page.candidates.into_iter();
            while let Some((position, video)) = candidates.next() {
                if items.len() >= target {
                    if qualifies(&video, threshold_secs, &seen)
                        || candidates.any(|(_, v)| qualifies(&v, threshold_secs, &seen))
                    {
                        leftover = Some(position);
                    }
                    break;
                }
                if qualifies(&video, threshold_secs, &seen) {
                    seen.insert(video.id.clone());
                    items.push(video);
                }
            }
            tracing::debug!(
                page = fetches,
                kept = items.len() - before,
                total = items.len(),
                "aggregated upstream page"
            );

            if let Some(skip) = leftover {
                break Some(Resume {
                    page_token: at.page_token,
                    skip,
                });
            }
            match page.next_page_token {
                Some(token) => {
                    at = Resume {
                        page_token: Some(token),
                        skip: 0,
                    }
                }
                None => break None,
            }
        };

        self.hydrate_avatars(&mut items).await;
        Ok(Page {
            items,
            next_page_token: next.and_then(|at| at.encode()),
        })
    }

    async fn fetch_page(
        &self,
        shape: &QueryShape,
        page_token: Option<&str>,
        skip: usize,
        seen: &HashSet<String>,
    ) -> Result<UpstreamPage> {
        match shape {
            QueryShape::MostPopular {
                region,
                category_id,
            } => {
                let response = self
                    .client
                    .list_most_popular(region, page_token, category_id.as_deref())
                    .await?;
                let candidates = response
                    .items
                    .into_iter()
                    .enumerate()
                    .skip(skip)
                    .map(|(position, video)| {
                        NormalizedVideo::try_from(video).map(|video| (position, video))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(UpstreamPage {
                    candidates,
                    next_page_token: response.next_page_token,
                })
            }
            QueryShape::Search { query, region } => {
                let response = self
                    .client
                    .search_videos(query, page_token, region.as_deref())
                    .await?;
                self.hydrate_ids(response.video_ids(), response.next_page_token, skip, seen)
                    .await
            }
            QueryShape::Related { video_id } => {
                let response = self.client.search_related(video_id, page_token).await?;
                self.hydrate_ids(response.video_ids(), response.next_page_token, skip, seen)
                    .await
            }
        }
    }

    /// Turns an id-only page into full records, skipping the first `skip` entries and ids
    /// already collected.
    async fn hydrate_ids(
        &self,
        ids: Vec<String>,
        next_page_token: Option<String>,
        skip: usize,
        seen: &HashSet<String>,
    ) -> Result<UpstreamPage> {
        let mut fresh: Vec<(usize, String)> = Vec::with_capacity(ids.len());
        for (position, id) in ids.into_iter().enumerate().skip(skip) {
            if !seen.contains(&id) && !fresh.iter().any(|(_, f)| *f == id) {
                fresh.push((position, id));
            }
        }
        let wanted: Vec<String> = fresh.iter().map(|(_, id)| id.clone()).collect();
        let mut by_id: HashMap<String, NormalizedVideo> = self
            .fetch_videos(&wanted)
            .await?
            .into_iter()
            .map(|video| (video.id.clone(), video))
            .collect();
        Ok(UpstreamPage {
            candidates: fresh
                .into_iter()
                .filter_map(|(position, id)| by_id.remove(&id).map(|video| (position, video)))
                .collect(),
            next_page_token,
        })
    }
}
