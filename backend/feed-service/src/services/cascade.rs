use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::PostSource;
use crate::error::{FeedError, Result};
use crate::models::{FeedFilter, FeedMetrics, FeedPage, FeedQuery, PageWindow, Post, SourceTier};

/// Paginated candidate retrieval for one feed page.
///
/// Idempotent for identical queries modulo backend changes. An empty
/// `following_ids` list is valid and means the viewer follows nobody yet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedQueryCascade: Send + Sync {
    async fn fetch_page(&self, query: FeedQuery) -> Result<FeedPage>;
}

/// Walks followed → ambassador → public tiers until the page is full.
///
/// Outside the ambassadors-only filter, ambassador content taken from the
/// ambassador and public tiers is limited to `ambassador_cap` of a page so
/// it cannot crowd the public tier out.
pub struct TieredQueryCascade {
    source: Arc<dyn PostSource>,
    page_size: usize,
    ambassador_limit: usize,
}

impl TieredQueryCascade {
    pub fn new(source: Arc<dyn PostSource>, page_size: usize) -> Self {
        Self {
            source,
            page_size,
            ambassador_limit: page_size,
        }
    }

    pub fn with_ambassador_cap(mut self, cap: f64) -> Self {
        self.ambassador_limit = ((self.page_size as f64) * cap + 1e-9).floor() as usize;
        self
    }

    async fn fetch_tier(&self, tier: SourceTier, query: &FeedQuery, window: PageWindow) -> Result<Vec<Post>> {
        match tier {
            SourceTier::Followed => {
                self.source
                    .posts_by_authors(&query.following_ids, query.filter, window)
                    .await
            }
            SourceTier::Ambassador => self.source.ambassador_posts(query.filter, window).await,
            SourceTier::Public => self.source.public_posts(query.filter, window).await,
        }
    }
}

#[async_trait]
impl FeedQueryCascade for TieredQueryCascade {
    async fn fetch_page(&self, query: FeedQuery) -> Result<FeedPage> {
        let started = Instant::now();
        let window = PageWindow {
            offset: query.page as usize * self.page_size,
            limit: self.page_size,
        };

        let mut page = FeedPage::default();
        let mut metrics = FeedMetrics::default();
        let mut seen: HashSet<String> = query.existing_post_ids.clone();
        let mut attempted = 0usize;
        let mut failed = 0usize;
        let ambassador_limit = match query.filter {
            FeedFilter::Ambassadors => self.page_size,
            _ => self.ambassador_limit,
        };
        let mut ambassador_taken = 0usize;

        for (position, tier) in query.filter.tiers().iter().copied().enumerate() {
            if page.posts.len() >= self.page_size {
                break;
            }
            if tier == SourceTier::Followed && query.following_ids.is_empty() {
                page.debug_notes.push("followed tier skipped: no followings".to_string());
                continue;
            }

            attempted += 1;
            if position > 0 {
                metrics.fallback_tiers_used = true;
            }

            match self.fetch_tier(tier, &query, window).await {
                Ok(posts) => {
                    let fetched = posts.len();
                    let mut added = 0usize;
                    let mut capped = 0usize;
                    for post in posts {
                        let counts_as_ambassador =
                            tier != SourceTier::Followed && post.is_ambassador_content();
                        if counts_as_ambassador && ambassador_taken >= ambassador_limit {
                            capped += 1;
                            continue;
                        }
                        if !seen.insert(post.id.clone()) {
                            continue;
                        }
                        if counts_as_ambassador {
                            ambassador_taken += 1;
                        }
                        page.posts.push(post);
                        added += 1;
                    }
                    match tier {
                        SourceTier::Followed => metrics.followed_count += added,
                        SourceTier::Ambassador => metrics.ambassador_count += added,
                        SourceTier::Public => metrics.public_count += added,
                    }
                    page.debug_notes.push(format!(
                        "{} tier returned {} posts ({} new, {} over ambassador cap)",
                        tier.as_str(),
                        fetched,
                        added,
                        capped
                    ));
                }
                Err(e) => {
                    failed += 1;
                    warn!(tier = tier.as_str(), page = query.page, error = %e, "Feed tier query failed");
                    page.has_errors = true;
                    page.error_details.push(format!("{}: {}", tier.as_str(), e));
                }
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(FeedError::Store(page.error_details.join("; ")));
        }

        metrics.total_fetched = page.posts.len();
        metrics.ambassador_percentage = if page.posts.is_empty() {
            0.0
        } else {
            metrics.ambassador_count as f64 * 100.0 / page.posts.len() as f64
        };
        metrics.query_time_ms = started.elapsed().as_millis() as u64;
        page.ambassador_percentage = metrics.ambassador_percentage;
        page.metrics = metrics;

        info!(
            user_id = query.user_id.as_deref().unwrap_or("anonymous"),
            page = query.page,
            filter = %query.filter,
            followed = page.metrics.followed_count,
            ambassador = page.metrics.ambassador_count,
            public = page.metrics.public_count,
            "Feed page fetched"
        );
        debug!(notes = ?page.debug_notes, "Feed cascade trace");

        Ok(page)
    }
}
