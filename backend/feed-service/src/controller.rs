//! Feed cascade controller
//!
//! Owns the materialized feed state and drives every transition:
//!
//! ```text
//! Idle ──load──▶ Loading ──▶ Ready ──load_more──▶ LoadingMore ──▶ Ready
//!                    │                    │
//!                    └───── failure ──────┴──▶ Error (previous posts kept)
//! ```
//!
//! Loads, refreshes and filter changes bump a generation token; a response
//! whose token is no longer current is dropped instead of committed. The
//! requested filter only becomes `current_filter` once its page commits.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::FeedServices;
use crate::config::{Config, PaginationConfig};
use crate::error::Result;
use crate::models::{
    FeedCascadeState, FeedFilter, FeedQuery, FeedStatus, NewPost, Post, PrivacyContext,
};
use crate::services::{FeedPipeline, OptimisticPostOverlay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Realtime notification that the post table changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub kind: ChangeKind,
    #[serde(default)]
    pub post_id: Option<String>,
}

pub struct FeedController {
    services: FeedServices,
    pipeline: FeedPipeline,
    overlay: OptimisticPostOverlay,
    pagination: PaginationConfig,
    state: RwLock<FeedCascadeState>,
    generation: AtomicU64,
}

impl FeedController {
    pub fn new(services: FeedServices, config: &Config) -> Self {
        Self {
            services,
            pipeline: FeedPipeline::new(config.mixer.clone(), config.guarantee.clone()),
            overlay: OptimisticPostOverlay::new(config.overlay.ttl()),
            pagination: config.pagination.clone(),
            state: RwLock::new(FeedCascadeState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> FeedCascadeState {
        self.state.read().await.clone()
    }

    pub fn overlay(&self) -> &OptimisticPostOverlay {
        &self.overlay
    }

    /// Overlay entries newest first, then the committed server posts.
    pub async fn displayed_posts(&self) -> Vec<Post> {
        let optimistic = self.overlay.posts();
        let optimistic_ids: HashSet<String> = optimistic.iter().map(|p| p.id.clone()).collect();

        let state = self.state.read().await;
        optimistic
            .into_iter()
            .chain(
                state
                    .posts
                    .iter()
                    .filter(|p| !optimistic_ids.contains(&p.id))
                    .cloned(),
            )
            .collect()
    }

    /// Fetch `page` for `filter`. Page 0 replaces the feed, later pages append.
    pub async fn load(&self, page: u32, existing_posts: &[Post], filter: FeedFilter) -> FeedCascadeState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.write().await;
            if page == 0 {
                state.status = FeedStatus::Loading;
                state.is_loading = true;
            } else {
                state.status = FeedStatus::LoadingMore;
                state.is_loading_more = true;
            }
        }

        let existing: HashSet<String> = existing_posts.iter().map(|p| p.id.clone()).collect();
        self.fetch_and_commit(generation, page, existing, filter).await
    }

    /// Next page of the current feed. No-op while any load is in flight or
    /// when the feed is exhausted.
    pub async fn load_more(&self) -> FeedCascadeState {
        let (page, existing, filter) = {
            let mut state = self.state.write().await;
            if state.is_loading || state.is_loading_more || !state.has_more {
                debug!(
                    is_loading = state.is_loading,
                    is_loading_more = state.is_loading_more,
                    has_more = state.has_more,
                    "load_more skipped"
                );
                return state.clone();
            }
            state.status = FeedStatus::LoadingMore;
            state.is_loading_more = true;

            let existing: HashSet<String> = state.posts.iter().map(|p| p.id.clone()).collect();
            (state.page + 1, existing, state.current_filter)
        };

        let generation = self.generation.load(Ordering::SeqCst);
        self.fetch_and_commit(generation, page, existing, filter).await
    }

    /// Drop every optimistic post and reload page 0, optionally switching filter.
    pub async fn refresh(&self, filter: Option<FeedFilter>) -> FeedCascadeState {
        let cleared = self.overlay.clear();
        let filter = match filter {
            Some(filter) => filter,
            None => self.state.read().await.current_filter,
        };
        info!(filter = %filter, cleared_optimistic = cleared, "Refreshing feed");
        self.load(0, &[], filter).await
    }

    pub async fn handle_change_notification(&self, notice: ChangeNotice) -> FeedCascadeState {
        debug!(kind = ?notice.kind, post_id = ?notice.post_id, "Post change notice received");
        self.refresh(None).await
    }

    /// Show a post ahead of the feed until it expires or is acknowledged.
    pub fn add_new_post(&self, post: Post) -> u64 {
        self.overlay.add(post)
    }

    pub fn acknowledge(&self, post_id: &str) -> bool {
        self.overlay.acknowledge(post_id)
    }

    /// Publish a post, showing a provisional copy while the call is in flight.
    ///
    /// On success the provisional entry is swapped for the persisted post and
    /// keeps its expiry timer; on failure it is removed.
    pub async fn create_post(&self, new_post: NewPost) -> Result<Post> {
        let provisional = Post {
            id: format!("optimistic-{}", Uuid::new_v4()),
            user_id: new_post.user_id.clone(),
            content: new_post.content.clone(),
            privacy_level: new_post.privacy_level.clone(),
            media_url: new_post.media_url.clone(),
            media_type: new_post.media_type,
            is_auto_generated: false,
            engagement_score: 0.0,
            likes_count: 0,
            comments_count: 0,
            author: None,
            created_at: Utc::now(),
        };
        let slot = self.overlay.add(provisional);

        match self.services.publisher.create_post(new_post).await {
            Ok(persisted) => {
                info!(post_id = %persisted.id, user_id = %persisted.user_id, "Post published");
                self.overlay.reconcile(slot, persisted.clone());
                Ok(persisted)
            }
            Err(e) => {
                warn!(error = %e, "Post publish failed, dropping provisional post");
                self.overlay.remove_slot(slot);
                Err(e)
            }
        }
    }

    async fn privacy_context(&self) -> PrivacyContext {
        let viewer = match self.services.session.current_viewer().await {
            Ok(viewer) => viewer,
            Err(e) => {
                warn!(error = %e, "Session lookup failed, continuing as anonymous viewer");
                None
            }
        };

        let Some(viewer) = viewer else {
            return PrivacyContext::anonymous();
        };

        let followings = match self.services.graph.followings(&viewer.user_id).await {
            Ok(followings) => followings,
            Err(e) => {
                warn!(
                    user_id = %viewer.user_id,
                    error = %e,
                    "Failed to fetch followings, falling back to global feed"
                );
                Vec::new()
            }
        };

        PrivacyContext::for_viewer(&viewer, followings)
    }

    /// Attach author profiles and engagement counts. Lookups run concurrently;
    /// a failed lookup leaves the affected fields at their defaults.
    async fn enrich(&self, mut posts: Vec<Post>) -> Vec<Post> {
        if posts.is_empty() {
            return posts;
        }

        let mut author_ids: Vec<String> = posts.iter().map(|p| p.user_id.clone()).collect();
        author_ids.sort();
        author_ids.dedup();

        let profiles = self.services.profiles.profiles(&author_ids);
        let counts = join_all(posts.iter().map(|p| self.services.engagement.counts(&p.id)));
        let (profiles, counts) = futures::join!(profiles, counts);

        let profiles = profiles.unwrap_or_else(|e| {
            warn!(authors = author_ids.len(), error = %e, "Profile lookup failed");
            HashMap::new()
        });

        for (post, count) in posts.iter_mut().zip(counts) {
            if let Some(profile) = profiles.get(&post.user_id) {
                post.author = Some(profile.clone());
            }
            match count {
                Ok(count) => {
                    post.likes_count = count.likes_count;
                    post.comments_count = count.comments_count;
                }
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "Engagement lookup failed, defaulting to 0");
                    post.likes_count = 0;
                    post.comments_count = 0;
                }
            }
        }

        posts
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn fetch_and_commit(
        &self,
        generation: u64,
        page: u32,
        existing_post_ids: HashSet<String>,
        filter: FeedFilter,
    ) -> FeedCascadeState {
        let ctx = self.privacy_context().await;

        let mut following_ids: Vec<String> = ctx.user_followings.iter().cloned().collect();
        following_ids.sort();

        let query = FeedQuery {
            user_id: ctx.current_user_id.clone(),
            following_ids,
            page,
            existing_post_ids,
            filter,
        };

        let fetched = match self.services.cascade.fetch_page(query).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let mut state = self.state.write().await;
                if !self.is_current(generation) {
                    debug!(generation, page, "Discarding superseded failure");
                    return state.clone();
                }
                warn!(page, filter = %filter, error = %e, "Feed load failed");
                state.status = FeedStatus::Error;
                state.is_loading = false;
                state.is_loading_more = false;
                state.has_errors = true;
                state.error_details = vec![e.to_string()];
                return state.clone();
            }
        };

        let fetched_count = fetched.posts.len();
        let outcome = self.pipeline.process(&fetched.posts, &ctx);
        let posts = self.enrich(outcome.posts).await;

        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            debug!(generation, page, "Discarding superseded feed page");
            return state.clone();
        }

        if page == 0 {
            state.posts = posts;
        } else {
            let known: HashSet<String> = state.posts.iter().map(|p| p.id.clone()).collect();
            state
                .posts
                .extend(posts.into_iter().filter(|p| !known.contains(&p.id)));
        }

        state.page = page;
        state.current_filter = filter;
        state.has_more = fetched_count >= self.pagination.page_size && page < self.pagination.max_page;
        state.metrics = fetched.metrics;
        state.metrics.displayed_count = state.posts.len();
        state.metrics.pipeline_fallback = outcome.used_fallback;
        state.has_errors = fetched.has_errors;
        state.error_details = fetched.error_details;
        state.status = FeedStatus::Ready;
        state.is_loading = false;
        state.is_loading_more = false;

        let mut acknowledged = 0usize;
        for post in &state.posts {
            if self.overlay.acknowledge(&post.id) {
                acknowledged += 1;
            }
        }

        info!(
            user_id = ctx.current_user_id.as_deref().unwrap_or("anonymous"),
            page,
            filter = %filter,
            fetched = fetched_count,
            displayed = state.posts.len(),
            has_more = state.has_more,
            new_user = outcome.new_user,
            acknowledged,
            "Feed page committed"
        );

        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::backend::{
        EngagementCounters, InMemoryBackend, MockEngagementCounters, MockPostPublisher, MockProfileStore,
        MockSessionProvider, MockSocialGraph,
    };
    use crate::error::FeedError;
    use crate::models::{AuthorSnapshot, EngagementCounts, FeedPage, PrivacyLevel, UserType, Viewer};
    use crate::services::fixtures::{create_test_post, PostFixture};
    use crate::services::{FeedQueryCascade, MockFeedQueryCascade};

    /// Public posts by distinct authors, newest first.
    fn distinct_posts(prefix: &str, count: usize) -> Vec<Post> {
        (0..count)
            .map(|i| {
                create_test_post(&format!("{}{}", prefix, i), &format!("{}-author{}", prefix, i), "public")
                    .minutes_ago(i as i64)
            })
            .collect()
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    fn in_memory(backend: &Arc<InMemoryBackend>) -> FeedController {
        let config = Config::default();
        FeedController::new(
            FeedServices::in_memory(backend.clone(), &config),
            &config,
        )
    }

    fn mocked(
        cascade: Arc<dyn FeedQueryCascade>,
        profiles: MockProfileStore,
        engagement: MockEngagementCounters,
    ) -> FeedController {
        let mut session = MockSessionProvider::new();
        session.expect_current_viewer().returning(|| Ok(None));

        FeedController::new(
            FeedServices {
                session: Arc::new(session),
                graph: Arc::new(MockSocialGraph::new()),
                cascade,
                profiles: Arc::new(profiles),
                engagement: Arc::new(engagement),
                publisher: Arc::new(MockPostPublisher::new()),
            },
            &Config::default(),
        )
    }

    fn quiet_lookups() -> (MockProfileStore, MockEngagementCounters) {
        let mut profiles = MockProfileStore::new();
        profiles.expect_profiles().returning(|_| Ok(HashMap::new()));
        let mut engagement = MockEngagementCounters::new();
        engagement
            .expect_counts()
            .returning(|_| Ok(EngagementCounts::default()));
        (profiles, engagement)
    }

    fn me() -> Viewer {
        Viewer {
            user_id: "me".to_string(),
            user_type: Some(UserType::Player),
            is_coach: false,
        }
    }

    #[tokio::test]
    async fn test_first_load_commits_ready_state() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 3)).await;
        let controller = in_memory(&backend);

        let state = controller.load(0, &[], FeedFilter::All).await;

        assert_eq!(state.status, FeedStatus::Ready);
        assert_eq!(ids(&state.posts), vec!["p0", "p1", "p2"]);
        assert!(!state.is_loading);
        assert!(!state.is_loading_more);
        assert!(!state.has_more);
        assert_eq!(state.metrics.displayed_count, 3);
    }

    #[tokio::test]
    async fn test_failed_first_load_leaves_empty_error_state() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_store_down(true).await;
        let controller = in_memory(&backend);

        let state = controller.load(0, &[], FeedFilter::All).await;

        assert_eq!(state.status, FeedStatus::Error);
        assert!(state.posts.is_empty());
        assert!(state.has_errors);
        assert!(!state.error_details.is_empty());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_posts() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 3)).await;
        let controller = in_memory(&backend);
        controller.load(0, &[], FeedFilter::All).await;

        backend.set_store_down(true).await;
        let state = controller.refresh(None).await;

        assert_eq!(state.status, FeedStatus::Error);
        assert_eq!(state.posts.len(), 3);
        assert!(state.has_errors);
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_load_more_appends_until_exhausted() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 20)).await;
        let controller = in_memory(&backend);

        let first = controller.load(0, &[], FeedFilter::All).await;
        assert!(first.has_more);
        assert_eq!(first.posts.len(), 8);

        let second = controller.load_more().await;
        assert_eq!(second.page, 1);
        assert_eq!(second.posts.len(), 13);
        assert_eq!(second.posts[8].id, "p15");
        assert!(!second.has_more);

        let third = controller.load_more().await;
        assert_eq!(third.page, 1);
        assert_eq!(third.posts.len(), 13);
    }

    #[tokio::test]
    async fn test_max_page_stops_pagination() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 20)).await;

        let mut config = Config::default();
        config.pagination.max_page = 0;
        let controller = FeedController::new(
            FeedServices::in_memory(backend.clone(), &config),
            &config,
        );

        let state = controller.load(0, &[], FeedFilter::All).await;
        assert!(!state.has_more);
    }

    #[tokio::test]
    async fn test_last_page_index_closes_pagination() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 35)).await;

        let mut config = Config::default();
        config.pagination.max_page = 1;
        let controller = FeedController::new(
            FeedServices::in_memory(backend.clone(), &config),
            &config,
        );

        let first = controller.load(0, &[], FeedFilter::All).await;
        assert!(first.has_more);

        let second = controller.load_more().await;
        assert_eq!(second.page, 1);
        assert!(!second.has_more);

        let third = controller.load_more().await;
        assert_eq!(third.page, 1);
    }

    #[tokio::test]
    async fn test_failed_filter_switch_keeps_previous_filter() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 20)).await;
        let controller = in_memory(&backend);

        let first = controller.load(0, &[], FeedFilter::All).await;
        assert!(first.has_more);

        backend.set_store_down(true).await;
        let failed = controller.refresh(Some(FeedFilter::Ambassadors)).await;
        assert_eq!(failed.status, FeedStatus::Error);
        assert_eq!(failed.current_filter, FeedFilter::All);
        assert_eq!(failed.posts, first.posts);

        backend.set_store_down(false).await;
        let more = controller.load_more().await;
        assert_eq!(more.status, FeedStatus::Ready);
        assert_eq!(more.current_filter, FeedFilter::All);
        assert_eq!(more.page, 1);
        assert_eq!(more.posts[8].id, "p15");
    }

    #[tokio::test]
    async fn test_load_more_without_more_skips_fetch() {
        let mut cascade = MockFeedQueryCascade::new();
        cascade.expect_fetch_page().times(1).returning(|_| {
            Ok(FeedPage {
                posts: distinct_posts("p", 2),
                ..FeedPage::default()
            })
        });
        let (profiles, engagement) = quiet_lookups();
        let controller = mocked(Arc::new(cascade), profiles, engagement);

        controller.load(0, &[], FeedFilter::All).await;
        let state = controller.load_more().await;

        assert_eq!(state.page, 0);
        assert_eq!(state.posts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_displayed_posts_put_optimistic_first_and_expire() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 2)).await;
        let controller = in_memory(&backend);
        controller.load(0, &[], FeedFilter::All).await;

        controller.add_new_post(create_test_post("draft-1", "me", "public"));
        controller.add_new_post(create_test_post("draft-2", "me", "public"));

        let displayed = controller.displayed_posts().await;
        assert_eq!(ids(&displayed), vec!["draft-2", "draft-1", "p0", "p1"]);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let displayed = controller.displayed_posts().await;
        assert_eq!(ids(&displayed), vec!["p0", "p1"]);
    }

    #[tokio::test]
    async fn test_refresh_clears_overlay() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 1)).await;
        let controller = in_memory(&backend);

        controller.add_new_post(create_test_post("draft", "me", "public"));
        controller.refresh(Some(FeedFilter::All)).await;

        assert!(controller.overlay().is_empty());
        assert_eq!(ids(&controller.displayed_posts().await), vec!["p0"]);
    }

    #[tokio::test]
    async fn test_refresh_switches_filter() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .insert_posts(vec![
                create_test_post("plain", "a", "public"),
                create_test_post("bot", "b", "public").auto_generated().minutes_ago(1),
            ])
            .await;
        let controller = in_memory(&backend);

        let state = controller.refresh(Some(FeedFilter::Ambassadors)).await;

        assert_eq!(state.current_filter, FeedFilter::Ambassadors);
        assert_eq!(ids(&state.posts), vec!["bot"]);
    }

    #[tokio::test]
    async fn test_create_post_reconciles_provisional_entry() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.sign_in(Some(me())).await;
        let controller = in_memory(&backend);

        let persisted = controller
            .create_post(NewPost {
                content: "Match point!".to_string(),
                media_url: None,
                media_type: None,
                privacy_level: PrivacyLevel::Public,
                user_id: "me".to_string(),
            })
            .await
            .unwrap();

        let displayed = controller.displayed_posts().await;
        assert_eq!(displayed.len(), 1);
        assert_eq!(displayed[0].id, persisted.id);

        // Once the server page contains it, the optimistic copy is acknowledged
        let state = controller.load(0, &[], FeedFilter::All).await;
        assert_eq!(ids(&state.posts), vec![persisted.id.as_str()]);
        assert!(controller.overlay().is_empty());
        assert_eq!(controller.displayed_posts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_post_failure_removes_provisional_entry() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_store_down(true).await;
        let controller = in_memory(&backend);

        let result = controller
            .create_post(NewPost {
                content: "lost".to_string(),
                media_url: None,
                media_type: None,
                privacy_level: PrivacyLevel::Public,
                user_id: "me".to_string(),
            })
            .await;

        assert!(matches!(result, Err(FeedError::Publish(_))));
        assert!(controller.overlay().is_empty());
    }

    #[tokio::test]
    async fn test_change_notification_refetches() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert_posts(distinct_posts("p", 1)).await;
        let controller = in_memory(&backend);
        controller.load(0, &[], FeedFilter::All).await;

        backend
            .insert_posts(vec![create_test_post("fresh", "z", "public").minutes_ago(-5)])
            .await;
        let state = controller
            .handle_change_notification(ChangeNotice {
                kind: ChangeKind::Insert,
                post_id: Some("fresh".to_string()),
            })
            .await;

        assert_eq!(ids(&state.posts), vec!["fresh", "p0"]);
    }

    #[tokio::test]
    async fn test_session_failure_degrades_to_anonymous() {
        let mut session = MockSessionProvider::new();
        session
            .expect_current_viewer()
            .returning(|| Err(FeedError::Session("token expired".to_string())));

        let mut cascade = MockFeedQueryCascade::new();
        cascade
            .expect_fetch_page()
            .withf(|q| q.user_id.is_none() && q.following_ids.is_empty())
            .times(1)
            .returning(|_| {
                Ok(FeedPage {
                    posts: vec![
                        create_test_post("open", "a", "public"),
                        create_test_post("closed", "b", "friends"),
                    ],
                    ..FeedPage::default()
                })
            });
        let (profiles, engagement) = quiet_lookups();

        let controller = FeedController::new(
            FeedServices {
                session: Arc::new(session),
                graph: Arc::new(MockSocialGraph::new()),
                cascade: Arc::new(cascade),
                profiles: Arc::new(profiles),
                engagement: Arc::new(engagement),
                publisher: Arc::new(MockPostPublisher::new()),
            },
            &Config::default(),
        );

        let state = controller.load(0, &[], FeedFilter::All).await;
        assert_eq!(ids(&state.posts), vec!["open"]);
    }

    #[tokio::test]
    async fn test_graph_failure_degrades_to_global_feed() {
        let mut session = MockSessionProvider::new();
        session.expect_current_viewer().returning(|| Ok(Some(me())));
        let mut graph = MockSocialGraph::new();
        graph
            .expect_followings()
            .returning(|_| Err(FeedError::Graph("unreachable".to_string())));

        let mut cascade = MockFeedQueryCascade::new();
        cascade
            .expect_fetch_page()
            .withf(|q| q.user_id.as_deref() == Some("me") && q.following_ids.is_empty())
            .times(1)
            .returning(|_| {
                Ok(FeedPage {
                    posts: distinct_posts("p", 2),
                    ..FeedPage::default()
                })
            });
        let (profiles, engagement) = quiet_lookups();

        let controller = FeedController::new(
            FeedServices {
                session: Arc::new(session),
                graph: Arc::new(graph),
                cascade: Arc::new(cascade),
                profiles: Arc::new(profiles),
                engagement: Arc::new(engagement),
                publisher: Arc::new(MockPostPublisher::new()),
            },
            &Config::default(),
        );

        let state = controller.load(0, &[], FeedFilter::All).await;
        assert_eq!(state.status, FeedStatus::Ready);
        assert_eq!(state.posts.len(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_isolates_lookup_failures() {
        let mut cascade = MockFeedQueryCascade::new();
        cascade.expect_fetch_page().returning(|_| {
            Ok(FeedPage {
                posts: vec![
                    create_test_post("p0", "u0", "public"),
                    create_test_post("p1", "u1", "public").minutes_ago(1),
                ],
                ..FeedPage::default()
            })
        });

        let mut profiles = MockProfileStore::new();
        profiles.expect_profiles().returning(|_| {
            let mut found = HashMap::new();
            found.insert(
                "u0".to_string(),
                AuthorSnapshot {
                    full_name: "Zoe Park".to_string(),
                    user_type: UserType::Coach,
                    avatar_url: None,
                },
            );
            Ok(found)
        });

        let mut engagement = MockEngagementCounters::new();
        engagement.expect_counts().returning(|post_id| {
            if post_id == "p1" {
                Err(FeedError::Engagement("counter timeout".to_string()))
            } else {
                Ok(EngagementCounts {
                    likes_count: 5,
                    comments_count: 2,
                })
            }
        });

        let controller = mocked(Arc::new(cascade), profiles, engagement);
        let state = controller.load(0, &[], FeedFilter::All).await;

        assert_eq!(state.posts.len(), 2);
        let p0 = &state.posts[0];
        assert_eq!(p0.author.as_ref().map(|a| a.full_name.as_str()), Some("Zoe Park"));
        assert_eq!((p0.likes_count, p0.comments_count), (5, 2));

        let p1 = &state.posts[1];
        assert!(p1.author.is_none());
        assert_eq!((p1.likes_count, p1.comments_count), (0, 0));
    }

    #[tokio::test]
    async fn test_profile_outage_keeps_posts() {
        let mut cascade = MockFeedQueryCascade::new();
        cascade.expect_fetch_page().returning(|_| {
            Ok(FeedPage {
                posts: distinct_posts("p", 2),
                ..FeedPage::default()
            })
        });
        let mut profiles = MockProfileStore::new();
        profiles
            .expect_profiles()
            .returning(|_| Err(FeedError::Profile("down".to_string())));
        let (_, engagement) = quiet_lookups();

        let controller = mocked(Arc::new(cascade), profiles, engagement);
        let state = controller.load(0, &[], FeedFilter::All).await;

        assert_eq!(state.posts.len(), 2);
        assert!(state.posts.iter().all(|p| p.author.is_none()));
    }

    /// Answers `following` slowly and everything else immediately.
    struct SlowFollowingCascade;

    #[async_trait]
    impl FeedQueryCascade for SlowFollowingCascade {
        async fn fetch_page(&self, query: FeedQuery) -> Result<FeedPage> {
            if query.filter == FeedFilter::Following {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(FeedPage {
                posts: distinct_posts(query.filter.as_str(), 2),
                ..FeedPage::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_response_is_discarded() {
        let (profiles, engagement) = quiet_lookups();
        let controller = mocked(Arc::new(SlowFollowingCascade), profiles, engagement);

        let (_, refreshed) = tokio::join!(controller.load(0, &[], FeedFilter::Following), async {
            tokio::task::yield_now().await;
            controller.refresh(Some(FeedFilter::All)).await
        });

        assert_eq!(refreshed.current_filter, FeedFilter::All);
        let state = controller.state().await;
        assert_eq!(state.current_filter, FeedFilter::All);
        assert_eq!(ids(&state.posts), vec!["all0", "all1"]);
        assert_eq!(state.status, FeedStatus::Ready);
    }

    /// Every lookup takes five seconds.
    struct SlowCounters;

    #[async_trait]
    impl EngagementCounters for SlowCounters {
        async fn counts(&self, _post_id: &str) -> Result<EngagementCounts> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EngagementCounts {
                likes_count: 1,
                comments_count: 0,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engagement_lookups_run_concurrently() {
        let mut cascade = MockFeedQueryCascade::new();
        cascade.expect_fetch_page().returning(|_| {
            Ok(FeedPage {
                posts: distinct_posts("p", 3),
                ..FeedPage::default()
            })
        });
        let mut session = MockSessionProvider::new();
        session.expect_current_viewer().returning(|| Ok(None));
        let (profiles, _) = quiet_lookups();

        let controller = FeedController::new(
            FeedServices {
                session: Arc::new(session),
                graph: Arc::new(MockSocialGraph::new()),
                cascade: Arc::new(cascade),
                profiles: Arc::new(profiles),
                engagement: Arc::new(SlowCounters),
                publisher: Arc::new(MockPostPublisher::new()),
            },
            &Config::default(),
        );

        let started = tokio::time::Instant::now();
        let state = controller.load(0, &[], FeedFilter::All).await;

        assert_eq!(state.posts.len(), 3);
        assert!(state.posts.iter().all(|p| p.likes_count == 1));
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
