//! Collaborator contracts consumed by the feed core
//!
//! Authentication, the social graph, post storage, profiles, engagement
//! counters and post creation all live behind these traits. The controller
//! receives them through [`FeedServices`], built once per application session.

mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{AuthorSnapshot, EngagementCounts, FeedFilter, NewPost, PageWindow, Post, Viewer};
use crate::config::Config;
use crate::services::{FeedQueryCascade, TieredQueryCascade};

pub use memory::{InMemoryBackend, Snapshot};

/// Supplies the signed-in viewer, if any.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_viewer(&self) -> Result<Option<Viewer>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Ids of the users `user_id` follows.
    async fn followings(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Tier-level post retrieval used by the query cascade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn posts_by_authors(
        &self,
        author_ids: &[String],
        filter: FeedFilter,
        window: PageWindow,
    ) -> Result<Vec<Post>>;

    async fn ambassador_posts(&self, filter: FeedFilter, window: PageWindow) -> Result<Vec<Post>>;

    /// Recent non-ambassador posts; ambassador content has its own tier.
    async fn public_posts(&self, filter: FeedFilter, window: PageWindow) -> Result<Vec<Post>>;
}

/// Missing ids simply have no entry in the returned map.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profiles(&self, user_ids: &[String]) -> Result<HashMap<String, AuthorSnapshot>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngagementCounters: Send + Sync {
    async fn counts(&self, post_id: &str) -> Result<EngagementCounts>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostPublisher: Send + Sync {
    /// Persist a post and return it with its server-assigned id and timestamp.
    async fn create_post(&self, post: NewPost) -> Result<Post>;
}

/// Explicitly constructed collaborator set handed to the controller.
#[derive(Clone)]
pub struct FeedServices {
    pub session: Arc<dyn SessionProvider>,
    pub graph: Arc<dyn SocialGraph>,
    pub cascade: Arc<dyn FeedQueryCascade>,
    pub profiles: Arc<dyn ProfileStore>,
    pub engagement: Arc<dyn EngagementCounters>,
    pub publisher: Arc<dyn PostPublisher>,
}

impl FeedServices {
    /// Wire every contract to one in-memory backend, with the tiered cascade
    /// reading from it.
    pub fn in_memory(backend: Arc<InMemoryBackend>, config: &Config) -> Self {
        let cascade = TieredQueryCascade::new(backend.clone(), config.pagination.page_size)
            .with_ambassador_cap(config.mixer.ambassador_cap);
        Self {
            session: backend.clone(),
            graph: backend.clone(),
            cascade: Arc::new(cascade),
            profiles: backend.clone(),
            engagement: backend.clone(),
            publisher: backend,
        }
    }
}
