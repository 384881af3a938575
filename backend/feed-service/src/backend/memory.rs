use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EngagementCounters, PostPublisher, PostSource, ProfileStore, SessionProvider, SocialGraph};
use crate::error::{FeedError, Result};
use crate::models::{
    AuthorSnapshot, EngagementCounts, FeedFilter, NewPost, PageWindow, Post, PrivacyLevel, Viewer,
};

/// Serialized backend contents, as read by the replay binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub viewer: Option<Viewer>,
    #[serde(default)]
    pub followings: Vec<String>,
    #[serde(default)]
    pub profiles: HashMap<String, AuthorSnapshot>,
    #[serde(default)]
    pub engagement: HashMap<String, EngagementCounts>,
    #[serde(default)]
    pub posts: Vec<Post>,
}

#[derive(Debug, Default)]
struct MemoryState {
    viewer: Option<Viewer>,
    followings: HashMap<String, Vec<String>>,
    posts: Vec<Post>,
    profiles: HashMap<String, AuthorSnapshot>,
    engagement: HashMap<String, EngagementCounts>,
    store_down: bool,
    profiles_down: bool,
    graph_down: bool,
    engagement_failures: HashSet<String>,
}

impl MemoryState {
    fn with_author(&self, post: &Post) -> Post {
        let mut post = post.clone();
        if post.author.is_none() && !self.profiles_down {
            post.author = self.profiles.get(&post.user_id).cloned();
        }
        post
    }

    fn page<F>(&self, filter: FeedFilter, window: PageWindow, keep: F) -> Result<Vec<Post>>
    where
        F: Fn(&Post) -> bool,
    {
        if self.store_down {
            return Err(FeedError::Store("post store unavailable".to_string()));
        }

        let mut matching: Vec<Post> = self
            .posts
            .iter()
            .map(|p| self.with_author(p))
            .filter(|p| keep(p) && filter.admits(p))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(window.offset)
            .take(window.limit)
            .collect())
    }
}

/// In-process implementation of every collaborator contract.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut followings = HashMap::new();
        if let Some(viewer) = &snapshot.viewer {
            followings.insert(viewer.user_id.clone(), snapshot.followings);
        }

        Self {
            state: RwLock::new(MemoryState {
                viewer: snapshot.viewer,
                followings,
                posts: snapshot.posts,
                profiles: snapshot.profiles,
                engagement: snapshot.engagement,
                ..MemoryState::default()
            }),
        }
    }

    pub async fn sign_in(&self, viewer: Option<Viewer>) {
        self.state.write().await.viewer = viewer;
    }

    pub async fn set_followings(&self, user_id: &str, followings: Vec<String>) {
        self.state
            .write()
            .await
            .followings
            .insert(user_id.to_string(), followings);
    }

    pub async fn insert_posts(&self, posts: impl IntoIterator<Item = Post>) {
        self.state.write().await.posts.extend(posts);
    }

    pub async fn insert_profile(&self, user_id: &str, profile: AuthorSnapshot) {
        self.state
            .write()
            .await
            .profiles
            .insert(user_id.to_string(), profile);
    }

    pub async fn set_counts(&self, post_id: &str, counts: EngagementCounts) {
        self.state
            .write()
            .await
            .engagement
            .insert(post_id.to_string(), counts);
    }

    pub async fn set_store_down(&self, down: bool) {
        self.state.write().await.store_down = down;
    }

    pub async fn set_profiles_down(&self, down: bool) {
        self.state.write().await.profiles_down = down;
    }

    pub async fn set_graph_down(&self, down: bool) {
        self.state.write().await.graph_down = down;
    }

    pub async fn fail_counts_for(&self, post_id: &str) {
        self.state
            .write()
            .await
            .engagement_failures
            .insert(post_id.to_string());
    }
}

#[async_trait]
impl SessionProvider for InMemoryBackend {
    async fn current_viewer(&self) -> Result<Option<Viewer>> {
        Ok(self.state.read().await.viewer.clone())
    }
}

#[async_trait]
impl SocialGraph for InMemoryBackend {
    async fn followings(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        if state.graph_down {
            return Err(FeedError::Graph("social graph unavailable".to_string()));
        }
        Ok(state.followings.get(user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PostSource for InMemoryBackend {
    async fn posts_by_authors(
        &self,
        author_ids: &[String],
        filter: FeedFilter,
        window: PageWindow,
    ) -> Result<Vec<Post>> {
        let authors: HashSet<&str> = author_ids.iter().map(String::as_str).collect();
        self.state
            .read()
            .await
            .page(filter, window, |p| authors.contains(p.user_id.as_str()))
    }

    async fn ambassador_posts(&self, filter: FeedFilter, window: PageWindow) -> Result<Vec<Post>> {
        self.state
            .read()
            .await
            .page(filter, window, |p| p.is_ambassador_content())
    }

    /// Recent posts outside the `private` tier; visibility is enforced downstream.
    async fn public_posts(&self, filter: FeedFilter, window: PageWindow) -> Result<Vec<Post>> {
        self.state.read().await.page(filter, window, |p| {
            p.privacy_level != PrivacyLevel::Private && !p.is_ambassador_content()
        })
    }
}

#[async_trait]
impl ProfileStore for InMemoryBackend {
    async fn profiles(&self, user_ids: &[String]) -> Result<HashMap<String, AuthorSnapshot>> {
        let state = self.state.read().await;
        if state.profiles_down {
            return Err(FeedError::Profile("profile store unavailable".to_string()));
        }
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

#[async_trait]
impl EngagementCounters for InMemoryBackend {
    async fn counts(&self, post_id: &str) -> Result<EngagementCounts> {
        let state = self.state.read().await;
        if state.engagement_failures.contains(post_id) {
            return Err(FeedError::Engagement(format!("counter lookup failed for {}", post_id)));
        }
        Ok(state.engagement.get(post_id).copied().unwrap_or_default())
    }
}

#[async_trait]
impl PostPublisher for InMemoryBackend {
    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let mut state = self.state.write().await;
        if state.store_down {
            return Err(FeedError::Publish("post store unavailable".to_string()));
        }

        let persisted = Post {
            id: Uuid::new_v4().to_string(),
            user_id: post.user_id,
            content: post.content,
            privacy_level: post.privacy_level,
            media_url: post.media_url,
            media_type: post.media_type,
            is_auto_generated: false,
            engagement_score: 0.0,
            likes_count: 0,
            comments_count: 0,
            author: None,
            created_at: Utc::now(),
        };
        state.posts.push(persisted.clone());
        Ok(persisted)
    }
}
