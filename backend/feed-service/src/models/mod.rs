use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::FeedError;

/// Five-tier visibility classification of a post.
///
/// Unknown wire values are kept in `Unrecognized` so they can be failed
/// closed by the privacy filter instead of being coerced to a known tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PrivacyLevel {
    Public,
    PublicHighlights,
    Friends,
    Coaches,
    Private,
    Unrecognized(String),
}

/// Three-way display scheme used by profile and post-detail consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimplePrivacyLevel {
    Public,
    PublicHighlights,
    Private,
}

impl PrivacyLevel {
    pub fn as_str(&self) -> &str {
        match self {
            PrivacyLevel::Public => "public",
            PrivacyLevel::PublicHighlights => "public_highlights",
            PrivacyLevel::Friends => "friends",
            PrivacyLevel::Coaches => "coaches",
            PrivacyLevel::Private => "private",
            PrivacyLevel::Unrecognized(raw) => raw,
        }
    }

    /// Collapse legacy tiers into the three-way scheme.
    pub fn normalized(&self) -> SimplePrivacyLevel {
        match self {
            PrivacyLevel::Public => SimplePrivacyLevel::Public,
            PrivacyLevel::PublicHighlights => SimplePrivacyLevel::PublicHighlights,
            PrivacyLevel::Friends
            | PrivacyLevel::Coaches
            | PrivacyLevel::Private
            | PrivacyLevel::Unrecognized(_) => SimplePrivacyLevel::Private,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, PrivacyLevel::Public)
    }
}

impl From<String> for PrivacyLevel {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "public" => PrivacyLevel::Public,
            "public_highlights" => PrivacyLevel::PublicHighlights,
            "friends" => PrivacyLevel::Friends,
            "coaches" => PrivacyLevel::Coaches,
            "private" => PrivacyLevel::Private,
            _ => PrivacyLevel::Unrecognized(raw),
        }
    }
}

impl From<&str> for PrivacyLevel {
    fn from(raw: &str) -> Self {
        PrivacyLevel::from(raw.to_string())
    }
}

impl From<PrivacyLevel> for String {
    fn from(level: PrivacyLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserType {
    Player,
    Coach,
    Ambassador,
    Admin,
    Other(String),
}

impl UserType {
    pub fn as_str(&self) -> &str {
        match self {
            UserType::Player => "player",
            UserType::Coach => "coach",
            UserType::Ambassador => "ambassador",
            UserType::Admin => "admin",
            UserType::Other(raw) => raw,
        }
    }
}

impl From<String> for UserType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "player" => UserType::Player,
            "coach" => UserType::Coach,
            "ambassador" => UserType::Ambassador,
            "admin" => UserType::Admin,
            _ => UserType::Other(raw),
        }
    }
}

impl From<UserType> for String {
    fn from(user_type: UserType) -> Self {
        user_type.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

/// Denormalized author snapshot attached after fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub full_name: String,
    pub user_type: UserType,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub privacy_level: PrivacyLevel,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default)]
    pub engagement_score: f64,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub author: Option<AuthorSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Posts produced by the ambassador pipeline or authored by an ambassador account.
    pub fn is_ambassador_content(&self) -> bool {
        self.is_auto_generated
            || matches!(
                self.author.as_ref().map(|a| &a.user_type),
                Some(UserType::Ambassador)
            )
    }

    pub fn has_media(&self) -> bool {
        self.media_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Creation payload for the post endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub content: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    pub privacy_level: PrivacyLevel,
    pub user_id: String,
}

/// A post held locally before the backend confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticPost {
    pub post: Post,
    pub is_optimistic: bool,
    pub added_at: DateTime<Utc>,
}

/// The requesting viewer as reported by the session provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: String,
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub is_coach: bool,
}

/// Per-request snapshot of who is looking and whom they follow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrivacyContext {
    pub current_user_id: Option<String>,
    pub user_followings: HashSet<String>,
    pub user_type: Option<UserType>,
    pub is_coach: bool,
}

impl PrivacyContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_viewer(viewer: &Viewer, followings: impl IntoIterator<Item = String>) -> Self {
        Self {
            current_user_id: Some(viewer.user_id.clone()),
            user_followings: followings.into_iter().collect(),
            user_type: viewer.user_type.clone(),
            is_coach: viewer.is_coach,
        }
    }

    pub fn following_count(&self) -> usize {
        self.user_followings.len()
    }

    pub fn follows(&self, user_id: &str) -> bool {
        self.user_followings.contains(user_id)
    }

    pub fn viewer_is_coach(&self) -> bool {
        self.is_coach || matches!(self.user_type, Some(UserType::Coach))
    }

    pub fn is_own(&self, post: &Post) -> bool {
        self.current_user_id.as_deref() == Some(post.user_id.as_str())
    }
}

/// Retrieval tier of the query cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Followed,
    Ambassador,
    Public,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Followed => "followed",
            SourceTier::Ambassador => "ambassador",
            SourceTier::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFilter {
    #[default]
    All,
    Following,
    Ambassadors,
    Media,
    Coaching,
}

impl FeedFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFilter::All => "all",
            FeedFilter::Following => "following",
            FeedFilter::Ambassadors => "ambassadors",
            FeedFilter::Media => "media",
            FeedFilter::Coaching => "coaching",
        }
    }

    /// Tiers the cascade walks for this filter, in escalation order.
    pub fn tiers(&self) -> &'static [SourceTier] {
        match self {
            FeedFilter::All | FeedFilter::Media => {
                &[SourceTier::Followed, SourceTier::Ambassador, SourceTier::Public]
            }
            FeedFilter::Following => &[SourceTier::Followed],
            FeedFilter::Ambassadors => &[SourceTier::Ambassador],
            FeedFilter::Coaching => &[SourceTier::Followed, SourceTier::Public],
        }
    }

    /// Content predicate a post source applies for this filter.
    pub fn admits(&self, post: &Post) -> bool {
        match self {
            FeedFilter::All | FeedFilter::Following => true,
            FeedFilter::Ambassadors => post.is_ambassador_content(),
            FeedFilter::Media => post.has_media(),
            FeedFilter::Coaching => matches!(
                post.author.as_ref().map(|a| &a.user_type),
                Some(UserType::Coach)
            ),
        }
    }
}

impl FromStr for FeedFilter {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(FeedFilter::All),
            "following" => Ok(FeedFilter::Following),
            "ambassadors" => Ok(FeedFilter::Ambassadors),
            "media" => Ok(FeedFilter::Media),
            "coaching" => Ok(FeedFilter::Coaching),
            other => Err(FeedError::InvalidFilter(other.to_string())),
        }
    }
}

impl fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offset/limit window handed to a post source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub limit: usize,
}

/// Arguments of a post store page request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedQuery {
    pub user_id: Option<String>,
    pub following_ids: Vec<String>,
    pub page: u32,
    pub existing_post_ids: HashSet<String>,
    pub filter: FeedFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMetrics {
    pub followed_count: usize,
    pub ambassador_count: usize,
    pub public_count: usize,
    pub total_fetched: usize,
    pub displayed_count: usize,
    pub fallback_tiers_used: bool,
    pub pipeline_fallback: bool,
    pub ambassador_percentage: f64,
    pub query_time_ms: u64,
}

/// Result of a post store page request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub metrics: FeedMetrics,
    pub ambassador_percentage: f64,
    pub debug_notes: Vec<String>,
    pub has_errors: bool,
    pub error_details: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub likes_count: u32,
    pub comments_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    #[default]
    Idle,
    Loading,
    LoadingMore,
    Ready,
    Error,
}

/// Materialized feed state owned by the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedCascadeState {
    pub posts: Vec<Post>,
    pub page: u32,
    pub status: FeedStatus,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub has_more: bool,
    pub metrics: FeedMetrics,
    pub current_filter: FeedFilter,
    pub has_errors: bool,
    pub error_details: Vec<String>,
}
