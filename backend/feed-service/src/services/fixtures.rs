//! Post builders shared by the service tests

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::models::{AuthorSnapshot, Post, PrivacyLevel, UserType};

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub(crate) fn create_test_post(id: &str, author: &str, level: &str) -> Post {
    Post {
        id: id.to_string(),
        user_id: author.to_string(),
        content: format!("post {}", id),
        privacy_level: PrivacyLevel::from(level),
        media_url: None,
        media_type: None,
        is_auto_generated: false,
        engagement_score: 0.0,
        likes_count: 0,
        comments_count: 0,
        author: None,
        created_at: base_time(),
    }
}

pub(crate) trait PostFixture {
    fn minutes_ago(self, minutes: i64) -> Self;
    fn scored(self, engagement_score: f64, likes_count: u32) -> Self;
    fn auto_generated(self) -> Self;
    fn authored_by(self, full_name: &str, user_type: UserType) -> Self;
}

impl PostFixture for Post {
    fn minutes_ago(mut self, minutes: i64) -> Self {
        self.created_at = base_time() - Duration::minutes(minutes);
        self
    }

    fn scored(mut self, engagement_score: f64, likes_count: u32) -> Self {
        self.engagement_score = engagement_score;
        self.likes_count = likes_count;
        self
    }

    fn auto_generated(mut self) -> Self {
        self.is_auto_generated = true;
        self
    }

    fn authored_by(mut self, full_name: &str, user_type: UserType) -> Self {
        self.author = Some(AuthorSnapshot {
            full_name: full_name.to_string(),
            user_type,
            avatar_url: None,
        });
        self
    }
}

/// `count` public posts by `author`, newest first.
pub(crate) fn public_posts(prefix: &str, author: &str, count: usize) -> Vec<Post> {
    (0..count)
        .map(|i| create_test_post(&format!("{}{}", prefix, i), author, "public").minutes_ago(i as i64))
        .collect()
}
