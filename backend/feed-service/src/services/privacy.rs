//! Privacy filter
//!
//! Decides whether a viewer may see a post given the post's privacy tier and
//! the viewer's following graph. Rules are evaluated in order, first match
//! wins:
//!
//! 1. Authors always see their own posts.
//! 2. Anonymous viewers only see `public` posts.
//! 3. `public` is visible to everyone; `public_highlights` to any signed-in viewer.
//! 4. `private` is visible to nobody else.
//! 5. `friends` is visible when the viewer follows the author.
//! 6. `coaches` is visible when the viewer is a coach.
//! 7. Anything unrecognized is hidden and logged.

use tracing::{debug, warn};

use crate::models::{Post, PrivacyContext, PrivacyLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible(VisibleBecause),
    Hidden(HiddenBecause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibleBecause {
    Own,
    Public,
    Highlight,
    Followed,
    Coach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenBecause {
    AnonymousViewer,
    Private,
    NotFollowing,
    NotCoach,
    UnrecognizedTier,
}

impl Visibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, Visibility::Visible(_))
    }
}

/// Classify a single post for the given viewer.
pub fn classify(post: &Post, context: &PrivacyContext) -> Visibility {
    if context.is_own(post) {
        return Visibility::Visible(VisibleBecause::Own);
    }

    if context.current_user_id.is_none() {
        return match post.privacy_level {
            PrivacyLevel::Public => Visibility::Visible(VisibleBecause::Public),
            PrivacyLevel::Unrecognized(_) => Visibility::Hidden(HiddenBecause::UnrecognizedTier),
            _ => Visibility::Hidden(HiddenBecause::AnonymousViewer),
        };
    }

    match &post.privacy_level {
        PrivacyLevel::Public => Visibility::Visible(VisibleBecause::Public),
        PrivacyLevel::PublicHighlights => Visibility::Visible(VisibleBecause::Highlight),
        PrivacyLevel::Private => Visibility::Hidden(HiddenBecause::Private),
        PrivacyLevel::Friends if context.follows(&post.user_id) => {
            Visibility::Visible(VisibleBecause::Followed)
        }
        PrivacyLevel::Friends => Visibility::Hidden(HiddenBecause::NotFollowing),
        PrivacyLevel::Coaches if context.viewer_is_coach() => {
            Visibility::Visible(VisibleBecause::Coach)
        }
        PrivacyLevel::Coaches => Visibility::Hidden(HiddenBecause::NotCoach),
        PrivacyLevel::Unrecognized(_) => Visibility::Hidden(HiddenBecause::UnrecognizedTier),
    }
}

pub fn can_view_post(post: &Post, context: &PrivacyContext) -> bool {
    classify(post, context).is_visible()
}

/// Keep the posts the viewer may see, preserving input order.
///
/// Never fails: a post that cannot be classified is dropped on its own.
pub fn filter_posts(posts: &[Post], context: &PrivacyContext) -> Vec<Post> {
    let mut anomalies = 0usize;

    let visible: Vec<Post> = posts
        .iter()
        .filter(|post| match classify(post, context) {
            Visibility::Visible(_) => true,
            Visibility::Hidden(HiddenBecause::UnrecognizedTier) => {
                anomalies += 1;
                warn!(
                    post_id = %post.id,
                    privacy_level = %post.privacy_level,
                    "Unrecognized privacy level, hiding post"
                );
                false
            }
            Visibility::Hidden(_) => false,
        })
        .cloned()
        .collect();

    debug!(
        input = posts.len(),
        visible = visible.len(),
        anomalies,
        "Privacy filter applied"
    );

    visible
}
