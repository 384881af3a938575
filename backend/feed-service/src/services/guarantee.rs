//! Minimum content guarantee
//!
//! Tops up an under-filled feed from a fallback pool so a viewer never lands
//! on a near-empty page. Only `public` posts are eligible as top-up material,
//! and nothing is ever invented: a small pool yields a short feed.
//!
//! Ranking of fallback candidates:
//! - Score = engagement_score + 2 * likes_count
//! - Ties: most recent `created_at` first
//!
//! The capped variant additionally keeps ambassador content within a share
//! of the topped-up list.

use std::collections::HashSet;
use tracing::debug;

use crate::models::Post;

/// Number of posts appended on every top-up, even when only one is missing.
const MIN_TOP_UP: usize = 2;

fn fallback_score(post: &Post) -> f64 {
    post.engagement_score + 2.0 * post.likes_count as f64
}

/// Append fallback posts until `current` reaches `min_required`.
///
/// Existing posts keep their order. At least two posts are requested from the
/// pool once a top-up is needed.
pub fn ensure_minimum(current: Vec<Post>, fallback_pool: &[Post], min_required: usize) -> Vec<Post> {
    ensure_minimum_capped(current, fallback_pool, min_required, 1.0)
}

/// [`ensure_minimum`], but ambassador posts from the pool are only appended
/// while ambassador content stays within `ambassador_cap` of the projected
/// list length.
pub fn ensure_minimum_capped(
    current: Vec<Post>,
    fallback_pool: &[Post],
    min_required: usize,
    ambassador_cap: f64,
) -> Vec<Post> {
    if current.len() >= min_required {
        return current;
    }

    let needed = (min_required - current.len()).max(MIN_TOP_UP);
    let projected = current.len() + needed;
    let ambassador_allowance = ((projected as f64) * ambassador_cap + 1e-9).floor() as usize;
    let mut ambassador_room = ambassador_allowance
        .saturating_sub(current.iter().filter(|p| p.is_ambassador_content()).count());
    let mut seen: HashSet<String> = current.iter().map(|p| p.id.clone()).collect();

    let mut eligible: Vec<&Post> = fallback_pool
        .iter()
        .filter(|p| p.privacy_level.is_public())
        .filter(|p| seen.insert(p.id.clone()))
        .collect();

    eligible.sort_by(|a, b| {
        fallback_score(b)
            .partial_cmp(&fallback_score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    let before = current.len();
    let mut result = current;
    let mut appended = 0usize;
    for post in eligible {
        if appended == needed {
            break;
        }
        if post.is_ambassador_content() {
            if ambassador_room == 0 {
                continue;
            }
            ambassador_room -= 1;
        }
        result.push(post.clone());
        appended += 1;
    }

    debug!(
        before,
        after = result.len(),
        min_required,
        pool = fallback_pool.len(),
        "Minimum content guarantee applied"
    );

    result
}
