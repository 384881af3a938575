use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::config::MixerConfig;
use crate::models::{Post, PrivacyLevel};

/// Content bucket a candidate post falls into, in allocation precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Own,
    Followed,
    Ambassador,
    Public,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Own => "own",
            Bucket::Followed => "followed",
            Bucket::Ambassador => "ambassador",
            Bucket::Public => "public",
        }
    }
}

/// Viewer facts the mixer needs
#[derive(Debug, Clone, Copy)]
pub struct MixContext<'a> {
    pub following_count: usize,
    pub user_followings: &'a HashSet<String>,
    pub current_user_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixRatios {
    pub followed: f64,
    pub public: f64,
}

/// Graduated followed/public split by following count.
pub fn ratios_for(following_count: usize) -> MixRatios {
    let followed: f64 = match following_count {
        0 => 0.0,
        1 => 0.3,
        2 => 0.4,
        3..=5 => 0.6,
        6..=10 => 0.7,
        _ => 0.8,
    };

    // Large graphs get a boost toward followed content
    let followed = if following_count > 10 {
        (followed + 0.2).min(0.8)
    } else {
        followed
    };

    MixRatios {
        followed,
        public: 1.0 - followed,
    }
}

/// Candidates grouped by bucket, each ranked newest first
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub own: Vec<Post>,
    pub followed: Vec<Post>,
    pub ambassador: Vec<Post>,
    pub public: Vec<Post>,
}

impl Buckets {
    pub fn total(&self) -> usize {
        self.own.len() + self.followed.len() + self.ambassador.len() + self.public.len()
    }

    fn take(&mut self, bucket: Bucket) -> Vec<Post> {
        match bucket {
            Bucket::Own => std::mem::take(&mut self.own),
            Bucket::Followed => std::mem::take(&mut self.followed),
            Bucket::Ambassador => std::mem::take(&mut self.ambassador),
            Bucket::Public => std::mem::take(&mut self.public),
        }
    }
}

/// floor() that tolerates binary float noise such as 10 * 0.3 = 2.9999…
fn floor_slots(base: usize, ratio: f64) -> usize {
    (base as f64 * ratio + 1e-9).floor().max(0.0) as usize
}

fn rank_within_bucket(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.created_at.cmp(&a.created_at).then_with(|| {
            b.engagement_score
                .partial_cmp(&a.engagement_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

/// Blends privacy-filtered posts into a bounded, ratio-balanced feed.
pub struct ContentMixer {
    config: MixerConfig,
}

impl ContentMixer {
    pub fn new(config: MixerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    /// Sort posts into disjoint buckets. Posts that are neither own, followed
    /// nor ambassador content only survive if they are `public` or
    /// `public_highlights`.
    pub fn categorize(&self, posts: &[Post], ctx: &MixContext<'_>) -> Buckets {
        self.categorize_admitting(posts, ctx, &HashSet::new())
    }

    /// [`categorize`](Self::categorize), with `admitted` ids also taking the
    /// public bucket whatever their tier.
    pub fn categorize_admitting(
        &self,
        posts: &[Post],
        ctx: &MixContext<'_>,
        admitted: &HashSet<String>,
    ) -> Buckets {
        let mut buckets = Buckets::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for post in posts {
            if !seen.insert(post.id.as_str()) {
                continue;
            }
            if ctx.current_user_id == Some(post.user_id.as_str()) {
                buckets.own.push(post.clone());
            } else if ctx.user_followings.contains(&post.user_id) {
                buckets.followed.push(post.clone());
            } else if post.is_ambassador_content() {
                buckets.ambassador.push(post.clone());
            } else if matches!(
                post.privacy_level,
                PrivacyLevel::Public | PrivacyLevel::PublicHighlights
            ) || admitted.contains(&post.id)
            {
                buckets.public.push(post.clone());
            }
        }

        rank_within_bucket(&mut buckets.own);
        rank_within_bucket(&mut buckets.followed);
        rank_within_bucket(&mut buckets.ambassador);
        rank_within_bucket(&mut buckets.public);

        buckets
    }

    pub fn target_total(&self, available: usize) -> usize {
        available.clamp(self.config.min_total, self.config.max_total)
    }

    pub fn mix(&self, posts: &[Post], ctx: &MixContext<'_>) -> Vec<Post> {
        self.mix_admitting(posts, ctx, &HashSet::new())
    }

    /// Mix where `admitted` posts were already chosen upstream and compete
    /// for public slots regardless of tier.
    pub fn mix_admitting(
        &self,
        posts: &[Post],
        ctx: &MixContext<'_>,
        admitted: &HashSet<String>,
    ) -> Vec<Post> {
        let mut buckets = self.categorize_admitting(posts, ctx, admitted);
        let available = buckets.total();
        let target = self.target_total(available);
        let ratios = ratios_for(ctx.following_count);

        let own_slots = self.config.max_own_posts.min(target);
        let own_take = buckets.own.len().min(own_slots);
        let followed_slots = floor_slots(target - own_take, ratios.followed);
        let ambassador_slots = floor_slots(target, self.config.ambassador_cap);

        let mut picks: Vec<(Bucket, Post)> = Vec::with_capacity(target);
        let mut reserves: HashMap<Bucket, VecDeque<Post>> = HashMap::new();

        let mut allocate = |bucket: Bucket, slots: usize, picks: &mut Vec<(Bucket, Post)>| {
            let mut candidates: VecDeque<Post> = buckets.take(bucket).into();
            let room = target.saturating_sub(picks.len());
            for _ in 0..slots.min(room) {
                match candidates.pop_front() {
                    Some(post) => picks.push((bucket, post)),
                    None => break,
                }
            }
            reserves.insert(bucket, candidates);
        };

        allocate(Bucket::Own, own_take, &mut picks);
        allocate(Bucket::Followed, followed_slots, &mut picks);
        allocate(Bucket::Ambassador, ambassador_slots, &mut picks);
        allocate(Bucket::Public, target, &mut picks);

        // Public ran dry: let leftover followed posts take the empty slots,
        // unless the ratio table excludes followed content entirely.
        if ratios.followed > 0.0 {
            if let Some(leftover) = reserves.get_mut(&Bucket::Followed) {
                while picks.len() < target {
                    match leftover.pop_front() {
                        Some(post) => picks.push((Bucket::Followed, post)),
                        None => break,
                    }
                }
            }
        }

        let picked = picks.len();
        let mut mixed = self.redistribute_by_author(picks, &mut reserves);

        // Present the blend chronologically; ties keep allocation precedence.
        mixed.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        debug!(
            available,
            target,
            picked,
            output = mixed.len(),
            followed_ratio = ratios.followed,
            "Content mix assembled"
        );

        mixed
    }

    /// Caps each author's share of the list. Over-cap posts are dropped and
    /// replaced by the next unused candidate from the same bucket. The
    /// viewer's own posts are bounded by `max_own_posts` instead.
    fn redistribute_by_author(
        &self,
        picks: Vec<(Bucket, Post)>,
        reserves: &mut HashMap<Bucket, VecDeque<Post>>,
    ) -> Vec<Post> {
        let cap = floor_slots(picks.len(), self.config.max_author_share).max(1);
        let mut per_author: HashMap<String, usize> = HashMap::new();
        let mut result = Vec::with_capacity(picks.len());

        for (bucket, post) in picks {
            if bucket == Bucket::Own {
                result.push(post);
                continue;
            }
            let count = per_author.get(&post.user_id).copied().unwrap_or(0);
            if count < cap {
                *per_author.entry(post.user_id.clone()).or_insert(0) += 1;
                result.push(post);
                continue;
            }

            debug!(
                post_id = %post.id,
                author = %post.user_id,
                bucket = bucket.as_str(),
                cap,
                "Author over share cap, backfilling"
            );

            let Some(reserve) = reserves.get_mut(&bucket) else {
                continue;
            };
            let replacement = reserve
                .iter()
                .position(|p| per_author.get(&p.user_id).copied().unwrap_or(0) < cap)
                .and_then(|idx| reserve.remove(idx));

            if let Some(replacement) = replacement {
                *per_author.entry(replacement.user_id.clone()).or_insert(0) += 1;
                result.push(replacement);
            }
        }

        result
    }
}
