//! Post-processing pipeline
//!
//! Turns a raw candidate page into the posts a viewer gets to see:
//!
//! 1. Partition candidates by privacy tier relative to the viewer
//! 2. New users (few followings) take a boosted path that favours volume;
//!    established users get plain privacy filtering
//! 3. The content mixer re-ratios the survivors, keeping the coach posts the
//!    new-user path picked
//! 4. Under-filled results are topped up by the minimum content guarantee,
//!    still under the ambassador cap
//!
//! Any failure inside those steps, including a panic, trips the circuit
//! breaker: the page degrades to `public ∪ own` computed straight from the
//! raw input so the feed never renders empty because of a mixing bug.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

use crate::config::{GuaranteeConfig, MixerConfig};
use crate::error::{FeedError, Result};
use crate::models::{Post, PrivacyContext, PrivacyLevel};
use crate::services::guarantee::ensure_minimum_capped;
use crate::services::mixer::{ContentMixer, MixContext};
use crate::services::privacy::{can_view_post, filter_posts};

/// Candidates split by how the viewer relates to them
#[derive(Debug, Default)]
struct Partition {
    own: Vec<Post>,
    public: Vec<Post>,
    friends: Vec<Post>,
    coaches: Vec<Post>,
}

impl Partition {
    fn build(raw: &[Post], ctx: &PrivacyContext) -> Self {
        let mut partition = Partition::default();
        for post in raw {
            if ctx.is_own(post) {
                partition.own.push(post.clone());
                continue;
            }
            match post.privacy_level {
                PrivacyLevel::Public => partition.public.push(post.clone()),
                PrivacyLevel::PublicHighlights if ctx.current_user_id.is_some() => {
                    partition.public.push(post.clone())
                }
                PrivacyLevel::Friends if ctx.current_user_id.is_some() && ctx.follows(&post.user_id) => {
                    partition.friends.push(post.clone())
                }
                PrivacyLevel::Coaches if ctx.current_user_id.is_some() && ctx.viewer_is_coach() => {
                    partition.coaches.push(post.clone())
                }
                _ => {}
            }
        }
        partition
    }

    fn fallback_pool(&self) -> Vec<Post> {
        self.own
            .iter()
            .chain(&self.friends)
            .chain(&self.coaches)
            .chain(&self.public)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub posts: Vec<Post>,
    pub new_user: bool,
    /// The circuit breaker replaced the pipeline result
    pub used_fallback: bool,
}

pub struct FeedPipeline {
    mixer: ContentMixer,
    guarantee: GuaranteeConfig,
}

impl FeedPipeline {
    pub fn new(mixer: MixerConfig, guarantee: GuaranteeConfig) -> Self {
        Self {
            mixer: ContentMixer::new(mixer),
            guarantee,
        }
    }

    pub fn is_new_user(&self, ctx: &PrivacyContext) -> bool {
        ctx.following_count() <= self.guarantee.new_user_max_followings
    }

    pub fn minimum_for(&self, ctx: &PrivacyContext) -> usize {
        if self.is_new_user(ctx) {
            self.guarantee.new_user_minimum
        } else {
            self.guarantee.established_minimum
        }
    }

    pub fn process(&self, raw: &[Post], ctx: &PrivacyContext) -> PipelineOutcome {
        self.run_guarded(raw, ctx, || self.try_process(raw, ctx))
    }

    /// Runs `stage` behind the circuit breaker. An error or a panic yields
    /// [`safe_fallback`] over `raw`.
    fn run_guarded<F>(&self, raw: &[Post], ctx: &PrivacyContext, stage: F) -> PipelineOutcome
    where
        F: FnOnce() -> Result<Vec<Post>>,
    {
        let new_user = self.is_new_user(ctx);
        let failure = match catch_unwind(AssertUnwindSafe(stage)) {
            Ok(Ok(posts)) => {
                return PipelineOutcome {
                    posts,
                    new_user,
                    used_fallback: false,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => FeedError::Pipeline("content pipeline panicked".to_string()),
        };

        error!(
            user_id = ctx.current_user_id.as_deref().unwrap_or("anonymous"),
            error = %failure,
            "Feed pipeline failed, serving public and own posts"
        );

        PipelineOutcome {
            posts: safe_fallback(raw, ctx),
            new_user,
            used_fallback: true,
        }
    }

    fn try_process(&self, raw: &[Post], ctx: &PrivacyContext) -> Result<Vec<Post>> {
        let partition = Partition::build(raw, ctx);
        let new_user = self.is_new_user(ctx);

        let (selected, admitted) = if new_user {
            let selected = self.new_user_selection(&partition, ctx);
            let admitted: HashSet<String> = selected
                .iter()
                .filter(|p| p.privacy_level == PrivacyLevel::Coaches)
                .map(|p| p.id.clone())
                .collect();
            (selected, admitted)
        } else {
            (filter_posts(raw, ctx), HashSet::new())
        };

        let mixed = self.mixer.mix_admitting(
            &selected,
            &MixContext {
                following_count: ctx.following_count(),
                user_followings: &ctx.user_followings,
                current_user_id: ctx.current_user_id.as_deref(),
            },
            &admitted,
        );

        let minimum = self.minimum_for(ctx);
        let result = if mixed.len() < minimum {
            ensure_minimum_capped(
                mixed,
                &partition.fallback_pool(),
                minimum,
                self.mixer.config().ambassador_cap,
            )
        } else {
            mixed
        };
        let result = ensure_viewable(result, ctx)?;

        debug!(
            raw = raw.len(),
            selected = selected.len(),
            admitted = admitted.len(),
            output = result.len(),
            new_user,
            minimum,
            "Feed pipeline completed"
        );

        Ok(result)
    }

    /// Richer selection for viewers with a small graph.
    fn new_user_selection(&self, partition: &Partition, ctx: &PrivacyContext) -> Vec<Post> {
        let mut selected: Vec<Post> = partition.own.clone();

        let friends_quota = (ctx.following_count() * 2).max(2);
        selected.extend(partition.friends.iter().take(friends_quota).cloned());

        if ctx.viewer_is_coach() {
            selected.extend(
                partition
                    .coaches
                    .iter()
                    .take(self.guarantee.new_user_max_coach_posts)
                    .cloned(),
            );
        }

        let target = self.guarantee.new_user_target.max(selected.len() + 3);
        let mut public: Vec<&Post> = partition.public.iter().collect();
        public.sort_by(|a, b| {
            b.engagement_score
                .partial_cmp(&a.engagement_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let room = target.saturating_sub(selected.len());
        selected.extend(public.into_iter().take(room).cloned());

        selected
    }
}

/// Rejects the whole list if any post is hidden from the viewer.
fn ensure_viewable(posts: Vec<Post>, ctx: &PrivacyContext) -> Result<Vec<Post>> {
    match posts.iter().find(|p| !can_view_post(p, ctx)) {
        Some(leak) => Err(FeedError::Pipeline(format!(
            "post {} is not viewable by this viewer",
            leak.id
        ))),
        None => Ok(posts),
    }
}

/// `public ∪ own`, straight from the raw candidates, input order, no duplicates.
pub fn safe_fallback(raw: &[Post], ctx: &PrivacyContext) -> Vec<Post> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter(|p| p.privacy_level.is_public() || ctx.is_own(p))
        .filter(|p| seen.insert(p.id.clone()))
        .cloned()
        .collect()
}
