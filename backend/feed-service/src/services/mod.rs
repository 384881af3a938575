//! Feed assembly services
//!
//! - cascade: tiered candidate retrieval (followed → ambassador → public)
//! - privacy: per-post visibility rules
//! - mixer: ratio-based blending with ambassador and author caps
//! - guarantee: minimum content top-up
//! - pipeline: privacy → mix → guarantee with a public-only circuit breaker
//! - overlay: optimistic posts with expiry timers

pub mod cascade;
pub mod guarantee;
pub mod mixer;
pub mod overlay;
pub mod pipeline;
pub mod privacy;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cascade::{FeedQueryCascade, TieredQueryCascade};
pub use guarantee::{ensure_minimum, ensure_minimum_capped};
pub use mixer::{ratios_for, ContentMixer, MixContext, MixRatios};
pub use overlay::OptimisticPostOverlay;
pub use pipeline::{safe_fallback, FeedPipeline, PipelineOutcome};
pub use privacy::{can_view_post, classify, filter_posts, Visibility};

#[cfg(test)]
pub use cascade::MockFeedQueryCascade;
