pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod services;

pub use backend::{FeedServices, InMemoryBackend, Snapshot};
pub use config::Config;
pub use controller::{ChangeKind, ChangeNotice, FeedController};
pub use error::{FeedError, Result};
pub use services::{
    can_view_post, ensure_minimum, filter_posts, ContentMixer, FeedPipeline, FeedQueryCascade,
    OptimisticPostOverlay, TieredQueryCascade,
};
