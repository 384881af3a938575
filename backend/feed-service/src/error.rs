/// Error types for the feed core
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Post store error: {0}")]
    Store(String),

    #[error("Profile store error: {0}")]
    Profile(String),

    #[error("Engagement counter error: {0}")]
    Engagement(String),

    #[error("Social graph error: {0}")]
    Graph(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Post creation failed: {0}")]
    Publish(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Invalid feed filter: {0}")]
    InvalidFilter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Message suitable for the feed's error banner.
    pub fn user_message(&self) -> String {
        match self {
            FeedError::Store(_) => "Couldn't load posts right now. Pull to retry.".to_string(),
            FeedError::InvalidFilter(filter) => format!("Unknown feed filter '{}'", filter),
            FeedError::Publish(_) => "Your post couldn't be published.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_store_internals() {
        let err = FeedError::Store("connection reset by peer".to_string());
        assert!(!err.user_message().contains("connection reset"));
        assert_eq!(
            FeedError::InvalidFilter("trending".to_string()).user_message(),
            "Unknown feed filter 'trending'"
        );
        assert_eq!(
            FeedError::Graph("timeout".to_string()).user_message(),
            "Social graph error: timeout"
        );
    }
}
