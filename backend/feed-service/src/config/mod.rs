/// Configuration management for the feed core
///
/// Loads configuration from environment variables, falling back to the
/// tuned defaults below.
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FeedError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub mixer: MixerConfig,
    pub guarantee: GuaranteeConfig,
    pub pagination: PaginationConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Content mixing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Lower bound of the mixed feed size
    #[serde(default = "default_min_total")]
    pub min_total: usize,
    /// Upper bound of the mixed feed size
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    /// Own posts allowed in one mixed page
    #[serde(default = "default_max_own_posts")]
    pub max_own_posts: usize,
    /// Fraction of the target total ambassador content may occupy
    #[serde(default = "default_ambassador_cap")]
    pub ambassador_cap: f64,
    /// Largest fraction of the final list a single author may hold
    #[serde(default = "default_max_author_share")]
    pub max_author_share: f64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            min_total: default_min_total(),
            max_total: default_max_total(),
            max_own_posts: default_max_own_posts(),
            ambassador_cap: default_ambassador_cap(),
            max_author_share: default_max_author_share(),
        }
    }
}

/// Minimum content thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuaranteeConfig {
    /// Followings at or below which a viewer counts as a new user
    #[serde(default = "default_new_user_max_followings")]
    pub new_user_max_followings: usize,
    #[serde(default = "default_new_user_minimum")]
    pub new_user_minimum: usize,
    #[serde(default = "default_established_minimum")]
    pub established_minimum: usize,
    /// Floor of the public fill target on the new-user path
    #[serde(default = "default_new_user_target")]
    pub new_user_target: usize,
    #[serde(default = "default_new_user_max_coach_posts")]
    pub new_user_max_coach_posts: usize,
}

impl Default for GuaranteeConfig {
    fn default() -> Self {
        Self {
            new_user_max_followings: default_new_user_max_followings(),
            new_user_minimum: default_new_user_minimum(),
            established_minimum: default_established_minimum(),
            new_user_target: default_new_user_target(),
            new_user_max_coach_posts: default_new_user_max_coach_posts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Highest page index that may be requested
    #[serde(default = "default_max_page")]
    pub max_page: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page: default_max_page(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_optimistic_ttl_secs")]
    pub optimistic_ttl_secs: u64,
}

impl OverlayConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.optimistic_ttl_secs)
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            optimistic_ttl_secs: default_optimistic_ttl_secs(),
        }
    }
}

fn default_min_total() -> usize {
    8
}

fn default_max_total() -> usize {
    25
}

fn default_max_own_posts() -> usize {
    3
}

fn default_ambassador_cap() -> f64 {
    0.3
}

fn default_max_author_share() -> f64 {
    0.34
}

fn default_new_user_max_followings() -> usize {
    2
}

fn default_new_user_minimum() -> usize {
    3
}

fn default_established_minimum() -> usize {
    2
}

fn default_new_user_target() -> usize {
    8
}

fn default_new_user_max_coach_posts() -> usize {
    3
}

fn default_page_size() -> usize {
    15
}

fn default_max_page() -> u32 {
    8
}

fn default_optimistic_ttl_secs() -> u64 {
    30
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| FeedError::Config(format!("{} is invalid ({}): {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
            mixer: MixerConfig {
                min_total: env_or("FEED_MIN_TOTAL", default_min_total())?,
                max_total: env_or("FEED_MAX_TOTAL", default_max_total())?,
                max_own_posts: env_or("FEED_MAX_OWN_POSTS", default_max_own_posts())?,
                ambassador_cap: env_or("FEED_AMBASSADOR_CAP", default_ambassador_cap())?,
                max_author_share: env_or("FEED_MAX_AUTHOR_SHARE", default_max_author_share())?,
            },
            guarantee: GuaranteeConfig {
                new_user_max_followings: env_or(
                    "FEED_NEW_USER_MAX_FOLLOWINGS",
                    default_new_user_max_followings(),
                )?,
                new_user_minimum: env_or("FEED_NEW_USER_MINIMUM", default_new_user_minimum())?,
                established_minimum: env_or(
                    "FEED_ESTABLISHED_MINIMUM",
                    default_established_minimum(),
                )?,
                new_user_target: env_or("FEED_NEW_USER_TARGET", default_new_user_target())?,
                new_user_max_coach_posts: env_or(
                    "FEED_NEW_USER_MAX_COACH_POSTS",
                    default_new_user_max_coach_posts(),
                )?,
            },
            pagination: PaginationConfig {
                page_size: env_or("FEED_PAGE_SIZE", default_page_size())?,
                max_page: env_or("FEED_MAX_PAGE", default_max_page())?,
            },
            overlay: OverlayConfig {
                optimistic_ttl_secs: env_or(
                    "FEED_OPTIMISTIC_TTL_SECS",
                    default_optimistic_ttl_secs(),
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mixer.min_total == 0 || self.mixer.min_total > self.mixer.max_total {
            return Err(FeedError::Config(format!(
                "mixer bounds must satisfy 0 < min_total <= max_total (got {}..{})",
                self.mixer.min_total, self.mixer.max_total
            )));
        }
        for (name, value) in [
            ("ambassador_cap", self.mixer.ambassador_cap),
            ("max_author_share", self.mixer.max_author_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FeedError::Config(format!(
                    "{} must be within 0.0..=1.0 (got {})",
                    name, value
                )));
            }
        }
        if self.pagination.page_size == 0 {
            return Err(FeedError::Config("page_size must be positive".to_string()));
        }
        Ok(())
    }
}
