/// Configuration management for the social feed
///
/// Loads configuration from environment variables (and a `.env` file when present).
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Feed behaviour
    pub feed: FeedConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Log output format: "text" or "json"
    pub log_format: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection before failing the call
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Feed session settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FeedConfig {
    /// Posts per page
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Reload the first page even when a like/comment failed on both paths
    #[serde(default)]
    pub reload_after_failed_mutation: bool,

    /// Apply bundled migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,

    /// Acting user for the session, if signed in
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            reload_after_failed_mutation: false,
            run_migrations: default_run_migrations(),
            user_id: None,
        }
    }
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> usize {
    12
}

fn default_run_migrations() -> bool {
    true
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Ignore a missing .env file
        let _ = dotenvy::dotenv();

        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_connections),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_min_connections),
            acquire_timeout_secs: std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_acquire_timeout_secs),
        };

        let user_id = match std::env::var("FEED_USER_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                Uuid::parse_str(raw.trim()).context("FEED_USER_ID is not a valid UUID")?,
            ),
            _ => None,
        };

        let feed = FeedConfig {
            page_size: match std::env::var("FEED_PAGE_SIZE") {
                Ok(raw) => raw.parse().context("FEED_PAGE_SIZE must be a number")?,
                Err(_) => default_page_size(),
            },
            reload_after_failed_mutation: env_flag("FEED_RELOAD_AFTER_FAILED_MUTATION", false),
            run_migrations: env_flag("FEED_RUN_MIGRATIONS", default_run_migrations()),
            user_id,
        };
        feed.validate().context("Invalid feed configuration")?;

        Ok(Config {
            app,
            database,
            feed,
        })
    }
}
