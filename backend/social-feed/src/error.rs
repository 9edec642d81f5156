/// Error types for the social feed
use thiserror::Error;

/// SQLSTATE raised for privilege and row-level security violations
const INSUFFICIENT_PRIVILEGE: &str = "42501";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Input rejected before any data-access path was attempted
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Backend refused the operation under its visibility or permission rules
    #[error("Access denied: {0}")]
    Access(String),

    /// Network, pool or server failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The current user could not be resolved for a client-side toggle
    #[error("Current user identity is unavailable")]
    IdentityUnavailable,

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

impl FeedError {
    /// Short message suitable for display next to the failed action
    pub fn user_message(&self) -> String {
        match self {
            FeedError::Validation(msg) => msg.clone(),
            FeedError::Access(_) => "You are not allowed to do that".to_string(),
            FeedError::Transport(_) => "Network error, please try again".to_string(),
            FeedError::IdentityUnavailable => "Please sign in again".to_string(),
            FeedError::InvalidCursor(_) => "Feed position is no longer valid".to_string(),
        }
    }
}

impl From<sqlx::Error> for FeedError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(INSUFFICIENT_PRIVILEGE) => {
                FeedError::Access(db.message().to_string())
            }
            _ => FeedError::Transport(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for FeedError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        FeedError::Transport(format!("Migration failed: {}", err))
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;
