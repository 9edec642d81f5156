use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgHasArrayType, PgTypeInfo};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FeedError;

/// Who may see a post. Enforcement happens in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "post_visibility", rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Followers,
    Private,
}

impl Visibility {
    pub const ALL: [Visibility; 3] = [
        Visibility::Public,
        Visibility::Followers,
        Visibility::Private,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Followers => "followers",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "followers" => Ok(Visibility::Followers),
            "private" => Ok(Visibility::Private),
            other => Err(FeedError::Validation(format!(
                "Unknown visibility: {}",
                other
            ))),
        }
    }
}

impl PgHasArrayType for Visibility {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_post_visibility")
    }
}

/// Post entity as surfaced in the feed
///
/// `like_count`, `comment_count` and `liked_by_me` are computed server-side by
/// the feed procedure; rows read directly from the table leave them at their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub link_url: Option<String>,
    pub link_title: Option<String>,
    pub link_image: Option<String>,
    #[serde(default)]
    #[sqlx(default)]
    pub like_count: i64,
    #[serde(default)]
    #[sqlx(default)]
    pub comment_count: i64,
    #[serde(default)]
    #[sqlx(default)]
    pub liked_by_me: bool,
}

impl Post {
    /// A live post without link preview or aggregates
    pub fn new(
        id: Uuid,
        author_id: Uuid,
        text: Option<String>,
        visibility: Visibility,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            author_id,
            text,
            visibility,
            created_at,
            is_deleted: false,
            link_url: None,
            link_title: None,
            link_image: None,
            like_count: 0,
            comment_count: 0,
            liked_by_me: false,
        }
    }

    /// Cursor pointing just past this post
    pub fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Reaction entity - existence of the row means the user liked the post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reaction {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Comment entity - flat, one post per comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Keyset pagination boundary: (created_at, id) of the last post seen.
///
/// Feed order is created_at DESC, id DESC. A post comes after the cursor when
/// its (created_at, id) pair is strictly smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// Whether `post` lies strictly after this cursor in feed order
    pub fn admits(&self, post: &Post) -> bool {
        (post.created_at, post.id) < (self.created_at, self.id)
    }

    /// Opaque token: base64 of "<unix micros>:<uuid>"
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at.timestamp_micros(), self.id);
        general_purpose::STANDARD.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self, FeedError> {
        let decoded = general_purpose::STANDARD
            .decode(token)
            .map_err(|_| FeedError::InvalidCursor("Invalid cursor format".to_string()))?;
        let raw = String::from_utf8(decoded)
            .map_err(|_| FeedError::InvalidCursor("Invalid cursor encoding".to_string()))?;

        let (ts_str, id_str) = raw
            .split_once(':')
            .ok_or_else(|| FeedError::InvalidCursor("Missing cursor separator".to_string()))?;
        let micros = ts_str
            .parse::<i64>()
            .map_err(|_| FeedError::InvalidCursor("Invalid cursor timestamp".to_string()))?;
        let created_at = Utc
            .timestamp_opt(
                micros.div_euclid(1_000_000),
                (micros.rem_euclid(1_000_000) * 1_000) as u32,
            )
            .single()
            .ok_or_else(|| FeedError::InvalidCursor("Cursor timestamp out of range".to_string()))?;
        let id = Uuid::parse_str(id_str)
            .map_err(|_| FeedError::InvalidCursor("Invalid cursor post id".to_string()))?;

        Ok(Self { created_at, id })
    }
}

/// Row to insert when creating a post directly against the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub text: String,
    pub visibility: Visibility,
}

/// Row to insert when commenting directly against the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: Uuid,
    pub text: String,
}

/// Filter for the direct posts query used when the feed procedure is unavailable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub exclude_deleted: bool,
    pub visibilities: Vec<Visibility>,
    /// Only rows with created_at strictly before this instant
    pub created_before: Option<DateTime<Utc>>,
    pub limit: i64,
}
