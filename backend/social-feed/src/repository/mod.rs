pub mod memory;
pub mod postgres;

pub use memory::MemoryFeedBackend;
pub use postgres::PgFeedBackend;

use crate::domain::models::{Cursor, NewComment, NewPost, Post, PostQuery, Visibility};
use crate::error::FeedResult;
use uuid::Uuid;

/// Data-access collaborator behind the feed.
///
/// Every operation has a composed server-side procedure (the preferred path)
/// and a set of direct table operations the services fall back to when the
/// procedure is missing or errors. Visibility is enforced behind this trait.
#[async_trait::async_trait]
pub trait FeedBackend: Send + Sync {
    /// Feed procedure: visibility, ordering and the full (created_at, id)
    /// keyset predicate applied server-side
    async fn list_feed(&self, limit: i64, before: Option<Cursor>) -> FeedResult<Vec<Post>>;

    /// Post creation procedure, returns the stored post
    async fn create_post(&self, text: &str, visibility: Visibility) -> FeedResult<Post>;

    /// Atomic like toggle; the acting user is resolved server-side
    async fn toggle_reaction(&self, post_id: Uuid) -> FeedResult<()>;

    /// Comment procedure
    async fn create_comment(&self, post_id: Uuid, text: &str) -> FeedResult<()>;

    /// Direct filtered and sorted posts query
    async fn query_posts(&self, query: &PostQuery) -> FeedResult<Vec<Post>>;

    /// Direct insert into posts returning the created row
    async fn insert_post(&self, post: &NewPost) -> FeedResult<Post>;

    /// Check if a reaction row exists for (post, user)
    async fn reaction_exists(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<bool>;

    async fn insert_reaction(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<()>;

    async fn delete_reaction(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<()>;

    /// Direct insert into comments
    async fn insert_comment(&self, comment: &NewComment) -> FeedResult<()>;
}

/// Resolves the signed-in user for operations that need a client-supplied identity
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` when nobody is signed in
    async fn current_user_id(&self) -> FeedResult<Option<Uuid>>;
}

/// Identity fixed at session start
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticIdentity {
    user_id: Option<Uuid>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<Uuid>) -> Self {
        Self { user_id }
    }

    pub fn signed_in(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user_id(&self) -> FeedResult<Option<Uuid>> {
        Ok(self.user_id)
    }
}
