use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{NewComment, NewPost, Post, Visibility};
use crate::error::{FeedError, FeedResult};
use crate::repository::{FeedBackend, IdentityProvider};
use crate::services::served::{primary_or_fallback, Served};

/// Trim user text; blank input is rejected
pub fn normalize_text(raw: &str, field: &str) -> FeedResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FeedError::Validation(format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Feed write operations: create post, toggle like, add comment
#[derive(Clone)]
pub struct Mutator {
    backend: Arc<dyn FeedBackend>,
    identity: Arc<dyn IdentityProvider>,
}

impl Mutator {
    pub fn new(backend: Arc<dyn FeedBackend>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { backend, identity }
    }

    /// Create a post and return the stored row
    pub async fn create_post(&self, text: &str, visibility: Visibility) -> FeedResult<Served<Post>> {
        let text = normalize_text(text, "Post text")?;

        let served = primary_or_fallback(
            "create_post",
            self.backend.create_post(&text, visibility),
            || {
                let new_post = NewPost {
                    text: text.clone(),
                    visibility,
                };
                let backend = self.backend.clone();
                async move { backend.insert_post(&new_post).await }
            },
        )
        .await?;

        info!(
            "Post created: post_id={} visibility={} path={:?}",
            served.value().id,
            visibility,
            served.path()
        );
        Ok(served)
    }

    /// Flip the current user's like on a post.
    ///
    /// The fallback reads the reaction row and then writes. Two overlapping
    /// fallback toggles for the same user and post can both observe the same
    /// state: one insert then fails on the primary key, or both deletes land
    /// and the second is a no-op.
    pub async fn toggle_like(&self, post_id: Uuid) -> FeedResult<Served<()>> {
        let backend = self.backend.clone();
        let identity = self.identity.clone();

        primary_or_fallback(
            "toggle_like",
            self.backend.toggle_reaction(post_id),
            move || async move {
                let user_id = match identity.current_user_id().await {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => return Err(FeedError::IdentityUnavailable),
                    Err(e) => {
                        warn!("Identity lookup failed during like toggle: {}", e);
                        return Err(FeedError::IdentityUnavailable);
                    }
                };

                if backend.reaction_exists(post_id, user_id).await? {
                    backend.delete_reaction(post_id, user_id).await
                } else {
                    backend.insert_reaction(post_id, user_id).await
                }
            },
        )
        .await
    }

    /// Append a flat comment to a post
    pub async fn add_comment(&self, post_id: Uuid, text: &str) -> FeedResult<Served<()>> {
        let text = normalize_text(text, "Comment")?;
        let comment = NewComment {
            post_id,
            text: text.clone(),
        };
        let backend = self.backend.clone();

        primary_or_fallback(
            "add_comment",
            self.backend.create_comment(post_id, &text),
            move || async move { backend.insert_comment(&comment).await },
        )
        .await
    }
}
