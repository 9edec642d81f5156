use std::sync::Arc;
use tracing::debug;

use crate::domain::models::{Cursor, Post, PostQuery, Visibility};
use crate::error::{FeedError, FeedResult};
use crate::repository::FeedBackend;
use crate::services::served::{primary_or_fallback, AccessPath};

/// One page of the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    /// Heuristic: the page came back full. Wrong only when the final page is
    /// exactly `limit` long.
    pub has_more: bool,
    /// Cursor after the last post, `None` for an empty page
    pub next_cursor: Option<Cursor>,
    pub path: AccessPath,
}

/// Retrieves feed pages in (created_at DESC, id DESC) order
#[derive(Clone)]
pub struct PageFetcher {
    backend: Arc<dyn FeedBackend>,
}

impl PageFetcher {
    pub fn new(backend: Arc<dyn FeedBackend>) -> Self {
        Self { backend }
    }

    /// Fetch up to `limit` posts strictly after `cursor`.
    ///
    /// Tries the feed procedure first and falls back to a direct query.
    pub async fn fetch_page(&self, cursor: Option<Cursor>, limit: usize) -> FeedResult<FeedPage> {
        if limit == 0 {
            return Err(FeedError::Validation(
                "Page size must be at least 1".to_string(),
            ));
        }
        if i32::try_from(limit).is_err() {
            return Err(FeedError::Validation(format!(
                "Page size must not exceed {}",
                i32::MAX
            )));
        }

        let served = primary_or_fallback(
            "feed_for_user",
            self.backend.list_feed(limit as i64, cursor),
            move || async move {
                let query = Self::fallback_query(cursor, limit);
                self.backend.query_posts(&query).await
            },
        )
        .await?;

        let path = served.path();
        let mut posts = served.into_inner();
        posts.truncate(limit);

        let has_more = posts.len() == limit;
        let next_cursor = posts.last().map(Post::cursor);

        debug!(
            "Fetched feed page: path={:?} posts={} limit={} has_more={}",
            path,
            posts.len(),
            limit,
            has_more
        );

        Ok(FeedPage {
            posts,
            has_more,
            next_cursor,
            path,
        })
    }

    /// Direct query used when the feed procedure is unavailable.
    ///
    /// Only the cursor timestamp is carried into the predicate. Posts sharing
    /// the cursor's created_at but with a smaller id are skipped on the next
    /// page; the procedure path compares the full (created_at, id) pair and
    /// does not lose them.
    pub fn fallback_query(cursor: Option<Cursor>, limit: usize) -> PostQuery {
        PostQuery {
            exclude_deleted: true,
            // Row-level security narrows this to what the viewer may see
            visibilities: Visibility::ALL.to_vec(),
            created_before: cursor.map(|c| c.created_at),
            limit: limit as i64,
        }
    }
}
