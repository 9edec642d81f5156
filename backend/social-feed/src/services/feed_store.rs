use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::domain::models::{Cursor, Post, Visibility};
use crate::error::{FeedError, FeedResult};
use crate::repository::{FeedBackend, IdentityProvider};
use crate::services::mutator::Mutator;
use crate::services::page_fetcher::PageFetcher;
use crate::services::reconciler::{Mutation, Reconciler, Reconciliation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Idle,
    LoadingFirst,
    LoadingMore,
    Error,
}

impl FeedStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, FeedStatus::LoadingFirst | FeedStatus::LoadingMore)
    }
}

/// What a load call did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was applied; `fetched` posts came back
    Applied { fetched: usize },
    /// Nothing to do: a load is in flight or the feed is exhausted
    Skipped,
    /// A newer first-page load was issued while this one was pending; its
    /// response was dropped
    Superseded,
}

/// Read-only view of the store for presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    pub posts: Vec<Post>,
    pub status: FeedStatus,
    pub has_more: bool,
    pub cursor: Option<Cursor>,
    pub error_message: Option<String>,
    pub generation: u64,
}

struct FeedState {
    posts: Vec<Post>,
    cursor: Option<Cursor>,
    has_more: bool,
    status: FeedStatus,
    error_message: Option<String>,
    /// Bumped by every first-page load; responses carrying an older value are stale
    generation: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            posts: Vec::new(),
            cursor: None,
            has_more: true,
            status: FeedStatus::Idle,
            error_message: None,
            generation: 0,
        }
    }
}

/// Message shown next to the action that failed
fn failure_message(context: &str, err: &FeedError) -> String {
    match err {
        FeedError::Validation(_) | FeedError::IdentityUnavailable => err.user_message(),
        _ => context.to_string(),
    }
}

/// Owned state of one feed screen: the ordered posts, the pagination cursor
/// and the load status.
///
/// Methods take `&self` so overlapping calls can be awaited concurrently on one
/// task. The state lock is only held between suspension points; all ordering
/// between overlapping loads is decided by the generation counter.
pub struct FeedStore {
    fetcher: PageFetcher,
    mutator: Mutator,
    reconciler: Reconciler,
    page_size: usize,
    state: Mutex<FeedState>,
}

impl FeedStore {
    pub fn new(
        fetcher: PageFetcher,
        mutator: Mutator,
        reconciler: Reconciler,
        page_size: usize,
    ) -> Self {
        Self {
            fetcher,
            mutator,
            reconciler,
            page_size,
            state: Mutex::new(FeedState::default()),
        }
    }

    /// Open a feed session over `backend`
    pub fn open(
        backend: Arc<dyn FeedBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: &FeedConfig,
    ) -> Self {
        info!(
            "Feed session opened: page_size={} reload_after_failed_mutation={}",
            config.page_size, config.reload_after_failed_mutation
        );
        Self::new(
            PageFetcher::new(backend.clone()),
            Mutator::new(backend, identity),
            Reconciler::new(config.reload_after_failed_mutation),
            config.page_size,
        )
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.lock();
        FeedSnapshot {
            posts: state.posts.clone(),
            status: state.status,
            has_more: state.has_more,
            cursor: state.cursor,
            error_message: state.error_message.clone(),
            generation: state.generation,
        }
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.lock().posts.clone()
    }

    pub fn status(&self) -> FeedStatus {
        self.state.lock().status
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().has_more
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.state.lock().cursor
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.lock().error_message.clone()
    }

    /// Replace the list with a fresh first page.
    ///
    /// On failure the list is kept and the store moves to `Error`.
    pub async fn load_first_page(&self) -> FeedResult<LoadOutcome> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.status = FeedStatus::LoadingFirst;
            state.error_message = None;
            state.generation
        };

        let result = self.fetcher.fetch_page(None, self.page_size).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(
                "Discarding stale first page: generation={} latest={}",
                generation, state.generation
            );
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok(page) => {
                let fetched = page.posts.len();
                state.posts = page.posts;
                state.cursor = page.next_cursor;
                state.has_more = page.has_more;
                state.status = FeedStatus::Idle;
                debug!(
                    "First page applied: posts={} has_more={}",
                    fetched, state.has_more
                );
                Ok(LoadOutcome::Applied { fetched })
            }
            Err(e) => {
                warn!("Failed to load feed: {}", e);
                state.status = FeedStatus::Error;
                state.error_message = Some(failure_message("Failed to load feed", &e));
                Err(e)
            }
        }
    }

    /// Append the next page after the current cursor.
    ///
    /// No-op while any load is pending or once the feed is exhausted.
    pub async fn load_more(&self) -> FeedResult<LoadOutcome> {
        let (generation, cursor) = {
            let mut state = self.state.lock();
            if !state.has_more || state.status.is_loading() {
                return Ok(LoadOutcome::Skipped);
            }
            state.status = FeedStatus::LoadingMore;
            state.error_message = None;
            (state.generation, state.cursor)
        };

        let result = self.fetcher.fetch_page(cursor, self.page_size).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(
                "Discarding page loaded against a reset feed: generation={} latest={}",
                generation, state.generation
            );
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok(page) => {
                let fetched = page.posts.len();
                state.posts.extend(page.posts);
                if let Some(next) = page.next_cursor {
                    state.cursor = Some(next);
                }
                state.has_more = page.has_more;
                state.status = FeedStatus::Idle;
                debug!(
                    "Next page applied: fetched={} total={} has_more={}",
                    fetched,
                    state.posts.len(),
                    state.has_more
                );
                Ok(LoadOutcome::Applied { fetched })
            }
            Err(e) => {
                warn!("Failed to load more: {}", e);
                state.status = FeedStatus::Error;
                state.error_message = Some(failure_message("Failed to load more", &e));
                Err(e)
            }
        }
    }

    /// Create a post and put it at the head of the list without re-fetching
    pub async fn create_post(&self, text: &str, visibility: Visibility) -> FeedResult<Post> {
        self.state.lock().error_message = None;

        let result = self.mutator.create_post(text, visibility).await;
        let succeeded = result.is_ok();

        match (self.reconciler.after(Mutation::CreatePost, succeeded), result) {
            (Reconciliation::MergeLocally, Ok(served)) => {
                let post = served.into_inner();
                self.state.lock().posts.insert(0, post.clone());
                Ok(post)
            }
            (_, Ok(served)) => Ok(served.into_inner()),
            (_, Err(e)) => {
                self.state.lock().error_message = Some(failure_message("Failed to post", &e));
                Err(e)
            }
        }
    }

    /// Toggle the current user's like, then reconcile
    pub async fn toggle_like(&self, post_id: Uuid) -> FeedResult<()> {
        self.state.lock().error_message = None;
        let result = self.mutator.toggle_like(post_id).await.map(|_| ());
        self.reconcile(Mutation::ToggleLike, result, "Failed to toggle like")
            .await
    }

    /// Add a comment, then reconcile
    pub async fn add_comment(&self, post_id: Uuid, text: &str) -> FeedResult<()> {
        self.state.lock().error_message = None;
        let result = self.mutator.add_comment(post_id, text).await.map(|_| ());
        self.reconcile(Mutation::AddComment, result, "Failed to comment")
            .await
    }

    /// Apply the reconciliation policy after a like or comment. A failing
    /// reload does not change the mutation's result.
    async fn reconcile(
        &self,
        mutation: Mutation,
        result: FeedResult<()>,
        context: &str,
    ) -> FeedResult<()> {
        if self.reconciler.after(mutation, result.is_ok()) == Reconciliation::ReloadFirstPage {
            if let Err(e) = self.load_first_page().await {
                warn!("Reload after {:?} failed: {}", mutation, e);
            }
        }

        if let Err(e) = &result {
            warn!("{:?} failed: {}", mutation, e);
            self.state.lock().error_message = Some(failure_message(context, e));
        }
        result
    }
}

impl Drop for FeedStore {
    fn drop(&mut self) {
        debug!(
            "Feed session closed: posts={}",
            self.state.get_mut().posts.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{BackendCall, MemoryFeedBackend};
    use crate::repository::StaticIdentity;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn store_with(
        posts: Vec<Post>,
        page_size: usize,
    ) -> (Arc<MemoryFeedBackend>, FeedStore, Uuid) {
        let user = Uuid::from_u128(77);
        let backend = Arc::new(MemoryFeedBackend::with_posts(Some(user), posts));
        let config = FeedConfig {
            page_size,
            ..FeedConfig::default()
        };
        let store = FeedStore::open(
            backend.clone(),
            Arc::new(StaticIdentity::signed_in(user)),
            &config,
        );
        (backend, store, user)
    }

    fn numbered(count: u128) -> Vec<Post> {
        (1..=count)
            .map(|i| {
                Post::new(
                    Uuid::from_u128(i),
                    Uuid::from_u128(500),
                    Some(format!("post {}", i)),
                    Visibility::Public,
                    ts(i as i64 * 10),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (_, store, _) = store_with(Vec::new(), 3);
        let snapshot = store.snapshot();
        assert!(snapshot.posts.is_empty());
        assert_eq!(snapshot.status, FeedStatus::Idle);
        assert!(snapshot.has_more);
        assert_eq!(snapshot.cursor, None);
        assert_eq!(snapshot.error_message, None);
    }

    #[tokio::test]
    async fn test_load_first_then_more_until_exhausted() {
        let (_, store, _) = store_with(numbered(5), 2);

        assert_eq!(
            store.load_first_page().await.unwrap(),
            LoadOutcome::Applied { fetched: 2 }
        );
        assert_eq!(store.cursor(), Some(Cursor::new(ts(40), Uuid::from_u128(4))));

        store.load_more().await.unwrap();
        assert_eq!(
            store.load_more().await.unwrap(),
            LoadOutcome::Applied { fetched: 1 }
        );
        assert!(!store.has_more());
        assert_eq!(store.load_more().await.unwrap(), LoadOutcome::Skipped);

        let ids: Vec<_> = store.posts().iter().map(|p| p.id).collect();
        let expected: Vec<_> = (1..=5).rev().map(Uuid::from_u128).collect();
        assert_eq!(ids, expected);
        assert_eq!(store.status(), FeedStatus::Idle);
    }

    #[tokio::test]
    async fn test_exact_boundary_needs_one_empty_fetch() {
        let (backend, store, _) = store_with(numbered(4), 2);
        assert_eq!(store.page_size(), 2);

        store.load_first_page().await.unwrap();
        store.load_more().await.unwrap();
        assert!(store.has_more());
        let cursor = store.cursor();
        assert_eq!(cursor, Some(Cursor::new(ts(10), Uuid::from_u128(1))));

        assert_eq!(
            store.load_more().await.unwrap(),
            LoadOutcome::Applied { fetched: 0 }
        );
        assert!(!store.has_more());
        assert_eq!(store.cursor(), cursor);
        assert_eq!(store.posts().len(), 4);
        assert_eq!(backend.call_count(BackendCall::ListFeed), 3);
    }

    #[tokio::test]
    async fn test_empty_first_page_clears_cursor() {
        let (_, store, _) = store_with(Vec::new(), 3);
        store.load_first_page().await.unwrap();
        assert_eq!(store.cursor(), None);
        assert!(!store.has_more());
    }

    #[tokio::test]
    async fn test_first_page_failure_keeps_list() {
        let (backend, store, _) = store_with(numbered(3), 2);
        store.load_first_page().await.unwrap();

        backend.set_procedures_missing(true);
        backend.fail(BackendCall::QueryPosts);
        assert!(store.load_first_page().await.is_err());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.status, FeedStatus::Error);
        assert_eq!(snapshot.posts.len(), 2);
        assert_eq!(snapshot.error_message.as_deref(), Some("Failed to load feed"));
    }

    #[tokio::test]
    async fn test_overlapping_load_more_fetches_once() {
        let (backend, store, _) = store_with(numbered(6), 2);
        store.load_first_page().await.unwrap();
        backend.clear_calls();

        let (a, b) = tokio::join!(store.load_more(), store.load_more());
        let outcomes = [a.unwrap(), b.unwrap()];

        assert!(outcomes.contains(&LoadOutcome::Skipped));
        assert!(outcomes.contains(&LoadOutcome::Applied { fetched: 2 }));
        assert_eq!(backend.call_count(BackendCall::ListFeed), 1);
        assert_eq!(store.posts().len(), 4);
    }

    #[tokio::test]
    async fn test_stale_first_page_is_discarded() {
        let (_, store, _) = store_with(numbered(3), 2);

        let (first, second) = tokio::join!(store.load_first_page(), store.load_first_page());

        assert_eq!(first.unwrap(), LoadOutcome::Superseded);
        assert_eq!(second.unwrap(), LoadOutcome::Applied { fetched: 2 });
        assert_eq!(store.snapshot().generation, 2);
        assert_eq!(store.status(), FeedStatus::Idle);
    }

    #[tokio::test]
    async fn test_reload_drops_pending_load_more() {
        let (_, store, _) = store_with(numbered(6), 2);
        store.load_first_page().await.unwrap();

        let (more, reload) = tokio::join!(store.load_more(), store.load_first_page());

        assert_eq!(more.unwrap(), LoadOutcome::Superseded);
        assert_eq!(reload.unwrap(), LoadOutcome::Applied { fetched: 2 });
        assert_eq!(store.posts().len(), 2);
    }

    #[tokio::test]
    async fn test_create_post_prepends_without_reload() {
        let (backend, store, user) = store_with(numbered(3), 2);
        store.load_first_page().await.unwrap();
        backend.clear_calls();

        let post = store.create_post("hello", Visibility::Private).await.unwrap();

        let posts = store.posts();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].id, post.id);
        assert_eq!(posts[0].author_id, user);
        assert_eq!(backend.calls(), vec![BackendCall::CreatePost]);
    }

    #[tokio::test]
    async fn test_failed_like_skips_reload_and_reports() {
        let (backend, store, _) = store_with(numbered(3), 2);
        store.load_first_page().await.unwrap();
        backend.set_procedures_missing(true);
        backend.fail(BackendCall::ReactionExists);
        backend.clear_calls();

        let result = store.toggle_like(Uuid::from_u128(3)).await;

        assert!(matches!(result, Err(FeedError::Transport(_))));
        assert_eq!(backend.call_count(BackendCall::ListFeed), 0);
        assert_eq!(backend.call_count(BackendCall::QueryPosts), 0);
        assert_eq!(
            store.error_message().as_deref(),
            Some("Failed to toggle like")
        );
    }

    #[tokio::test]
    async fn test_failed_comment_reloads_when_configured() {
        let user = Uuid::from_u128(77);
        let backend = Arc::new(MemoryFeedBackend::with_posts(Some(user), numbered(3)));
        let config = FeedConfig {
            page_size: 2,
            reload_after_failed_mutation: true,
            ..FeedConfig::default()
        };
        let store = FeedStore::open(
            backend.clone(),
            Arc::new(StaticIdentity::signed_in(user)),
            &config,
        );
        backend.fail(BackendCall::CreateComment);
        backend.fail(BackendCall::InsertComment);

        let result = store.add_comment(Uuid::from_u128(3), "nice").await;

        assert!(result.is_err());
        assert_eq!(backend.call_count(BackendCall::ListFeed), 1);
        assert_eq!(store.posts().len(), 2);
        assert_eq!(store.error_message().as_deref(), Some("Failed to comment"));
    }
}
