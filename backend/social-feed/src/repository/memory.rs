use crate::domain::models::{
    Comment, Cursor, NewComment, NewPost, Post, PostQuery, Reaction, Visibility,
};
use crate::error::{FeedError, FeedResult};
use crate::repository::FeedBackend;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Data-access calls recorded by [`MemoryFeedBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCall {
    ListFeed,
    CreatePost,
    ToggleReaction,
    CreateComment,
    QueryPosts,
    InsertPost,
    ReactionExists,
    InsertReaction,
    DeleteReaction,
    InsertComment,
}

impl BackendCall {
    fn is_procedure(&self) -> bool {
        matches!(
            self,
            BackendCall::ListFeed
                | BackendCall::CreatePost
                | BackendCall::ToggleReaction
                | BackendCall::CreateComment
        )
    }

    fn procedure_name(&self) -> &'static str {
        match self {
            BackendCall::ListFeed => "feed_for_user",
            BackendCall::CreatePost => "create_post",
            BackendCall::ToggleReaction => "toggle_like",
            BackendCall::CreateComment => "add_comment",
            _ => "",
        }
    }
}

#[derive(Default)]
struct MemoryState {
    posts: Vec<Post>,
    reactions: HashMap<(Uuid, Uuid), Reaction>,
    comments: Vec<Comment>,
    follows: HashSet<(Uuid, Uuid)>,
    procedures_missing: bool,
    failing: HashSet<BackendCall>,
    calls: Vec<BackendCall>,
}

/// Current time at the microsecond precision Postgres stores
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl MemoryState {
    fn can_see(&self, viewer: Option<Uuid>, post: &Post) -> bool {
        match post.visibility {
            Visibility::Public => true,
            Visibility::Private => viewer == Some(post.author_id),
            Visibility::Followers => match viewer {
                Some(v) => v == post.author_id || self.follows.contains(&(v, post.author_id)),
                None => false,
            },
        }
    }

    fn with_aggregates(&self, viewer: Option<Uuid>, post: &Post) -> Post {
        let mut post = post.clone();
        post.like_count = self
            .reactions
            .keys()
            .filter(|(post_id, _)| *post_id == post.id)
            .count() as i64;
        post.comment_count = self
            .comments
            .iter()
            .filter(|c| c.post_id == post.id)
            .count() as i64;
        post.liked_by_me = viewer
            .map(|v| self.reactions.contains_key(&(post.id, v)))
            .unwrap_or(false);
        post
    }

    /// Visible rows in feed order
    fn visible_posts(&self, viewer: Option<Uuid>) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self
            .posts
            .iter()
            .filter(|p| self.can_see(viewer, p))
            .collect();
        posts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        posts
    }
}

/// In-process feed backend with row-level visibility rules, switchable stored
/// procedures and per-call failure injection
///
/// Every call yields to the scheduler before touching state, so concurrent
/// callers interleave at each data-access boundary like they would against a
/// remote backend.
pub struct MemoryFeedBackend {
    acting_user: Option<Uuid>,
    state: Mutex<MemoryState>,
}

impl MemoryFeedBackend {
    pub fn new(acting_user: Option<Uuid>) -> Self {
        Self {
            acting_user,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_posts(acting_user: Option<Uuid>, posts: Vec<Post>) -> Self {
        let backend = Self::new(acting_user);
        backend.state.lock().posts = posts;
        backend
    }

    pub fn seed_post(&self, post: Post) {
        self.state.lock().posts.push(post);
    }

    pub fn follow(&self, follower_id: Uuid, followee_id: Uuid) {
        self.state.lock().follows.insert((follower_id, followee_id));
    }

    /// Simulate a database without the composed procedures installed
    pub fn set_procedures_missing(&self, missing: bool) {
        self.state.lock().procedures_missing = missing;
    }

    /// Make every subsequent `call` fail with a transport error
    pub fn fail(&self, call: BackendCall) {
        self.state.lock().failing.insert(call);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, call: BackendCall) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn has_reaction(&self, post_id: Uuid, user_id: Uuid) -> bool {
        self.state.lock().reactions.contains_key(&(post_id, user_id))
    }

    /// Comments on a post, oldest first
    pub fn comments_for(&self, post_id: Uuid) -> Vec<Comment> {
        let mut comments: Vec<Comment> = self
            .state
            .lock()
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        comments
    }

    async fn enter(&self, call: BackendCall) -> FeedResult<()> {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.calls.push(call);

        if call.is_procedure() && state.procedures_missing {
            return Err(FeedError::Transport(format!(
                "function {} does not exist",
                call.procedure_name()
            )));
        }
        if state.failing.contains(&call) {
            return Err(FeedError::Transport(format!("{:?} failed", call)));
        }
        Ok(())
    }

    fn require_user(&self) -> FeedResult<Uuid> {
        self.acting_user
            .ok_or_else(|| FeedError::Access("not authenticated".to_string()))
    }

    fn require_user_match(&self, user_id: Uuid) -> FeedResult<()> {
        if self.require_user()? != user_id {
            return Err(FeedError::Access(
                "new row violates row-level security policy".to_string(),
            ));
        }
        Ok(())
    }

    fn store_post(&self, text: &str, visibility: Visibility) -> FeedResult<Post> {
        let author_id = self.require_user()?;
        let post = Post::new(
            Uuid::new_v4(),
            author_id,
            Some(text.to_string()),
            visibility,
            now_micros(),
        );
        self.state.lock().posts.push(post.clone());
        Ok(post)
    }

    fn store_comment(&self, post_id: Uuid, text: &str) -> FeedResult<()> {
        let author_id = self.require_user()?;
        let mut state = self.state.lock();

        let commentable = state
            .posts
            .iter()
            .any(|p| p.id == post_id && !p.is_deleted && state.can_see(Some(author_id), p));
        if !commentable {
            return Err(FeedError::Access(
                "new row violates row-level security policy for table \"comments\"".to_string(),
            ));
        }

        state.comments.push(Comment {
            id: Uuid::new_v4(),
            post_id,
            author_id,
            text: text.to_string(),
            created_at: now_micros(),
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedBackend for MemoryFeedBackend {
    async fn list_feed(&self, limit: i64, before: Option<Cursor>) -> FeedResult<Vec<Post>> {
        self.enter(BackendCall::ListFeed).await?;
        let viewer = self.acting_user;
        let state = self.state.lock();

        let page = state
            .visible_posts(viewer)
            .into_iter()
            .filter(|p| !p.is_deleted)
            .filter(|p| before.map(|c| c.admits(p)).unwrap_or(true))
            .take(limit.max(0) as usize)
            .map(|p| state.with_aggregates(viewer, p))
            .collect();
        Ok(page)
    }

    async fn create_post(&self, text: &str, visibility: Visibility) -> FeedResult<Post> {
        self.enter(BackendCall::CreatePost).await?;
        self.store_post(text.trim(), visibility)
    }

    async fn toggle_reaction(&self, post_id: Uuid) -> FeedResult<()> {
        self.enter(BackendCall::ToggleReaction).await?;
        let user_id = self.require_user()?;
        let mut state = self.state.lock();

        let key = (post_id, user_id);
        if state.reactions.remove(&key).is_none() {
            state.reactions.insert(
                key,
                Reaction {
                    post_id,
                    user_id,
                    created_at: now_micros(),
                },
            );
        }
        Ok(())
    }

    async fn create_comment(&self, post_id: Uuid, text: &str) -> FeedResult<()> {
        self.enter(BackendCall::CreateComment).await?;
        self.store_comment(post_id, text.trim())
    }

    async fn query_posts(&self, query: &PostQuery) -> FeedResult<Vec<Post>> {
        self.enter(BackendCall::QueryPosts).await?;
        let state = self.state.lock();

        let rows = state
            .visible_posts(self.acting_user)
            .into_iter()
            .filter(|p| !query.exclude_deleted || !p.is_deleted)
            .filter(|p| query.visibilities.contains(&p.visibility))
            .filter(|p| query.created_before.map(|t| p.created_at < t).unwrap_or(true))
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn insert_post(&self, post: &NewPost) -> FeedResult<Post> {
        self.enter(BackendCall::InsertPost).await?;
        self.store_post(&post.text, post.visibility)
    }

    async fn reaction_exists(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<bool> {
        self.enter(BackendCall::ReactionExists).await?;
        Ok(self.state.lock().reactions.contains_key(&(post_id, user_id)))
    }

    async fn insert_reaction(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<()> {
        self.enter(BackendCall::InsertReaction).await?;
        self.require_user_match(user_id)?;
        let mut state = self.state.lock();

        let key = (post_id, user_id);
        if state.reactions.contains_key(&key) {
            return Err(FeedError::Transport(
                "duplicate key value violates unique constraint \"post_reactions_pkey\""
                    .to_string(),
            ));
        }
        state.reactions.insert(
            key,
            Reaction {
                post_id,
                user_id,
                created_at: now_micros(),
            },
        );
        Ok(())
    }

    async fn delete_reaction(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<()> {
        self.enter(BackendCall::DeleteReaction).await?;
        self.require_user_match(user_id)?;
        // Deleting a missing row is a no-op, as in SQL
        self.state.lock().reactions.remove(&(post_id, user_id));
        Ok(())
    }

    async fn insert_comment(&self, comment: &NewComment) -> FeedResult<()> {
        self.enter(BackendCall::InsertComment).await?;
        self.store_comment(comment.post_id, &comment.text)
    }
}
