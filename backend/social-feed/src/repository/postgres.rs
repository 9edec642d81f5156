use crate::domain::models::{Cursor, NewComment, NewPost, Post, PostQuery, Visibility};
use crate::error::{FeedError, FeedResult};
use crate::repository::FeedBackend;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Columns read when selecting posts straight from the table
const POST_COLUMNS: &str =
    "id, author_id, text, visibility, created_at, is_deleted, link_url, link_title, link_image";

/// Postgres-backed feed data access
///
/// Every call runs in its own transaction with `app.current_user_id` set to
/// the acting user, which the row-level security policies and the stored
/// procedures read via `app_current_user()`.
#[derive(Clone)]
pub struct PgFeedBackend {
    pool: PgPool,
    acting_user: Option<Uuid>,
}

impl PgFeedBackend {
    pub fn new(pool: PgPool, acting_user: Option<Uuid>) -> Self {
        Self { pool, acting_user }
    }

    /// Apply the schema and stored procedures shipped with this crate
    pub async fn run_migrations(&self) -> FeedResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn session(&self) -> FeedResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        let user = self
            .acting_user
            .map(|id| id.to_string())
            .unwrap_or_default();

        sqlx::query("SELECT set_config('app.current_user_id', $1, true)")
            .bind(user)
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }
}

#[async_trait::async_trait]
impl FeedBackend for PgFeedBackend {
    async fn list_feed(&self, limit: i64, before: Option<Cursor>) -> FeedResult<Vec<Post>> {
        let limit = i32::try_from(limit)
            .map_err(|_| FeedError::Validation(format!("Page size out of range: {}", limit)))?;
        let mut tx = self.session().await?;
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, text, visibility, created_at, is_deleted,
                   link_url, link_title, link_image, like_count, comment_count, liked_by_me
            FROM feed_for_user($1, $2, $3)
            "#,
        )
        .bind(limit)
        .bind(before.map(|c| c.created_at))
        .bind(before.map(|c| c.id))
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!("feed_for_user returned {} posts", posts.len());
        Ok(posts)
    }

    async fn create_post(&self, text: &str, visibility: Visibility) -> FeedResult<Post> {
        let mut tx = self.session().await?;
        let query = format!("SELECT {} FROM create_post($1, $2)", POST_COLUMNS);
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(text)
            .bind(visibility)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(post)
    }

    async fn toggle_reaction(&self, post_id: Uuid) -> FeedResult<()> {
        let mut tx = self.session().await?;
        let liked: bool = sqlx::query_scalar("SELECT toggle_like($1)")
            .bind(post_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("toggle_like post={} liked={}", post_id, liked);
        Ok(())
    }

    async fn create_comment(&self, post_id: Uuid, text: &str) -> FeedResult<()> {
        let mut tx = self.session().await?;
        sqlx::query("SELECT add_comment($1, $2)")
            .bind(post_id)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn query_posts(&self, query: &PostQuery) -> FeedResult<Vec<Post>> {
        let mut tx = self.session().await?;
        let sql = format!(
            r#"
            SELECT {}
            FROM posts
            WHERE ($1::boolean = FALSE OR is_deleted = FALSE)
              AND visibility = ANY($2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
            POST_COLUMNS
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(query.exclude_deleted)
            .bind(&query.visibilities)
            .bind(query.created_before)
            .bind(query.limit)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(posts)
    }

    async fn insert_post(&self, post: &NewPost) -> FeedResult<Post> {
        let mut tx = self.session().await?;
        // author_id defaults to app_current_user()
        let sql = format!(
            "INSERT INTO posts (text, visibility) VALUES ($1, $2) RETURNING {}",
            POST_COLUMNS
        );
        let created = sqlx::query_as::<_, Post>(&sql)
            .bind(&post.text)
            .bind(post.visibility)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(created)
    }

    async fn reaction_exists(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<bool> {
        let mut tx = self.session().await?;
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM post_reactions
                WHERE post_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(exists)
    }

    async fn insert_reaction(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<()> {
        let mut tx = self.session().await?;
        // No ON CONFLICT: a duplicate insert surfaces as an error
        sqlx::query(
            r#"
            INSERT INTO post_reactions (post_id, user_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn delete_reaction(&self, post_id: Uuid, user_id: Uuid) -> FeedResult<()> {
        let mut tx = self.session().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM post_reactions
            WHERE post_id = $1 AND user_id = $2
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(
            "delete_reaction post={} rows_affected={}",
            post_id,
            result.rows_affected()
        );
        Ok(())
    }

    async fn insert_comment(&self, comment: &NewComment) -> FeedResult<()> {
        let mut tx = self.session().await?;
        sqlx::query(
            r#"
            INSERT INTO comments (post_id, text)
            VALUES ($1, $2)
            "#,
        )
        .bind(comment.post_id)
        .bind(&comment.text)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }
}
