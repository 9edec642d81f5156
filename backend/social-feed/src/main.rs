use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use social_feed::config::Config;
use social_feed::repository::{PgFeedBackend, StaticIdentity};
use social_feed::services::{FeedStore, LoadOutcome};

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,social_feed=debug,sqlx=warn".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting social-feed probe");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration loaded: env={}, page_size={}, user={:?}",
        config.app.env, config.feed.page_size, config.feed.user_id
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database pool created");

    let backend = Arc::new(PgFeedBackend::new(pool, config.feed.user_id));
    if config.feed.run_migrations {
        backend
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed");
    }

    let identity = Arc::new(StaticIdentity::new(config.feed.user_id));
    let store = FeedStore::open(backend, identity, &config.feed);

    match store.load_first_page().await {
        Ok(LoadOutcome::Applied { fetched }) => {
            let snapshot = store.snapshot();
            info!(
                "First page loaded: posts={} has_more={} next_cursor={:?}",
                fetched,
                snapshot.has_more,
                snapshot.cursor.map(|c| c.encode())
            );
            if config.app.log_format.eq_ignore_ascii_case("json") {
                let body = serde_json::to_string(&snapshot)
                    .context("Failed to serialize feed snapshot")?;
                println!("{}", body);
                return Ok(());
            }
            for post in &snapshot.posts {
                info!(
                    "post id={} author={} visibility={} likes={} comments={} created_at={}",
                    post.id,
                    post.author_id,
                    post.visibility,
                    post.like_count,
                    post.comment_count,
                    post.created_at
                );
            }
        }
        Ok(outcome) => warn!("First page not applied: {:?}", outcome),
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to load feed: {}", e));
        }
    }

    Ok(())
}
