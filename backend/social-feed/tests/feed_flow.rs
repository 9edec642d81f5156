/// End-to-end feed behaviour against the in-memory backend
use chrono::{DateTime, TimeZone, Utc};
use social_feed::config::FeedConfig;
use social_feed::domain::{Cursor, Post, Visibility};
use social_feed::repository::memory::{BackendCall, MemoryFeedBackend};
use social_feed::repository::{FeedBackend, StaticIdentity};
use social_feed::services::{AccessPath, FeedStatus, FeedStore, LoadOutcome, Mutator};
use social_feed::FeedError;
use std::sync::Arc;
use uuid::Uuid;

const VIEWER: u128 = 900;
const AUTHOR: u128 = 901;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn post(secs: i64, id: u128) -> Post {
    Post::new(
        Uuid::from_u128(id),
        Uuid::from_u128(AUTHOR),
        Some(format!("post {}", id)),
        Visibility::Public,
        ts(secs),
    )
}

fn ids(posts: &[Post]) -> Vec<u128> {
    posts.iter().map(|p| p.id.as_u128()).collect()
}

fn open_store(posts: Vec<Post>, page_size: usize) -> (Arc<MemoryFeedBackend>, FeedStore) {
    let viewer = Uuid::from_u128(VIEWER);
    let backend = Arc::new(MemoryFeedBackend::with_posts(Some(viewer), posts));
    let config = FeedConfig {
        page_size,
        ..FeedConfig::default()
    };
    let store = FeedStore::open(
        backend.clone(),
        Arc::new(StaticIdentity::signed_in(viewer)),
        &config,
    );
    (backend, store)
}

/// Mixed feed: tied timestamps, a deleted post and posts the viewer cannot see
fn mixed_posts() -> Vec<Post> {
    let mut posts: Vec<Post> = (1..=20).map(|i| post((i as i64 / 3) * 10, i)).collect();
    posts[7].is_deleted = true;
    posts[11].visibility = Visibility::Private;
    posts[15].visibility = Visibility::Followers;
    posts
}

#[tokio::test]
async fn test_first_page_is_bounded_ordered_and_live() {
    for page_size in [1usize, 2, 5, 12, 50] {
        let (_, store) = open_store(mixed_posts(), page_size);
        store.load_first_page().await.unwrap();
        let posts = store.posts();

        assert!(posts.len() <= page_size);
        assert!(posts.iter().all(|p| !p.is_deleted));
        assert!(posts.iter().all(|p| p.visibility == Visibility::Public));
        for pair in posts.windows(2) {
            assert!(
                (pair[0].created_at, pair[0].id) > (pair[1].created_at, pair[1].id),
                "feed must be strictly ordered by (created_at desc, id desc)"
            );
        }
    }
}

#[tokio::test]
async fn test_primary_keyset_scenario() {
    let (backend, store) = open_store(vec![post(100, 5), post(100, 4), post(90, 3)], 2);

    store.load_first_page().await.unwrap();
    assert_eq!(ids(&store.posts()), vec![5, 4]);
    assert_eq!(store.cursor(), Some(Cursor::new(ts(100), Uuid::from_u128(4))));

    assert_eq!(
        store.load_more().await.unwrap(),
        LoadOutcome::Applied { fetched: 1 }
    );
    assert_eq!(ids(&store.posts()), vec![5, 4, 3]);
    assert!(!store.has_more());
    assert_eq!(backend.call_count(BackendCall::QueryPosts), 0);
}

#[tokio::test]
async fn test_fallback_pagination_skips_posts_sharing_cursor_timestamp() {
    let posts = vec![post(100, 5), post(100, 4), post(100, 3), post(90, 2)];

    // Fallback path compares the timestamp only: post 3 shares t=100 with the
    // cursor and is never returned
    let (backend, store) = open_store(posts.clone(), 2);
    backend.set_procedures_missing(true);
    store.load_first_page().await.unwrap();
    store.load_more().await.unwrap();
    assert_eq!(ids(&store.posts()), vec![5, 4, 2]);

    // Procedure path keeps it
    let (_, store) = open_store(posts, 2);
    store.load_first_page().await.unwrap();
    store.load_more().await.unwrap();
    assert_eq!(ids(&store.posts()), vec![5, 4, 3, 2]);
}

#[tokio::test]
async fn test_load_more_is_noop_when_exhausted_or_in_flight() {
    let (backend, store) = open_store(vec![post(10, 1)], 5);
    store.load_first_page().await.unwrap();
    assert!(!store.has_more());

    backend.clear_calls();
    assert_eq!(store.load_more().await.unwrap(), LoadOutcome::Skipped);
    assert!(backend.calls().is_empty());

    let (_, store) = open_store((1..=10).map(|i| post(i as i64, i)).collect(), 3);
    let (first, more) = tokio::join!(store.load_first_page(), store.load_more());
    assert_eq!(first.unwrap(), LoadOutcome::Applied { fetched: 3 });
    assert_eq!(more.unwrap(), LoadOutcome::Skipped);
}

#[tokio::test]
async fn test_create_post_validation_and_optimistic_prepend() {
    let (backend, store) = open_store(vec![post(10, 1), post(20, 2)], 5);
    store.load_first_page().await.unwrap();
    backend.clear_calls();

    let err = store.create_post("", Visibility::Public).await.unwrap_err();
    assert!(matches!(err, FeedError::Validation(_)));
    assert!(backend.calls().is_empty());
    assert_eq!(
        store.error_message().as_deref(),
        Some("Post text cannot be empty")
    );

    let created = store.create_post("hello", Visibility::Private).await.unwrap();
    let posts = store.posts();
    assert_eq!(posts[0].id, created.id);
    assert_eq!(posts[0].text.as_deref(), Some("hello"));
    assert_eq!(posts[0].visibility, Visibility::Private);
    assert_eq!(posts.len(), 3);
    assert_eq!(store.error_message(), None);
    assert_eq!(backend.call_count(BackendCall::ListFeed), 0);
}

#[tokio::test]
async fn test_create_post_via_fallback_insert() {
    let (backend, store) = open_store(Vec::new(), 5);
    backend.set_procedures_missing(true);

    let created = store.create_post("  link-free  ", Visibility::Followers).await.unwrap();
    assert_eq!(created.text.as_deref(), Some("link-free"));
    assert_eq!(store.posts()[0].id, created.id);
    assert_eq!(
        backend.calls(),
        vec![BackendCall::CreatePost, BackendCall::InsertPost]
    );
}

#[tokio::test]
async fn test_add_comment_validation_and_reload() {
    let (backend, store) = open_store(vec![post(10, 1), post(20, 2)], 5);
    store.load_first_page().await.unwrap();
    backend.clear_calls();

    let err = store.add_comment(Uuid::from_u128(1), "  ").await.unwrap_err();
    assert!(matches!(err, FeedError::Validation(_)));
    assert!(backend.calls().is_empty());

    store.add_comment(Uuid::from_u128(1), "nice").await.unwrap();
    assert_eq!(
        backend.calls(),
        vec![BackendCall::CreateComment, BackendCall::ListFeed]
    );

    let commented = store
        .posts()
        .into_iter()
        .find(|p| p.id == Uuid::from_u128(1))
        .unwrap();
    assert_eq!(commented.comment_count, 1);
    assert_eq!(backend.comments_for(Uuid::from_u128(1))[0].text, "nice");
}

#[tokio::test]
async fn test_like_reconciliation_resets_pagination() {
    let (_, store) = open_store((1..=6).map(|i| post(i as i64 * 10, i)).collect(), 2);
    store.load_first_page().await.unwrap();
    store.load_more().await.unwrap();
    assert_eq!(store.posts().len(), 4);

    store.toggle_like(Uuid::from_u128(6)).await.unwrap();

    let posts = store.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].like_count, 1);
    assert!(posts[0].liked_by_me);
    assert_eq!(store.status(), FeedStatus::Idle);
}

#[tokio::test]
async fn test_toggle_like_twice_restores_state() {
    for procedures_missing in [false, true] {
        let (backend, store) = open_store(vec![post(10, 1)], 5);
        backend.set_procedures_missing(procedures_missing);
        let post_id = Uuid::from_u128(1);
        let viewer = Uuid::from_u128(VIEWER);

        let before = backend.has_reaction(post_id, viewer);
        store.toggle_like(post_id).await.unwrap();
        assert_ne!(backend.has_reaction(post_id, viewer), before);
        store.toggle_like(post_id).await.unwrap();
        assert_eq!(backend.has_reaction(post_id, viewer), before);
    }
}

#[tokio::test]
async fn test_concurrent_fallback_toggles_race() {
    let viewer = Uuid::from_u128(VIEWER);
    let post_id = Uuid::from_u128(1);
    let backend = Arc::new(MemoryFeedBackend::with_posts(Some(viewer), vec![post(10, 1)]));
    backend.set_procedures_missing(true);
    let mutator = Mutator::new(backend.clone(), Arc::new(StaticIdentity::signed_in(viewer)));

    // Both toggles read "absent" before either writes
    let (a, b) = tokio::join!(mutator.toggle_like(post_id), mutator.toggle_like(post_id));
    let results = [a, b];

    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], FeedError::Transport(msg) if msg.contains("duplicate key")));
    assert!(results
        .iter()
        .any(|r| matches!(r, Ok(served) if served.path() == AccessPath::Fallback)));

    // Still a valid binary state: exactly one reaction row
    assert!(backend.has_reaction(post_id, viewer));
    backend.set_procedures_missing(false);
    let page = backend.list_feed(10, None).await.unwrap();
    assert_eq!(page[0].like_count, 1);
}

#[tokio::test]
async fn test_toggle_like_without_identity_reports_error() {
    let backend = Arc::new(MemoryFeedBackend::with_posts(None, vec![post(10, 1)]));
    backend.set_procedures_missing(true);
    let store = FeedStore::open(
        backend.clone(),
        Arc::new(StaticIdentity::anonymous()),
        &FeedConfig::default(),
    );

    let err = store.toggle_like(Uuid::from_u128(1)).await.unwrap_err();
    assert_eq!(err, FeedError::IdentityUnavailable);
    assert_eq!(store.error_message().as_deref(), Some("Please sign in again"));
    assert_eq!(backend.call_count(BackendCall::ListFeed), 0);
}

#[tokio::test]
async fn test_cursor_token_resumes_pagination() {
    let (_, store) = open_store((1..=4).map(|i| post(i as i64, i)).collect(), 2);
    store.load_first_page().await.unwrap();
    let token = store.cursor().unwrap().encode();

    let cursor = Cursor::decode(&token).unwrap();
    assert_eq!(Some(cursor), store.cursor());
    assert!(matches!(
        Cursor::decode("%%%"),
        Err(FeedError::InvalidCursor(_))
    ));
}
