#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use visio::activity::{ActivityAggregator, AggregatorConfig, Timestamp, UserId};
use visio::social;
use serde_json::json;
use visio::store::{fields, DocumentStore, Query, SqliteStore, StoreErrorKind, WriteBatch};

fn uid(id: &str) -> UserId {
    UserId::from(id)
}

#[tokio::test]
async fn initialize_creates_schema() {
    let store = SqliteStore::in_memory().unwrap();
    assert_eq!(store.table_count().await.unwrap(), 2);
}

#[tokio::test]
async fn open_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.db");
    let err = SqliteStore::open(&path.to_string_lossy()).err().expect("open should fail");
    assert_eq!(err.kind, StoreErrorKind::NotFound);
}

#[tokio::test]
async fn documents_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("visio.db");
    let path = path.to_string_lossy().into_owned();

    {
        let store = SqliteStore::initialize(&path).unwrap();
        social::follow(&store, &uid("U2"), &uid("U1"), Timestamp::from_millis(5))
            .await
            .unwrap();
        social::send_message(&store, &uid("U2"), &uid("U1"), "persisted", Timestamp::from_millis(6))
            .await
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let profile = social::profile(&store, &uid("U1")).await.unwrap();
    assert_eq!(profile.followers_count, 1);
    let conversations = store
        .get(&Query::collection("conversations").array_contains("participants", "U1"))
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
}

#[tokio::test]
async fn preconditions_roll_back_the_whole_batch() {
    let store = SqliteStore::in_memory().unwrap();
    let err = store
        .commit(
            WriteBatch::new()
                .set("posts", "p1", fields(json!({})))
                .require_exists("posts", "p0"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, StoreErrorKind::FailedPrecondition);
    assert!(store.get_document("posts", "p1").await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_follow_counts_once_on_sqlite() {
    let store = SqliteStore::in_memory().unwrap();
    let at = Timestamp::from_millis(1);
    assert!(social::follow(&store, &uid("U2"), &uid("U1"), at).await.unwrap());
    assert!(!social::follow(&store, &uid("U2"), &uid("U1"), at).await.unwrap());
    let profile = social::profile(&store, &uid("U1")).await.unwrap();
    assert_eq!(profile.followers_count, 1);
}

#[tokio::test]
async fn aggregator_runs_on_sqlite() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    social::follow(store.as_ref(), &uid("U1"), &uid("U2"), Timestamp::from_millis(1))
        .await
        .unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;
    assert_eq!(store.listener_count(), 3);

    social::publish_post(store.as_ref(), &uid("U2"), "from sqlite", Timestamp::from_millis(2))
        .await
        .unwrap();
    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "yo", Timestamp::from_millis(3))
        .await
        .unwrap();

    let summary = tokio::time::timeout(
        Duration::from_secs(3),
        rx.wait_for(|s| s.new_posts.len() == 1 && s.unread_message_count == 1),
    )
    .await
    .expect("timed out")
    .map(|s| Arc::clone(&*s))
    .expect("channel closed");
    assert_eq!(summary.new_posts[0].content, "from sqlite");

    aggregator.stop().await;
    assert_eq!(store.listener_count(), 0);
}
