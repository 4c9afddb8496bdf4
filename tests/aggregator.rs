use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use visio::activity::{
    ActivityAggregator, ActivitySummary, AggregatorConfig, AggregatorError, InvalidUserId,
    SourceKind, SourceStatus, Timestamp, UserId,
};
use visio::layout;
use visio::session::Session;
use visio::social;
use visio::store::{MemoryStore, RetryPolicy, StoreError};

fn fast_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().with_retry_policy(RetryPolicy::new(
        Duration::from_millis(5),
        Duration::from_millis(20),
    )))
}

fn at(millis: i64) -> Timestamp {
    Timestamp::from_millis(millis)
}

fn uid(id: &str) -> UserId {
    UserId::from(id)
}

async fn wait_until<F>(rx: &mut watch::Receiver<Arc<ActivitySummary>>, mut pred: F) -> Arc<ActivitySummary>
where
    F: FnMut(&ActivitySummary) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for summary");
    let summary = result.expect("summary channel closed");
    Arc::clone(&*summary)
}

fn status(summary: &ActivitySummary, kind: SourceKind) -> &SourceStatus {
    summary.health.get(kind)
}

// --- Core scenario ---

#[tokio::test]
async fn follow_message_and_read_flow() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();

    aggregator.start("U1").await.unwrap();
    let settled = aggregator.settled().await;
    assert_eq!(settled.user_id, Some(uid("U1")));
    assert_eq!(settled.total_unread(), 0);
    assert_eq!(status(&settled, SourceKind::Posts), &SourceStatus::Inactive);

    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(10)).await.unwrap();
    let summary = wait_until(&mut rx, |s| s.has_follower("U2")).await;
    assert_eq!(summary.new_followers.len(), 1);
    assert_eq!(summary.new_followers[0].followed_at, at(10));

    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "hello", at(100))
        .await
        .unwrap();
    let summary = wait_until(&mut rx, |s| s.unread_message_count == 1).await;
    assert_eq!(summary.unread_messages[0].sender_id, uid("U2"));
    assert_eq!(summary.unread_messages[0].content, "hello");
    assert_eq!(summary.total_unread(), 2);

    let conversation = layout::conversation_id(&uid("U1"), &uid("U2"));
    social::mark_read(store.as_ref(), &conversation, &uid("U1"), at(200))
        .await
        .unwrap();
    let summary = wait_until(&mut rx, |s| s.unread_message_count == 0).await;
    assert!(summary.unread_messages.is_empty());
    // Reading messages leaves the follower in place.
    assert!(summary.has_follower("U2"));

    aggregator.stop().await;
}

#[tokio::test]
async fn watermark_between_messages_scenario() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;

    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(10)).await.unwrap();
    let summary = wait_until(&mut rx, |s| s.has_follower("U2")).await;
    assert_eq!(summary.total_unread(), 1);

    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "hey", at(20))
        .await
        .unwrap();
    let summary = wait_until(&mut rx, |s| s.unread_message_count == 1).await;
    assert_eq!(summary.total_unread(), 2);

    // The watermark write arrives as a modification of the same conversation.
    let conversation = layout::conversation_id(&uid("U1"), &uid("U2"));
    social::mark_read(store.as_ref(), &conversation, &uid("U1"), at(25))
        .await
        .unwrap();
    let summary = wait_until(&mut rx, |s| s.unread_message_count == 0).await;
    assert_eq!(summary.total_unread(), 1);

    aggregator.stop().await;
}

#[tokio::test]
async fn own_messages_are_never_unread() {
    let store = fast_store();
    social::send_message(store.as_ref(), &uid("U1"), &uid("U2"), "hi", at(5))
        .await
        .unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    aggregator.start("U1").await.unwrap();
    let summary = aggregator.settled().await;
    assert_eq!(summary.unread_message_count, 0);
    aggregator.stop().await;
}

#[tokio::test]
async fn messages_before_start_are_unread() {
    let store = fast_store();
    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "earlier", at(5))
        .await
        .unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    aggregator.start("U1").await.unwrap();
    let mut rx = aggregator.subscribe();
    let summary = wait_until(&mut rx, |s| s.unread_message_count == 1).await;
    assert_eq!(summary.unread_messages[0].content, "earlier");
    aggregator.stop().await;
}

#[tokio::test]
async fn pre_existing_followers_are_not_new() {
    let store = fast_store();
    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(1)).await.unwrap();
    social::follow(store.as_ref(), &uid("U3"), &uid("U1"), at(2)).await.unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    let summary = aggregator.settled().await;
    assert!(summary.new_followers.is_empty());

    social::follow(store.as_ref(), &uid("U4"), &uid("U1"), at(3)).await.unwrap();
    let summary = wait_until(&mut rx, |s| s.has_follower("U4")).await;
    assert_eq!(summary.new_followers.len(), 1);

    aggregator.stop().await;
}

#[tokio::test]
async fn unfollow_removes_new_follower() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;

    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(1)).await.unwrap();
    wait_until(&mut rx, |s| s.has_follower("U2")).await;

    social::unfollow(store.as_ref(), &uid("U2"), &uid("U1")).await.unwrap();
    let summary = wait_until(&mut rx, |s| !s.has_follower("U2")).await;
    assert!(summary.new_followers.is_empty());

    aggregator.stop().await;
}

#[tokio::test]
async fn new_posts_only_from_followed_accounts() {
    let store = fast_store();
    social::follow(store.as_ref(), &uid("U1"), &uid("U2"), at(1)).await.unwrap();
    social::publish_post(store.as_ref(), &uid("U2"), "old news", at(2))
        .await
        .unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    let summary = aggregator.settled().await;
    assert_eq!(status(&summary, SourceKind::Posts), &SourceStatus::Live);
    assert!(summary.new_posts.is_empty());

    social::publish_post(store.as_ref(), &uid("U3"), "stranger", at(3))
        .await
        .unwrap();
    social::publish_post(store.as_ref(), &uid("U2"), "fresh", at(4))
        .await
        .unwrap();
    let summary = wait_until(&mut rx, |s| !s.new_posts.is_empty()).await;
    assert_eq!(summary.new_posts.len(), 1);
    assert_eq!(summary.new_posts[0].author_id, uid("U2"));
    assert_eq!(summary.new_posts[0].content, "fresh");

    // Deleting the post takes it back out.
    let id = summary.new_posts[0].post_id.clone();
    social::delete_post(store.as_ref(), &id).await.unwrap();
    wait_until(&mut rx, |s| s.new_posts.is_empty()).await;

    aggregator.stop().await;
}

#[tokio::test]
async fn previews_are_capped_but_count_is_exact() {
    let store = fast_store();
    for i in 0..5 {
        social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), &format!("m{i}"), at(10 + i))
            .await
            .unwrap();
    }

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig { preview_limit: 2 });
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    let summary = wait_until(&mut rx, |s| s.unread_message_count == 5).await;
    assert_eq!(summary.unread_messages.len(), 2);
    assert_eq!(summary.unread_messages[0].content, "m4");
    assert_eq!(summary.unread_messages[1].content, "m3");

    aggregator.stop().await;
}

// --- Lifecycle ---

#[tokio::test]
async fn start_rejects_empty_user() {
    let aggregator = ActivityAggregator::new(fast_store(), AggregatorConfig::default());
    assert_eq!(aggregator.start("  ").await, Err(AggregatorError::EmptyUserId));
    assert_eq!(aggregator.active_user().await, None);
}

#[tokio::test]
async fn start_rejects_ids_that_break_document_paths() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    assert_eq!(
        aggregator.start("john.doe").await,
        Err(AggregatorError::InvalidUserId(InvalidUserId::ReservedChar {
            id: "john.doe".to_string(),
            reserved: '.',
        }))
    );
    assert_eq!(aggregator.active_user().await, None);
    assert_eq!(store.listener_count(), 0);

    let err = Session::begin(store.clone(), "a_b", AggregatorConfig::default())
        .await
        .err()
        .expect("session should not begin");
    assert!(matches!(err, AggregatorError::InvalidUserId(_)));
}

#[tokio::test]
async fn start_is_idempotent_for_same_user_and_rejects_another() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;
    let listeners = store.listener_count();

    aggregator.start("U1").await.unwrap();
    assert_eq!(store.listener_count(), listeners);

    let err = aggregator.start("U2").await.unwrap_err();
    assert_eq!(
        err,
        AggregatorError::InvalidState {
            active: uid("U1"),
            requested: uid("U2"),
        }
    );
    assert_eq!(aggregator.active_user().await, Some(uid("U1")));

    aggregator.stop().await;
}

#[tokio::test]
async fn stop_releases_listeners_and_stops_publishing() {
    let store = fast_store();
    social::follow(store.as_ref(), &uid("U1"), &uid("U2"), at(1)).await.unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;
    assert_eq!(store.listener_count(), 3);

    aggregator.stop().await;
    assert_eq!(store.listener_count(), 0);
    let summary = aggregator.current_summary();
    assert_eq!(summary.user_id, None);
    assert_eq!(summary.total_unread(), 0);

    let mut rx = aggregator.subscribe();
    rx.borrow_and_update();
    social::follow(store.as_ref(), &uid("U3"), &uid("U1"), at(2)).await.unwrap();
    social::send_message(store.as_ref(), &uid("U3"), &uid("U1"), "anyone?", at(3))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!rx.has_changed().unwrap());

    // Stopping twice is harmless.
    aggregator.stop().await;
}

#[tokio::test]
async fn restart_after_stop_takes_a_fresh_baseline() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;
    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(1)).await.unwrap();
    wait_until(&mut rx, |s| s.has_follower("U2")).await;
    aggregator.stop().await;

    aggregator.start("U1").await.unwrap();
    let summary = aggregator.settled().await;
    // U2 is now part of the new session's initial snapshot.
    assert!(summary.new_followers.is_empty());
    aggregator.stop().await;
}

#[tokio::test]
async fn dropping_the_aggregator_releases_listeners() {
    let store = fast_store();
    {
        let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
        aggregator.start("U1").await.unwrap();
        aggregator.settled().await;
        assert_eq!(store.listener_count(), 2);
    }
    tokio::time::timeout(Duration::from_secs(1), async {
        while store.listener_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listeners were not released");
}

// --- Failure isolation ---

#[tokio::test]
async fn following_lookup_failure_only_affects_posts() {
    let store = fast_store();
    store.fail_next_get(
        &layout::following_collection(&uid("U1")),
        StoreError::permission_denied("following list is private"),
    );
    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "still here", at(1))
        .await
        .unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    aggregator.start("U1").await.unwrap();
    let summary = aggregator.settled().await;

    assert!(matches!(
        status(&summary, SourceKind::Posts),
        SourceStatus::Unavailable { .. }
    ));
    assert_eq!(status(&summary, SourceKind::Messages), &SourceStatus::Live);
    assert_eq!(status(&summary, SourceKind::Followers), &SourceStatus::Live);
    assert_eq!(summary.unread_message_count, 1);
    assert!(summary.new_posts.is_empty());

    aggregator.stop().await;
}

#[tokio::test]
async fn transient_following_lookup_failure_recovers() {
    let store = fast_store();
    social::follow(store.as_ref(), &uid("U1"), &uid("U2"), at(1)).await.unwrap();
    let following = layout::following_collection(&uid("U1"));
    store.fail_next_get(&following, StoreError::unavailable("offline"));
    store.fail_next_get(&following, StoreError::unavailable("still offline"));

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    wait_until(&mut rx, |s| s.health.get(SourceKind::Posts) == &SourceStatus::Live).await;

    social::publish_post(store.as_ref(), &uid("U2"), "after the outage", at(50))
        .await
        .unwrap();
    let summary = wait_until(&mut rx, |s| s.new_posts.len() == 1).await;
    assert_eq!(summary.new_posts[0].author_id, uid("U2"));
    assert!(!summary.health.is_degraded());

    aggregator.stop().await;
}

#[tokio::test]
async fn permission_denied_subscription_fails_without_retry() {
    let store = fast_store();
    store.fail_next_subscribe(
        &layout::followers_collection(&uid("U1")),
        StoreError::permission_denied("rules reject read"),
    );

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    aggregator.start("U1").await.unwrap();
    let summary = aggregator.settled().await;

    let followers = status(&summary, SourceKind::Followers);
    assert!(matches!(followers, SourceStatus::Failed { .. }));
    assert!(followers.reason().unwrap().contains("rules reject read"));
    assert_eq!(status(&summary, SourceKind::Messages), &SourceStatus::Live);
    assert_eq!(store.listeners_on(&layout::followers_collection(&uid("U1"))), 0);

    aggregator.stop().await;
}

#[tokio::test]
async fn transient_subscribe_failure_is_retried() {
    let store = fast_store();
    let followers = layout::followers_collection(&uid("U1"));
    store.fail_next_subscribe(&followers, StoreError::unavailable("offline"));
    store.fail_next_subscribe(&followers, StoreError::unavailable("still offline"));

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    let summary = wait_until(&mut rx, |s| {
        s.health.get(SourceKind::Followers) == &SourceStatus::Live
    })
    .await;
    assert!(!summary.health.is_degraded());
    assert_eq!(store.listeners_on(&followers), 1);

    aggregator.stop().await;
}

#[tokio::test]
async fn retries_give_up_after_policy_limit() {
    let store = Arc::new(
        MemoryStore::new().with_retry_policy(
            RetryPolicy::new(Duration::from_millis(2), Duration::from_millis(5)).with_max_attempts(2),
        ),
    );
    let followers = layout::followers_collection(&uid("U1"));
    for _ in 0..3 {
        store.fail_next_subscribe(&followers, StoreError::unavailable("down"));
    }

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    wait_until(&mut rx, |s| {
        matches!(s.health.get(SourceKind::Followers), SourceStatus::Failed { .. })
    })
    .await;

    aggregator.stop().await;
}

#[tokio::test]
async fn broken_listener_goes_stale_then_counts_outage_followers() {
    // A long first retry keeps the outage observable.
    let store = Arc::new(MemoryStore::new().with_retry_policy(RetryPolicy::new(
        Duration::from_millis(200),
        Duration::from_millis(200),
    )));
    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(1)).await.unwrap();

    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;
    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "before", at(2))
        .await
        .unwrap();
    wait_until(&mut rx, |s| s.unread_message_count == 1).await;

    let followers = layout::followers_collection(&uid("U1"));
    assert_eq!(store.break_listeners(&followers, StoreError::unavailable("network lost")), 1);
    let summary = wait_until(&mut rx, |s| {
        matches!(s.health.get(SourceKind::Followers), SourceStatus::Stale { .. })
    })
    .await;
    // Other sources keep their data and status.
    assert_eq!(summary.unread_message_count, 1);
    assert_eq!(status(&summary, SourceKind::Messages), &SourceStatus::Live);

    // Followed while disconnected.
    social::follow(store.as_ref(), &uid("U3"), &uid("U1"), at(3)).await.unwrap();

    let summary = wait_until(&mut rx, |s| {
        s.health.get(SourceKind::Followers) == &SourceStatus::Live && s.has_follower("U3")
    })
    .await;
    assert!(!summary.has_follower("U2"));
    assert_eq!(store.listeners_on(&followers), 1);

    aggregator.stop().await;
}

// --- Consistency ---

#[tokio::test]
async fn counts_do_not_drift_under_churn() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    aggregator.settled().await;

    let conversation = layout::conversation_id(&uid("U1"), &uid("U2"));
    for round in 0..10 {
        let base = round * 10;
        social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "ping", at(base + 1))
            .await
            .unwrap();
        social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "ping again", at(base + 2))
            .await
            .unwrap();
        social::mark_read(store.as_ref(), &conversation, &uid("U1"), at(base + 1))
            .await
            .unwrap();
    }
    // Each read lands between the round's two messages, so only the last
    // round's second message is still unread.
    let summary = wait_until(&mut rx, |s| {
        s.unread_message_count == 1 && s.unread_messages[0].sent_at == at(92)
    })
    .await;
    assert_eq!(summary.unread_messages.len(), 1);

    social::mark_read(store.as_ref(), &conversation, &uid("U1"), at(1_000))
        .await
        .unwrap();
    wait_until(&mut rx, |s| s.unread_message_count == 0).await;

    aggregator.stop().await;
}

#[tokio::test]
async fn sequence_increases_with_every_publish() {
    let store = fast_store();
    let aggregator = ActivityAggregator::new(store.clone(), AggregatorConfig::default());
    let mut rx = aggregator.subscribe();
    aggregator.start("U1").await.unwrap();
    let first = aggregator.settled().await.sequence;

    social::follow(store.as_ref(), &uid("U2"), &uid("U1"), at(1)).await.unwrap();
    let summary = wait_until(&mut rx, |s| s.has_follower("U2")).await;
    assert!(summary.sequence > first);

    aggregator.stop().await;
}

// --- Session ---

#[tokio::test]
async fn session_switch_moves_subscriptions_to_new_user() {
    let store = fast_store();
    social::send_message(store.as_ref(), &uid("U2"), &uid("U1"), "for U1", at(1))
        .await
        .unwrap();
    social::send_message(store.as_ref(), &uid("U3"), &uid("U2"), "for U2", at(2))
        .await
        .unwrap();
    social::send_message(store.as_ref(), &uid("U1"), &uid("U2"), "also for U2", at(3))
        .await
        .unwrap();

    let mut session = Session::begin(store.clone(), "U1", AggregatorConfig::default())
        .await
        .unwrap();
    let summary = session.activity().settled().await;
    assert_eq!(summary.unread_message_count, 1);

    session.switch_user("U2").await.unwrap();
    assert_eq!(session.user_id(), &uid("U2"));
    let mut rx = session.activity().subscribe();
    let summary = wait_until(&mut rx, |s| {
        s.user_id == Some(uid("U2")) && s.health.is_settled() && s.unread_message_count == 2
    })
    .await;
    assert_eq!(summary.unread_messages.len(), 2);
    assert_eq!(store.listener_count(), 2);

    session.end().await;
    assert_eq!(store.listener_count(), 0);
}
