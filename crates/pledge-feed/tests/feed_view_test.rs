//! Mounted feed view behavior over the in-memory service.
//!
//! Every test runs on a paused clock: sleeps advance virtual time as soon as
//! the runtime is idle, so debounce and cooldown windows are exact.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value as JsonValue};
use tokio::time::sleep;

use pledge_feed::{
    Entity, EntityBody, EntityId, EntityKind, EntityService, Error, FeedConfig, FeedHandle,
    FeedScope, FeedView, FetchPage, LoadState, LocalBroadcast, LocalNotice, MemoryEntityService,
    NotificationStream, OptimisticSubmitter, Result, Submission,
};

const SCOPE: &str = "spring-drive";

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn contribution(id: &str, name: &str, amount: f64, offset_secs: i64) -> Entity {
    Entity {
        id: EntityId::parse(id),
        display_name: name.to_string(),
        emoji: "💚".to_string(),
        body: EntityBody::Contribution { amount },
        created_at: base_time() + chrono::Duration::seconds(offset_secs),
        message: None,
        is_from_known_contributor: false,
        is_approved: true,
    }
}

/// A row-change notification as the hosted backend pushes it.
fn insert_row(id: &str, name: &str, amount: f64, offset_secs: i64) -> JsonValue {
    let created = base_time() + chrono::Duration::seconds(offset_secs);
    json!({
        "eventType": "INSERT",
        "table": "contributions",
        "commit_timestamp": created.to_rfc3339(),
        "new": {
            "id": id,
            "display_name": name,
            "amount": amount,
            "created_at": created.to_rfc3339(),
            "is_approved": true
        },
        "old": {}
    })
}

fn ids(handle: &FeedHandle) -> Vec<String> {
    handle
        .snapshot()
        .items
        .iter()
        .map(|e| e.id.to_string())
        .collect()
}

async fn mount_loaded(
    service: Arc<MemoryEntityService>,
    bus: &LocalBroadcast,
    kind: EntityKind,
) -> FeedHandle {
    let mut handle = FeedView::mount(
        FeedConfig::for_kind(kind),
        FeedScope::new(SCOPE, kind),
        service,
        bus,
    )
    .unwrap();
    handle
        .wait_for(|s| s.load_state == LoadState::Loaded)
        .await
        .unwrap();
    handle
}

/// Let the view drain its channels and fire any pending debounce.
async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_seed_order_newest_first() {
    let service = Arc::new(MemoryEntityService::new().with_entities(
        SCOPE,
        vec![
            contribution("t3", "Ada", 5.0, -3),
            contribution("t1", "Lin", 6.0, -1),
            contribution("t2", "Sam", 7.0, -2),
        ],
    ));
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service, &bus, EntityKind::Contribution).await;

    assert_eq!(ids(&handle), ["t1", "t2", "t3"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_replayed_notification_admitted_once() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    let row = insert_row("c-1", "Ada", 10.0, 0);
    for _ in 0..5 {
        service.push_raw(SCOPE, row.clone());
    }
    settle().await;
    assert_eq!(ids(&handle), ["c-1"]);

    // Spaced past the gate cooldown: the gate forwards, dedup rejects.
    for _ in 0..3 {
        sleep(Duration::from_secs(3)).await;
        service.push_raw(SCOPE, row.clone());
        settle().await;
    }
    assert_eq!(ids(&handle), ["c-1"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_content_similarity_window() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    service.push_raw(SCOPE, insert_row("c-1", "Ada", 10.0, 0));
    settle().await;
    service.push_raw(SCOPE, insert_row("c-2", "ada", 10.0, 4));
    settle().await;
    assert_eq!(ids(&handle), ["c-1"]);

    service.push_raw(SCOPE, insert_row("c-3", "Ada", 10.0, 15));
    settle().await;
    assert_eq!(ids(&handle), ["c-3", "c-1"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_older_entity_is_prepended() {
    let service = Arc::new(MemoryEntityService::new().with_entities(
        SCOPE,
        vec![contribution("t1", "Ada", 5.0, -60), contribution("t2", "Lin", 6.0, -120)],
    ));
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    service.push_raw(SCOPE, insert_row("old", "Sam", 1.0, -600));
    settle().await;
    assert_eq!(ids(&handle), ["old", "t1", "t2"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_burst_across_channels_collapses() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    let row = insert_row("c-1", "Ada", 10.0, 0);
    service.push_raw(SCOPE, row.clone());
    bus.publish(row.clone());
    sleep(Duration::from_millis(20)).await;
    service.push_raw(SCOPE, row);
    settle().await;

    assert_eq!(ids(&handle), ["c-1"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_force_reload_resets_dedup() {
    let service = Arc::new(
        MemoryEntityService::new().with_entities(SCOPE, vec![contribution("seed", "Ada", 5.0, -60)]),
    );
    let bus = LocalBroadcast::default();
    let mut handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    // Pushed but never stored server-side, so a reload drops it.
    let row = insert_row("pushed", "Lin", 8.0, 0);
    service.push_raw(SCOPE, row.clone());
    settle().await;
    assert_eq!(ids(&handle), ["pushed", "seed"]);

    bus.publish_notice(&LocalNotice::force_reload());
    handle
        .wait_for(|s| s.load_state == LoadState::Loaded && s.items.len() == 1)
        .await
        .unwrap();
    assert_eq!(ids(&handle), ["seed"]);
    assert_eq!(service.fetch_count(), 2);

    // The same notification is admitted again once the gate cooldown passes.
    sleep(Duration::from_secs(3)).await;
    service.push_raw(SCOPE, row);
    settle().await;
    assert_eq!(ids(&handle), ["pushed", "seed"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reload_via_handle() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let mut handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    handle.reload().await.unwrap();
    let snapshot = handle
        .wait_for(|s| s.load_state == LoadState::Loaded && service.fetch_count() == 2)
        .await
        .unwrap();
    assert!(snapshot.items.is_empty());
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_notifications_are_dropped() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    for raw in [
        json!(null),
        json!("INSERT"),
        json!([1, 2, 3]),
        json!({}),
        json!({"eventType": "TRUNCATE", "new": {"id": "x"}}),
        json!({"eventType": "INSERT"}),
        json!({"eventType": "UPDATE", "new": {"display_name": "no id"}}),
        json!({"eventType": "INSERT", "table": "support_messages", "new": {"id": "m", "text": "hi"}}),
        json!({"eventType": "DELETE", "old": {}}),
    ] {
        service.push_raw(SCOPE, raw.clone());
        bus.publish(raw);
    }
    settle().await;
    assert!(handle.snapshot().items.is_empty());
    assert!(!handle.is_finished());

    service.push_raw(SCOPE, insert_row("ok", "Ada", 1.0, 0));
    settle().await;
    assert_eq!(ids(&handle), ["ok"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_events_during_load_are_replayed() {
    let service = Arc::new(
        MemoryEntityService::new()
            .with_fetch_latency(500)
            .with_entities(SCOPE, vec![contribution("seed", "Ada", 5.0, -60)]),
    );
    let bus = LocalBroadcast::default();
    let mut handle = FeedView::mount(
        FeedConfig::default(),
        FeedScope::new(SCOPE, EntityKind::Contribution),
        service.clone(),
        &bus,
    )
    .unwrap();
    handle
        .wait_for(|s| s.load_state == LoadState::Loading)
        .await
        .unwrap();

    service.push_raw(SCOPE, insert_row("early", "Lin", 9.0, 0));
    settle().await;
    assert_eq!(handle.snapshot().load_state, LoadState::Loading);
    assert!(handle.snapshot().items.is_empty());

    let loaded = handle
        .wait_for(|s| s.load_state == LoadState::Loaded)
        .await
        .unwrap();
    let loaded_ids: Vec<_> = loaded.items.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(loaded_ids, ["early", "seed"]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_surfaces_error_and_retries() {
    let service = Arc::new(
        MemoryEntityService::new()
            .with_fetch_failures(1)
            .with_entities(SCOPE, vec![contribution("seed", "Ada", 5.0, 0)]),
    );
    let bus = LocalBroadcast::default();
    let mut handle = FeedView::mount(
        FeedConfig::default(),
        FeedScope::new(SCOPE, EntityKind::Contribution),
        service.clone(),
        &bus,
    )
    .unwrap();

    let failed = handle
        .wait_for(|s| s.last_error.is_some())
        .await
        .unwrap();
    assert_eq!(failed.load_state, LoadState::NotStarted);
    assert!(failed.items.is_empty());

    handle.retry().await.unwrap();
    let loaded = handle
        .wait_for(|s| s.load_state == LoadState::Loaded)
        .await
        .unwrap();
    assert_eq!(loaded.items.len(), 1);
    assert_eq!(loaded.last_error, None);
    assert_eq!(service.fetch_count(), 2);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unmount_detaches_and_drops_pending_event() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;
    assert_eq!(service.push_subscriber_count(SCOPE), 1);
    assert_eq!(bus.subscriber_count(), 1);

    let snapshots = handle.subscribe();
    service.push_raw(SCOPE, insert_row("late", "Ada", 1.0, 0));
    handle.unmount().await.unwrap();

    assert!(snapshots.borrow().items.is_empty());
    assert_eq!(service.unsubscribe_count(), 1);
    assert_eq!(service.push_subscriber_count(SCOPE), 0);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_view() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;

    drop(handle);
    settle().await;
    assert_eq!(service.unsubscribe_count(), 1);
    assert_eq!(bus.subscriber_count(), 0);
}

/// Delegates to the in-memory service but cannot release subscriptions.
struct StickySubscription(MemoryEntityService);

#[async_trait]
impl EntityService for StickySubscription {
    async fn fetch_initial_entities(&self, scope: &FeedScope, limit: usize) -> Result<FetchPage> {
        self.0.fetch_initial_entities(scope, limit).await
    }

    async fn subscribe(&self, scope: &FeedScope) -> Result<NotificationStream> {
        self.0.subscribe(scope).await
    }

    async fn unsubscribe(&self, _scope: &FeedScope) -> Result<()> {
        Err(Error::Subscribe("channel already closed".to_string()))
    }

    async fn submit_entity(&self, submission: Submission) -> Result<Entity> {
        self.0.submit_entity(submission).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_failure_is_swallowed() {
    let service = Arc::new(StickySubscription(MemoryEntityService::new()));
    let bus = LocalBroadcast::default();
    let mut handle = FeedView::mount(
        FeedConfig::default(),
        FeedScope::new(SCOPE, EntityKind::Contribution),
        service,
        &bus,
    )
    .unwrap();
    handle
        .wait_for(|s| s.load_state == LoadState::Loaded)
        .await
        .unwrap();

    assert!(handle.unmount().await.is_ok());
}

fn contribution_submission(name: &str, amount: f64) -> Submission {
    Submission {
        scope_id: SCOPE.to_string(),
        display_name: name.to_string(),
        emoji: "🎉".to_string(),
        body: EntityBody::Contribution { amount },
        message: None,
        is_from_known_contributor: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_insert_then_push_echo_shows_one_entry() {
    let service = Arc::new(MemoryEntityService::new().with_submit_latency(200));
    let bus = LocalBroadcast::default();
    let mut handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;
    let submitter = OptimisticSubmitter::new(service.clone(), bus.clone());

    let confirmed = submitter
        .submit(contribution_submission("Lin", 20.0))
        .await
        .unwrap();
    // The optimistic entry was visible before the server answered.
    assert_eq!(handle.snapshot().items.len(), 1);
    assert!(handle.snapshot().items[0].id.is_local());

    let snapshot = handle
        .wait_for(|s| s.items.first().map(|e| &e.id) == Some(&confirmed.id))
        .await
        .unwrap();
    assert_eq!(snapshot.items.len(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(ids(&handle), [confirmed.id.to_string()]);
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_local_and_push_echo_show_one_entry() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;
    let submitter = OptimisticSubmitter::new(service.clone(), bus.clone());

    submitter
        .submit(contribution_submission("Lin", 20.0))
        .await
        .unwrap();
    settle().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].display_name, "Lin");
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_submit_leaves_no_entry() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let handle = mount_loaded(service.clone(), &bus, EntityKind::Contribution).await;
    let submitter = OptimisticSubmitter::new(service.clone(), bus.clone());

    let result = submitter.submit(contribution_submission("   ", 20.0)).await;
    assert!(matches!(result, Err(Error::Submit(_))));
    settle().await;
    sleep(Duration::from_secs(1)).await;

    assert!(handle.snapshot().items.is_empty());
    handle.unmount().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_support_wall_shows_messages_once_approved() {
    let service = Arc::new(MemoryEntityService::new());
    let bus = LocalBroadcast::default();
    let mut handle = mount_loaded(service.clone(), &bus, EntityKind::SupportMessage).await;

    let held = service
        .submit_entity(Submission {
            scope_id: SCOPE.to_string(),
            display_name: "Sam".to_string(),
            emoji: "🙌".to_string(),
            body: EntityBody::SupportMessage {
                text: "you got this".to_string(),
            },
            message: None,
            is_from_known_contributor: true,
        })
        .await
        .unwrap();
    settle().await;
    assert!(handle.snapshot().items.is_empty());

    service.approve(SCOPE, &held.id).unwrap();
    let snapshot = handle.wait_for(|s| s.items.len() == 1).await.unwrap();
    assert_eq!(snapshot.items[0].id, held.id);
    assert_eq!(snapshot.items[0].text(), Some("you got this"));
    handle.unmount().await.unwrap();
}
