//! Mounted feed views.
//!
//! A view is one tokio task that owns every piece of feed state: the
//! [`Feed`], the normalizer and the gate. It listens on the push
//! subscription and the local broadcast, runs the bulk load, and fires the
//! gate's debounce deadline, all from a single `select!` loop, so no state
//! is ever shared or locked.
//!
//! The task publishes a [`FeedSnapshot`] on a watch channel whenever the
//! list or the load state changes. It stops when the [`FeedHandle`] is
//! unmounted or dropped; on the way out it drops the pending gate event and
//! any in-flight fetch, detaches both channels and releases the push
//! subscription.

use std::future::pending;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use pledge_core::defaults::VIEW_COMMAND_CAPACITY;
use pledge_core::{
    CanonicalEvent, Change, Channel, Entity, EntityService, Error, FeedScope, FetchPage,
    LoadState, LocalBroadcast, NotificationStream, Result,
};

use crate::config::FeedConfig;
use crate::feed::{Applied, Feed};
use crate::gate::{DebounceGate, GateDecision};
use crate::normalizer::Normalizer;

type FetchFuture = BoxFuture<'static, Result<FetchPage>>;

/// What a view currently shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub scope: FeedScope,
    pub load_state: LoadState,
    pub items: Vec<Entity>,
    /// Message of the last failed load, shown with a retry affordance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl FeedSnapshot {
    fn of(feed: &Feed) -> Self {
        Self {
            scope: feed.scope().clone(),
            load_state: feed.load_state(),
            items: feed.list().to_vec(),
            last_error: feed.last_error().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Retry,
    Reload,
}

/// Handle to a mounted view.
pub struct FeedHandle {
    command_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<FeedSnapshot>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Retry a failed bulk load. No-op while loading or loaded.
    pub async fn retry(&self) -> Result<()> {
        self.send(Command::Retry).await
    }

    /// Drop dedup state and re-run the bulk load.
    pub async fn reload(&self) -> Result<()> {
        self.send(Command::Reload).await
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<FeedSnapshot> {
        self.snapshot_rx
            .changed()
            .await
            .map_err(|_| Error::ChannelClosed("feed view stopped".to_string()))?;
        Ok(self.snapshot_rx.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate` (checks the current one first).
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&FeedSnapshot) -> bool,
    ) -> Result<FeedSnapshot> {
        self.snapshot_rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| Error::ChannelClosed("feed view stopped".to_string()))
    }

    /// Another receiver for the snapshot stream.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Whether the view task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the view and wait for it to release its subscriptions.
    pub async fn unmount(self) -> Result<()> {
        let FeedHandle {
            command_tx, task, ..
        } = self;
        drop(command_tx);
        task.await
            .map_err(|e| Error::Internal(format!("feed view task failed: {e}")))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed("feed view stopped".to_string()))
    }
}

/// Mounts feed views.
pub struct FeedView;

impl FeedView {
    /// Mount a view for `scope` and start its bulk load.
    ///
    /// The local broadcast is subscribed before this returns, so notices
    /// published right after mounting are not missed. Must be called from
    /// within a tokio runtime.
    pub fn mount(
        config: FeedConfig,
        scope: FeedScope,
        service: Arc<dyn EntityService>,
        local_bus: &LocalBroadcast,
    ) -> Result<FeedHandle> {
        config.validate()?;

        let normalizer = Normalizer::new(scope.kind);
        let gate = DebounceGate::new(&config);
        let feed = Feed::new(scope, config);
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::of(&feed));
        let (command_tx, command_rx) = mpsc::channel(VIEW_COMMAND_CAPACITY);
        let local_rx = local_bus.subscribe();
        let span = info_span!(
            "feed_view",
            scope_id = %feed.scope().scope_id,
            entity_kind = %feed.scope().kind
        );

        let view = ViewTask {
            feed,
            normalizer,
            gate,
            service,
            snapshot_tx,
        };
        let task = tokio::spawn(view.run(command_rx, local_rx).instrument(span));

        Ok(FeedHandle {
            command_tx,
            snapshot_rx,
            task,
        })
    }
}

struct ViewTask {
    feed: Feed,
    normalizer: Normalizer,
    gate: DebounceGate,
    service: Arc<dyn EntityService>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
}

impl ViewTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        local_rx: broadcast::Receiver<JsonValue>,
    ) {
        let scope = self.feed.scope().clone();
        info!(
            subsystem = "feed",
            component = "view",
            op = "mount",
            "Feed view mounted"
        );

        let mut push = match self.service.subscribe(&scope).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(
                    subsystem = "feed",
                    component = "view",
                    op = "subscribe",
                    error = %e,
                    "Push subscription unavailable, continuing with local notices only"
                );
                None
            }
        };
        let mut local = Some(local_rx);
        let mut fetch = self.start_load();

        loop {
            let deadline = self.gate.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Retry) => {
                        if fetch.is_none() {
                            fetch = self.start_load();
                        }
                    }
                    Some(Command::Reload) => {
                        let reload = CanonicalEvent {
                            change: Change::ForceReload,
                            source_timestamp: chrono::Utc::now(),
                            channel: Channel::Local,
                            id_synthesized: true,
                        };
                        if self.apply(reload) == Applied::ReloadRequested && fetch.is_none() {
                            fetch = self.start_load();
                        }
                    }
                    None => break,
                },
                result = next_fetch(&mut fetch) => {
                    fetch = None;
                    self.finish_load(result);
                }
                raw = next_push(&mut push) => match raw {
                    Some(raw) => self.on_raw(&raw, Channel::Push),
                    None => {
                        warn!(
                            subsystem = "feed",
                            component = "view",
                            op = "receive",
                            channel = "push",
                            "Push subscription ended"
                        );
                        push = None;
                    }
                },
                received = next_local(&mut local) => match received {
                    Ok(raw) => self.on_raw(&raw, Channel::Local),
                    Err(RecvError::Lagged(skipped)) => warn!(
                        subsystem = "feed",
                        component = "view",
                        op = "receive",
                        channel = "local",
                        skipped,
                        "Local broadcast lagged, notices dropped"
                    ),
                    Err(RecvError::Closed) => local = None,
                },
                _ = sleep_until_deadline(deadline) => {
                    if let Some(event) = self.gate.fire(Instant::now()) {
                        if self.apply(event) == Applied::ReloadRequested && fetch.is_none() {
                            fetch = self.start_load();
                        }
                    }
                }
            }
        }

        if self.gate.cancel() {
            debug!(
                subsystem = "feed",
                component = "gate",
                op = "unmount",
                "Dropped pending event"
            );
        }
        drop(fetch);
        drop(push);
        drop(local);
        if let Err(e) = self.service.unsubscribe(&scope).await {
            warn!(
                subsystem = "feed",
                component = "view",
                op = "unsubscribe",
                error = %e,
                "Push unsubscribe failed"
            );
        }
        info!(
            subsystem = "feed",
            component = "view",
            op = "unmount",
            item_count = self.feed.list().len(),
            "Feed view unmounted"
        );
    }

    fn on_raw(&mut self, raw: &JsonValue, channel: Channel) {
        let event = match self.normalizer.normalize(raw, channel) {
            Ok(event) => event,
            Err(e) => {
                debug!(
                    subsystem = "feed",
                    component = "normalizer",
                    op = "normalize",
                    channel = %channel,
                    reason = e.reason(),
                    error = %e,
                    "Dropped notification"
                );
                return;
            }
        };
        let event_kind = event.kind();
        if let GateDecision::Armed { .. } = self.gate.on_event(event, Instant::now()) {
            trace!(
                subsystem = "feed",
                component = "gate",
                op = "arm",
                channel = %channel,
                event_kind = %event_kind,
                "Gate armed"
            );
        }
    }

    fn apply(&mut self, event: CanonicalEvent) -> Applied {
        let outcome = self.feed.apply(event, Instant::now());
        if outcome.changed_list() {
            self.publish();
        }
        outcome
    }

    fn start_load(&mut self) -> Option<FetchFuture> {
        match self.feed.begin_load() {
            Ok(true) => {
                self.publish();
                let service = Arc::clone(&self.service);
                let scope = self.feed.scope().clone();
                let limit = self.feed.config().bulk_limit;
                Some(async move { service.fetch_initial_entities(&scope, limit).await }.boxed())
            }
            Ok(false) => None,
            Err(e) => {
                error!(
                    subsystem = "feed",
                    component = "view",
                    op = "load_initial",
                    error = %e,
                    "Cannot start bulk load"
                );
                None
            }
        }
    }

    fn finish_load(&mut self, result: Result<FetchPage>) {
        let outcome = match result {
            Ok(page) => self
                .feed
                .complete_load(page, Instant::now())
                .map(|_replayed| ()),
            Err(e) => self.feed.fail_load(&e),
        };
        if let Err(e) = outcome {
            error!(
                subsystem = "feed",
                component = "view",
                op = "load_initial",
                error = %e,
                "Load result rejected"
            );
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(FeedSnapshot::of(&self.feed));
    }
}

async fn next_fetch(fetch: &mut Option<FetchFuture>) -> Result<FetchPage> {
    match fetch.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_push(push: &mut Option<NotificationStream>) -> Option<JsonValue> {
    match push.as_mut() {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn next_local(
    local: &mut Option<broadcast::Receiver<JsonValue>>,
) -> std::result::Result<JsonValue, RecvError> {
    match local.as_mut() {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pledge_core::{EntityKind, MemoryEntityService};

    #[tokio::test(start_paused = true)]
    async fn test_mount_loads_and_publishes() {
        let service = Arc::new(MemoryEntityService::new());
        let bus = LocalBroadcast::default();
        let mut handle = FeedView::mount(
            FeedConfig::default(),
            FeedScope::new("proj", EntityKind::Contribution),
            service.clone(),
            &bus,
        )
        .unwrap();

        let loaded = handle
            .wait_for(|s| s.load_state == LoadState::Loaded)
            .await
            .unwrap();
        assert!(loaded.items.is_empty());
        assert_eq!(service.fetch_count(), 1);
        assert_eq!(bus.subscriber_count(), 1);

        handle.unmount().await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(service.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_mount_rejects_invalid_config() {
        let service = Arc::new(MemoryEntityService::new());
        let result = FeedView::mount(
            FeedConfig::default().with_bulk_limit(0),
            FeedScope::new("proj", EntityKind::Contribution),
            service,
            &LocalBroadcast::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));

        let mut config = FeedConfig::default();
        config.similarity_window_secs = i64::MAX;
        let result = FeedView::mount(
            config,
            FeedScope::new("proj", EntityKind::Contribution),
            Arc::new(MemoryEntityService::new()),
            &LocalBroadcast::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_channel_closes_on_unmount() {
        let service = Arc::new(MemoryEntityService::new());
        let bus = LocalBroadcast::default();
        let handle = FeedView::mount(
            FeedConfig::default(),
            FeedScope::new("proj", EntityKind::Contribution),
            service,
            &bus,
        )
        .unwrap();
        let mut snapshots = handle.subscribe();
        handle.unmount().await.unwrap();
        snapshots.borrow_and_update();
        assert!(snapshots.changed().await.is_err());
    }
}
