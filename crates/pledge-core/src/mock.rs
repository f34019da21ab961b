//! In-memory entity service for deterministic testing and log replay.
//!
//! Stores entities per scope, serves bulk fetches from memory, and echoes
//! every successful submit on that scope's push channel the way the hosted
//! backend does, in the backend's row-change shape:
//!
//! ```text
//! {"eventType":"INSERT","table":"contributions","commit_timestamp":"...","new":{...}}
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use pledge_core::mock::MemoryEntityService;
//!
//! let service = MemoryEntityService::new()
//!     .with_fetch_latency(25)
//!     .with_fetch_failures(1);
//! assert_eq!(service.fetch_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::defaults::PUSH_CHANNEL_CAPACITY;
use crate::error::{Error, Result};
use crate::models::{Entity, EntityId, EntityKind, FeedScope, FetchPage, Submission};
use crate::traits::{EntityService, NotificationStream};

/// In-memory [`EntityService`].
#[derive(Clone)]
pub struct MemoryEntityService {
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    fetch_latency_ms: u64,
    submit_latency_ms: u64,
    auto_approve_messages: bool,
    push_echo: bool,
}

#[derive(Debug, Default)]
struct MockState {
    entities: HashMap<String, Vec<Entity>>,
    fetch_failures_remaining: usize,
    /// Push channel per scope id, opened on first subscribe.
    channels: HashMap<String, broadcast::Sender<JsonValue>>,
    calls: Vec<MockCall>,
}

/// One recorded call against the service.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub operation: String,
    pub scope: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            fetch_latency_ms: 0,
            submit_latency_ms: 0,
            auto_approve_messages: false,
            push_echo: true,
        }
    }
}

impl MemoryEntityService {
    /// Create an empty service with default behavior.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Delay every bulk fetch by `ms` milliseconds.
    pub fn with_fetch_latency(mut self, ms: u64) -> Self {
        Arc::make_mut(&mut self.config).fetch_latency_ms = ms;
        self
    }

    /// Delay every submit by `ms` milliseconds (the server round-trip).
    pub fn with_submit_latency(mut self, ms: u64) -> Self {
        Arc::make_mut(&mut self.config).submit_latency_ms = ms;
        self
    }

    /// Fail the next `count` bulk fetches.
    pub fn with_fetch_failures(self, count: usize) -> Self {
        self.lock().fetch_failures_remaining = count;
        self
    }

    /// Approve submitted support messages immediately instead of holding them
    /// for moderation.
    pub fn with_auto_approve_messages(mut self, enabled: bool) -> Self {
        Arc::make_mut(&mut self.config).auto_approve_messages = enabled;
        self
    }

    /// Whether submits are echoed on the push channel (default: true).
    pub fn with_push_echo(mut self, enabled: bool) -> Self {
        Arc::make_mut(&mut self.config).push_echo = enabled;
        self
    }

    /// Store entities for a scope as if they already existed server-side.
    pub fn with_entities(self, scope_id: impl Into<String>, entities: Vec<Entity>) -> Self {
        self.lock()
            .entities
            .entry(scope_id.into())
            .or_default()
            .extend(entities);
        self
    }

    /// Deliver an arbitrary raw notification on a scope's push channel.
    ///
    /// Returns the number of listeners reached; zero when nobody subscribed
    /// to that scope.
    pub fn push_raw(&self, scope_id: &str, raw: JsonValue) -> usize {
        match self.lock().channels.get(scope_id) {
            Some(tx) => tx.send(raw).unwrap_or(0),
            None => 0,
        }
    }

    /// Approve a held support message and announce the change.
    pub fn approve(&self, scope_id: &str, id: &EntityId) -> Option<Entity> {
        let approved = {
            let mut state = self.lock();
            let entity = state
                .entities
                .get_mut(scope_id)?
                .iter_mut()
                .find(|e| &e.id == id)?;
            entity.is_approved = true;
            entity.clone()
        };
        self.push_row_change(scope_id, "UPDATE", &approved);
        Some(approved)
    }

    /// Entities currently stored for a scope.
    pub fn entities(&self, scope_id: &str) -> Vec<Entity> {
        self.lock().entities.get(scope_id).cloned().unwrap_or_default()
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.count_calls("fetch_initial_entities")
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.count_calls("unsubscribe")
    }

    /// Number of live push listeners for a scope.
    pub fn push_subscriber_count(&self, scope_id: &str) -> usize {
        self.lock()
            .channels
            .get(scope_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn count_calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn record(&self, operation: &str, scope: &str) {
        self.lock().calls.push(MockCall {
            operation: operation.to_string(),
            scope: scope.to_string(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_row_change(&self, scope_id: &str, event_type: &str, entity: &Entity) {
        let table = match entity.kind() {
            EntityKind::Contribution => "contributions",
            EntityKind::SupportMessage => "support_messages",
        };
        let row = serde_json::to_value(entity).unwrap_or(JsonValue::Null);
        let delivered = self.push_raw(scope_id, json!({
            "eventType": event_type,
            "table": table,
            "commit_timestamp": Utc::now().to_rfc3339(),
            "new": row,
        }));
        tracing::trace!(
            subsystem = "service",
            component = "mock",
            scope_id,
            entity_id = %entity.id,
            delivered,
            "Push echo"
        );
    }
}

impl Default for MemoryEntityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityService for MemoryEntityService {
    async fn fetch_initial_entities(&self, scope: &FeedScope, limit: usize) -> Result<FetchPage> {
        self.record("fetch_initial_entities", &scope.scope_id);

        if self.config.fetch_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.fetch_latency_ms)).await;
        }

        let mut state = self.lock();
        if state.fetch_failures_remaining > 0 {
            state.fetch_failures_remaining -= 1;
            return Err(Error::Fetch(format!(
                "injected failure for scope {}",
                scope.scope_id
            )));
        }

        let items = state
            .entities
            .get(&scope.scope_id)
            .map(|entities| {
                entities
                    .iter()
                    .filter(|e| e.kind() == scope.kind && e.is_approved)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(FetchPage { items })
    }

    async fn subscribe(&self, scope: &FeedScope) -> Result<NotificationStream> {
        self.record("subscribe", &scope.scope_id);
        let rx = self
            .lock()
            .channels
            .entry(scope.scope_id.clone())
            .or_insert_with(|| broadcast::channel(PUSH_CHANNEL_CAPACITY).0)
            .subscribe();
        let stream = BroadcastStream::new(rx)
            .filter_map(|item| futures::future::ready(item.ok()));
        Ok(stream.boxed())
    }

    async fn unsubscribe(&self, scope: &FeedScope) -> Result<()> {
        self.record("unsubscribe", &scope.scope_id);
        Ok(())
    }

    async fn submit_entity(&self, submission: Submission) -> Result<Entity> {
        self.record("submit_entity", &submission.scope_id);
        if submission.display_name.trim().is_empty() {
            return Err(Error::Submit("display name is required".to_string()));
        }
        if self.config.submit_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.submit_latency_ms)).await;
        }

        let is_approved = match submission.body.kind() {
            EntityKind::Contribution => true,
            EntityKind::SupportMessage => self.config.auto_approve_messages,
        };
        let scope_id = submission.scope_id.clone();
        let entity = submission.into_entity(
            EntityId::Server(Uuid::new_v4().to_string()),
            Utc::now(),
            is_approved,
        );

        self.lock()
            .entities
            .entry(scope_id.clone())
            .or_default()
            .push(entity.clone());

        if self.config.push_echo {
            self.push_row_change(&scope_id, "INSERT", &entity);
        }
        Ok(entity)
    }
}
