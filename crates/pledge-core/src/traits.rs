//! Collaborator traits for pledgewall feeds.
//!
//! The remote data service is opaque: feeds reach it only through bulk
//! fetch, a push subscription, and the insert call a sibling component uses.
//! Implementations wrap whatever backend the page talks to; the in-memory
//! [`crate::mock::MemoryEntityService`] backs tests and the replay tool.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::{Entity, FeedScope, FetchPage, Submission};

/// Long-lived stream of raw change notifications.
///
/// Payload shape varies by transport and version; feeds normalize it.
/// Dropping the stream detaches the listener.
pub type NotificationStream = BoxStream<'static, JsonValue>;

/// Remote data service backing a feed.
#[async_trait]
pub trait EntityService: Send + Sync {
    /// Fetch up to `limit` approved/completed entities for a scope.
    ///
    /// Order is unspecified; feeds re-sort.
    async fn fetch_initial_entities(&self, scope: &FeedScope, limit: usize) -> Result<FetchPage>;

    /// Open the push subscription for a scope.
    async fn subscribe(&self, scope: &FeedScope) -> Result<NotificationStream>;

    /// Release server-side subscription resources. Best effort.
    async fn unsubscribe(&self, _scope: &FeedScope) -> Result<()> {
        Ok(())
    }

    /// Insert a new entity. Success is also announced on the push channel.
    async fn submit_entity(&self, submission: Submission) -> Result<Entity>;
}
