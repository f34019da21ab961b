//! Same-process notification bus and the notice shape sibling components publish.
//!
//! Sibling UI components (the contribution form, the message composer)
//! announce optimistic inserts here before the server round-trip completes.
//! Notices are published as raw JSON in the same shape the push channel
//! delivers, so a feed view runs both through one normalizer and one gate.
//!
//! ## Wire Format
//!
//! ```text
//! {"action":"ENTITY_ADDED","timestamp":"2026-03-01T12:00:00Z","entity_type":"contribution","entity":{...}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::models::{Entity, EntityId, EntityKind, EventKind};

// ============================================================================
// Local Notice
// ============================================================================

/// A notification raised by a sibling component.
#[derive(Debug, Clone, Serialize)]
pub struct LocalNotice {
    pub action: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<JsonValue>,
}

impl LocalNotice {
    /// Announce an optimistic insert.
    pub fn added(entity: &Entity) -> Self {
        Self::with_entity(EventKind::EntityAdded, entity)
    }

    /// Announce an in-place change (e.g. a moderation decision).
    pub fn updated(entity: &Entity) -> Self {
        Self::with_entity(EventKind::EntityUpdated, entity)
    }

    /// Retract an entity, typically an optimistic insert whose submit failed.
    pub fn removed(id: &EntityId, kind: EntityKind) -> Self {
        Self {
            action: EventKind::EntityRemoved,
            timestamp: Utc::now(),
            entity_type: Some(kind),
            entity: Some(serde_json::json!({ "id": id.as_str() })),
        }
    }

    /// Ask every listening view to drop its state and reload.
    pub fn force_reload() -> Self {
        Self {
            action: EventKind::ForceReload,
            timestamp: Utc::now(),
            entity_type: None,
            entity: None,
        }
    }

    fn with_entity(action: EventKind, entity: &Entity) -> Self {
        Self {
            action,
            timestamp: Utc::now(),
            entity_type: Some(entity.kind()),
            entity: serde_json::to_value(entity).ok(),
        }
    }

    /// Raw JSON as it travels on the bus.
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

// ============================================================================
// Local Broadcast
// ============================================================================

/// Broadcast-based bus for same-process notifications.
///
/// Uses `tokio::sync::broadcast`. Every mounted feed view holds its own
/// receiver. Slow receivers that fall behind get a `Lagged` error and miss
/// notices; the feed view logs it and relies on the push channel and
/// force reloads to converge.
#[derive(Clone)]
pub struct LocalBroadcast {
    tx: broadcast::Sender<JsonValue>,
}

impl LocalBroadcast {
    /// Create a new bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a raw notification. Returns how many views received it.
    ///
    /// With no subscribers the notification is silently dropped.
    pub fn publish(&self, raw: JsonValue) -> usize {
        let subscriber_count = self.tx.receiver_count();
        tracing::trace!(
            subsystem = "feed",
            component = "local_bus",
            subscriber_count,
            "LocalBroadcast publish"
        );
        self.tx.send(raw).unwrap_or(0)
    }

    /// Publish a typed notice.
    pub fn publish_notice(&self, notice: &LocalNotice) -> usize {
        tracing::debug!(
            subsystem = "feed",
            component = "local_bus",
            event_kind = %notice.action,
            "LocalBroadcast notice"
        );
        self.publish(notice.to_value())
    }

    /// Subscribe to receive raw notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<JsonValue> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new(crate::defaults::LOCAL_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityBody;

    fn entity() -> Entity {
        Entity {
            id: EntityId::parse("local-abc"),
            display_name: "Grace".to_string(),
            emoji: "🌱".to_string(),
            body: EntityBody::SupportMessage {
                text: "rooting for you".to_string(),
            },
            created_at: Utc::now(),
            message: None,
            is_from_known_contributor: false,
            is_approved: true,
        }
    }

    #[tokio::test]
    async fn test_local_broadcast_publish_subscribe() {
        let bus = LocalBroadcast::new(32);
        let mut rx = bus.subscribe();

        let delivered = bus.publish_notice(&LocalNotice::added(&entity()));
        assert_eq!(delivered, 1);

        let raw = rx.recv().await.unwrap();
        assert_eq!(raw["action"], "ENTITY_ADDED");
        assert_eq!(raw["entity_type"], "support_message");
        assert_eq!(raw["entity"]["id"], "local-abc");
        assert_eq!(raw["entity"]["text"], "rooting for you");
        assert!(raw["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_local_broadcast_multiple_subscribers() {
        let bus = LocalBroadcast::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish_notice(&LocalNotice::force_reload());

        assert_eq!(rx1.recv().await.unwrap()["action"], "FORCE_RELOAD");
        assert_eq!(rx2.recv().await.unwrap()["action"], "FORCE_RELOAD");
    }

    #[test]
    fn test_local_broadcast_no_subscribers_ok() {
        let bus = LocalBroadcast::new(32);
        assert_eq!(bus.publish(serde_json::json!({"action": "FORCE_RELOAD"})), 0);
    }

    #[test]
    fn test_local_broadcast_subscriber_count() {
        let bus = LocalBroadcast::default();
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_removed_notice_carries_only_id() {
        let notice = LocalNotice::removed(&EntityId::parse("local-xyz"), EntityKind::Contribution);
        let raw = notice.to_value();
        assert_eq!(raw["action"], "ENTITY_REMOVED");
        assert_eq!(raw["entity"], serde_json::json!({"id": "local-xyz"}));
        assert_eq!(raw["entity_type"], "contribution");
    }

    #[test]
    fn test_force_reload_notice_has_no_entity() {
        let raw = LocalNotice::force_reload().to_value();
        assert!(raw.get("entity").is_none());
        assert!(raw.get("entity_type").is_none());
    }
}
