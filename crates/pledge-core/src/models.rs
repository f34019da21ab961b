//! Entity and canonical event models shared by every feed.
//!
//! Entities are what the visible lists render: contributions on the
//! contributor list and messages on the support wall. Canonical events are
//! the normalized form of every change notification, whichever channel it
//! arrived on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::defaults::{LEGACY_TEMP_ID_PREFIX, LOCAL_ID_PREFIX};

// =============================================================================
// ENTITY KIND
// =============================================================================

/// Which list an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contribution,
    SupportMessage,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contribution => "contribution",
            EntityKind::SupportMessage => "support_message",
        }
    }

    /// Resolve a table or entity-type label as sent by the push channel.
    ///
    /// Accepts singular/plural and snake/kebab spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "contribution" | "contributions" | "donation" | "donations" => {
                Some(EntityKind::Contribution)
            }
            "support_message" | "support_messages" | "message" | "messages" => {
                Some(EntityKind::SupportMessage)
            }
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ENTITY ID
// =============================================================================

/// Entity identifier.
///
/// Server ids are authoritative and unique within a list. Local ids are
/// minted on the client (optimistic inserts, notifications that arrived
/// without an id) and carry no uniqueness guarantee across channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    Server(String),
    Local(String),
}

impl EntityId {
    /// Classify a raw id string by its prefix.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with(LOCAL_ID_PREFIX) || raw.starts_with(LEGACY_TEMP_ID_PREFIX) {
            EntityId::Local(raw)
        } else {
            EntityId::Server(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Server(s) | EntityId::Local(s) => s,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EntityId::Local(_))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EntityId::parse(raw))
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// Kind-specific payload of an entity: an amount for contributions, the
/// message text for the support wall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityBody {
    Contribution { amount: f64 },
    SupportMessage { text: String },
}

impl EntityBody {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBody::Contribution { .. } => EntityKind::Contribution,
            EntityBody::SupportMessage { .. } => EntityKind::SupportMessage,
        }
    }
}

/// One row of a visible list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub display_name: String,
    pub emoji: String,
    #[serde(flatten)]
    pub body: EntityBody,
    /// Business timestamp (when the contribution or message was created).
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub is_from_known_contributor: bool,
    #[serde(default)]
    pub is_approved: bool,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    /// The amount for contributions, `None` for messages.
    pub fn amount(&self) -> Option<f64> {
        match &self.body {
            EntityBody::Contribution { amount } => Some(*amount),
            EntityBody::SupportMessage { .. } => None,
        }
    }

    /// The wall text for messages, `None` for contributions.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            EntityBody::Contribution { .. } => None,
            EntityBody::SupportMessage { text } => Some(text),
        }
    }
}

// =============================================================================
// CANONICAL EVENTS
// =============================================================================

/// Canonical event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    EntityAdded,
    EntityUpdated,
    EntityRemoved,
    ForceReload,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EntityAdded => "ENTITY_ADDED",
            EventKind::EntityUpdated => "ENTITY_UPDATED",
            EventKind::EntityRemoved => "ENTITY_REMOVED",
            EventKind::ForceReload => "FORCE_RELOAD",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a raw notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Server push subscription.
    Push,
    /// Same-process broadcast from a sibling component.
    Local,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Local => "local",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state change a canonical event describes.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    EntityAdded(Entity),
    EntityUpdated(Entity),
    EntityRemoved(EntityId),
    ForceReload,
}

/// Normalized representation of one state change.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub change: Change,
    /// When the triggering notification was raised.
    pub source_timestamp: DateTime<Utc>,
    pub channel: Channel,
    /// The normalizer minted the entity id because the notification had none.
    pub id_synthesized: bool,
}

impl CanonicalEvent {
    pub fn kind(&self) -> EventKind {
        match self.change {
            Change::EntityAdded(_) => EventKind::EntityAdded,
            Change::EntityUpdated(_) => EventKind::EntityUpdated,
            Change::EntityRemoved(_) => EventKind::EntityRemoved,
            Change::ForceReload => EventKind::ForceReload,
        }
    }

    pub fn entity(&self) -> Option<&Entity> {
        match &self.change {
            Change::EntityAdded(entity) | Change::EntityUpdated(entity) => Some(entity),
            Change::EntityRemoved(_) | Change::ForceReload => None,
        }
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        match &self.change {
            Change::EntityAdded(entity) | Change::EntityUpdated(entity) => Some(&entity.id),
            Change::EntityRemoved(id) => Some(id),
            Change::ForceReload => None,
        }
    }
}

// =============================================================================
// FEED SCOPE & SERVICE TYPES
// =============================================================================

/// Identifies one list: a project plus the entity kind it renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedScope {
    pub scope_id: String,
    pub kind: EntityKind,
}

impl FeedScope {
    pub fn new(scope_id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            scope_id: scope_id.into(),
            kind,
        }
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope_id, self.kind)
    }
}

/// Result of a bulk fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchPage {
    pub items: Vec<Entity>,
}

/// Fields a sibling component submits for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub scope_id: String,
    pub display_name: String,
    pub emoji: String,
    #[serde(flatten)]
    pub body: EntityBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub is_from_known_contributor: bool,
}

impl Submission {
    /// Materialize the entity this submission describes under the given id.
    pub fn into_entity(self, id: EntityId, created_at: DateTime<Utc>, is_approved: bool) -> Entity {
        Entity {
            id,
            display_name: self.display_name,
            emoji: self.emoji,
            body: self.body,
            created_at,
            message: self.message,
            is_from_known_contributor: self.is_from_known_contributor,
            is_approved,
        }
    }
}

// =============================================================================
// LOAD STATE
// =============================================================================

/// Bulk-load progress of a list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadState {
    #[default]
    NotStarted,
    Loading,
    Loaded,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::NotStarted => "NOT_STARTED",
            LoadState::Loading => "LOADING",
            LoadState::Loaded => "LOADED",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
