//! Event normalizer: raw change notifications to canonical events.
//!
//! Push payloads and local notices have drifted across transports and
//! versions. Every field is read through an ordered alias group; the first
//! alias holding a usable value wins, so payloads that carry both an old and
//! a new name for a field still decode. Anything that cannot be decoded is a
//! [`DecodeError`], never a panic.
//!
//! Accepted envelope fields, in lookup order:
//!
//! | Field | Aliases |
//! |-------|---------|
//! | action | `action`, `type`, `eventType`, `event` |
//! | source timestamp | `timestamp`, `commit_timestamp`, `sourceTimestamp`, `sent_at` |
//! | entity | `entity`, `new`, `record`, `payload`, `detail` |
//! | previous row | `old`, `old_record` |
//! | entity kind | `table`, `entity_type`, `entityType` |
//!
//! The action group skips labels that are not actions, so a broadcast
//! envelope such as `{"type":"broadcast","event":"INSERT","payload":{..}}`
//! resolves to `INSERT`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use pledge_core::defaults::{ANONYMOUS_DISPLAY_NAME, DEFAULT_EMOJI};
use pledge_core::{
    local_entity_id, CanonicalEvent, Change, Channel, Entity, EntityBody, EntityId, EntityKind,
    EventKind,
};

type JsonObject = Map<String, JsonValue>;

/// Why a notification was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("notification is not a JSON object")]
    NotAnObject,

    #[error("notification has no action")]
    MissingAction,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{0} notification has no entity")]
    MissingEntity(EventKind),

    #[error("entity has no {0}")]
    MissingField(&'static str),

    #[error("notification is for {found}, feed renders {expected}")]
    WrongKind { expected: EntityKind, found: String },
}

impl DecodeError {
    /// Short label for the `reason` log field.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::NotAnObject => "not_an_object",
            DecodeError::MissingAction => "missing_action",
            DecodeError::UnknownAction(_) => "unknown_action",
            DecodeError::MissingEntity(_) => "missing_entity",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::WrongKind { .. } => "wrong_kind",
        }
    }
}

mod aliases {
    pub const ACTION: &[&str] = &["action", "type", "eventType", "event"];
    pub const SOURCE_TIMESTAMP: &[&str] =
        &["timestamp", "commit_timestamp", "sourceTimestamp", "sent_at"];
    pub const ENTITY: &[&str] = &["entity", "new", "record", "payload", "detail"];
    pub const PREVIOUS: &[&str] = &["old", "old_record"];
    pub const ENTITY_TYPE: &[&str] = &["table", "entity_type", "entityType"];

    pub const CONTRIBUTION_ID: &[&str] = &["id", "contribution_id"];
    pub const MESSAGE_ID: &[&str] = &["id", "message_id"];
    pub const CONTRIBUTOR_NAME: &[&str] = &["display_name", "displayName", "name", "donor_name"];
    pub const AUTHOR_NAME: &[&str] = &["display_name", "displayName", "name", "author_name"];
    pub const EMOJI: &[&str] = &["emoji", "avatar_emoji"];
    pub const AMOUNT: &[&str] = &["amount", "value"];
    pub const CREATED_AT: &[&str] =
        &["created_at", "createdAt", "timestamp_created", "timestampCreated"];
    pub const NOTE: &[&str] = &["message", "note"];
    /// `message` is the legacy wall-text field, read last.
    pub const TEXT: &[&str] = &["text", "content", "message"];
    pub const KNOWN_CONTRIBUTOR: &[&str] =
        &["is_from_known_contributor", "isFromKnownContributor", "is_known"];
    pub const APPROVED: &[&str] = &["is_approved", "isApproved", "approved"];
}

/// First alias in `group` whose value `parse` accepts.
fn pick<'a, T>(
    object: &'a JsonObject,
    group: &[&str],
    parse: impl Fn(&'a JsonValue) -> Option<T>,
) -> Option<T> {
    group
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(parse)
}

/// Decodes raw notifications for one entity kind.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    kind: EntityKind,
}

impl Normalizer {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Decode one raw notification.
    pub fn normalize(
        &self,
        raw: &JsonValue,
        channel: Channel,
    ) -> Result<CanonicalEvent, DecodeError> {
        let envelope = raw.as_object().ok_or(DecodeError::NotAnObject)?;

        let action = pick(envelope, aliases::ACTION, |v| {
            lenient_text(v).as_deref().and_then(parse_action)
        });
        let kind = match action {
            Some(kind) => kind,
            None => {
                return Err(match pick(envelope, aliases::ACTION, lenient_text) {
                    Some(label) => DecodeError::UnknownAction(label),
                    None => DecodeError::MissingAction,
                })
            }
        };

        let entity = pick(envelope, aliases::ENTITY, non_empty_object);
        if let Some(label) = pick(envelope, aliases::ENTITY_TYPE, lenient_text) {
            self.check_kind(&label)?;
        }
        if let Some(label) = entity.and_then(|e| e.get("kind")).and_then(lenient_text) {
            self.check_kind(&label)?;
        }

        let source_timestamp = pick(envelope, aliases::SOURCE_TIMESTAMP, lenient_timestamp)
            .unwrap_or_else(Utc::now);

        let (change, id_synthesized) = match kind {
            EventKind::ForceReload => (Change::ForceReload, true),
            EventKind::EntityAdded => {
                let row = entity.ok_or(DecodeError::MissingEntity(kind))?;
                let (entity, synthesized) = self.decode_entity(row)?;
                (Change::EntityAdded(entity), synthesized)
            }
            EventKind::EntityUpdated => {
                let row = entity.ok_or(DecodeError::MissingEntity(kind))?;
                let (entity, synthesized) = self.decode_entity(row)?;
                if synthesized {
                    return Err(DecodeError::MissingField("id"));
                }
                (Change::EntityUpdated(entity), false)
            }
            EventKind::EntityRemoved => {
                let previous = pick(envelope, aliases::PREVIOUS, non_empty_object);
                let id = [entity, previous]
                    .into_iter()
                    .flatten()
                    .find_map(|row| pick(row, self.id_aliases(), lenient_id))
                    .ok_or(DecodeError::MissingField("id"))?;
                (Change::EntityRemoved(id), false)
            }
        };

        Ok(CanonicalEvent {
            change,
            source_timestamp,
            channel,
            id_synthesized,
        })
    }

    fn check_kind(&self, label: &str) -> Result<(), DecodeError> {
        match EntityKind::from_label(label) {
            Some(kind) if kind == self.kind => Ok(()),
            _ => Err(DecodeError::WrongKind {
                expected: self.kind,
                found: label.to_string(),
            }),
        }
    }

    fn id_aliases(&self) -> &'static [&'static str] {
        match self.kind {
            EntityKind::Contribution => aliases::CONTRIBUTION_ID,
            EntityKind::SupportMessage => aliases::MESSAGE_ID,
        }
    }

    fn decode_entity(&self, row: &JsonObject) -> Result<(Entity, bool), DecodeError> {
        let (id, synthesized) = match pick(row, self.id_aliases(), lenient_id) {
            Some(id) => (id, false),
            None => (local_entity_id(), true),
        };
        let emoji = pick(row, aliases::EMOJI, lenient_text)
            .unwrap_or_else(|| DEFAULT_EMOJI.to_string());
        let created_at = pick(row, aliases::CREATED_AT, lenient_timestamp).unwrap_or_else(Utc::now);
        let is_from_known_contributor =
            pick(row, aliases::KNOWN_CONTRIBUTOR, lenient_bool).unwrap_or(false);

        let entity = match self.kind {
            EntityKind::Contribution => Entity {
                id,
                display_name: display_name(row, aliases::CONTRIBUTOR_NAME),
                emoji,
                body: EntityBody::Contribution {
                    amount: pick(row, aliases::AMOUNT, finite_number).unwrap_or(0.0),
                },
                created_at,
                message: pick(row, aliases::NOTE, lenient_text),
                is_from_known_contributor,
                is_approved: pick(row, aliases::APPROVED, lenient_bool).unwrap_or(true),
            },
            EntityKind::SupportMessage => Entity {
                id,
                display_name: display_name(row, aliases::AUTHOR_NAME),
                emoji,
                body: EntityBody::SupportMessage {
                    text: pick(row, aliases::TEXT, lenient_text)
                        .ok_or(DecodeError::MissingField("text"))?,
                },
                created_at,
                message: None,
                is_from_known_contributor,
                is_approved: pick(row, aliases::APPROVED, lenient_bool).unwrap_or(false),
            },
        };
        Ok((entity, synthesized))
    }
}

/// Map an action label to a canonical kind. Case and separators are ignored.
pub fn parse_action(label: &str) -> Option<EventKind> {
    let normalized = label.trim().to_ascii_uppercase().replace(['-', '.', ' '], "_");
    match normalized.as_str() {
        "ENTITY_ADDED" | "INSERT" | "ADDED" | "CONTRIBUTION_ADDED" | "MESSAGE_ADDED"
        | "NEW_CONTRIBUTION" | "NEW_MESSAGE" => Some(EventKind::EntityAdded),
        "ENTITY_UPDATED" | "UPDATE" | "UPDATED" => Some(EventKind::EntityUpdated),
        "ENTITY_REMOVED" | "DELETE" | "REMOVED" | "DELETED" => Some(EventKind::EntityRemoved),
        "FORCE_RELOAD" | "RELOAD" | "REFRESH" => Some(EventKind::ForceReload),
        _ => None,
    }
}

/// Parse a number leniently: numbers as-is, numeric strings parsed, anything
/// else (including non-finite values) is zero.
pub fn lenient_number(value: &JsonValue) -> f64 {
    finite_number(value).unwrap_or(0.0)
}

fn finite_number(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Parse a timestamp: RFC 3339, Postgres-style `YYYY-MM-DD HH:MM:SS+00`,
/// naive ISO-8601 (taken as UTC), or epoch milliseconds.
pub fn lenient_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                        .map(|naive| naive.and_utc())
                })
        }
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn lenient_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn lenient_id(value: &JsonValue) -> Option<EntityId> {
    lenient_text(value).map(EntityId::parse)
}

fn lenient_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_f64().map(|n| n != 0.0),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "t" => Some(true),
            "false" | "0" | "no" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn non_empty_object(value: &JsonValue) -> Option<&JsonObject> {
    value.as_object().filter(|o| !o.is_empty())
}

fn display_name(row: &JsonObject, group: &[&str]) -> String {
    pick(row, group, lenient_text).unwrap_or_else(|| ANONYMOUS_DISPLAY_NAME.to_string())
}
