//! Deduplication store: decides whether a candidate entity is new.
//!
//! Three checks run in order, first match wins:
//!
//! 1. **Identity**: the id is already admitted.
//! 2. **Content similarity**: an admitted entity has the same actor, the same
//!    amount (to the cent) or text, and a business timestamp within the
//!    similarity window. This is what collapses an optimistic local echo with
//!    the server's push echo of the same submission.
//! 3. **Recent key**: `actor|payload|bucket` was seen within the TTL.
//!
//! Recent keys are purged lazily on every call, so the store owns no timers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use pledge_core::{Entity, EntityBody, EntityId};

use crate::config::FeedConfig;

/// Why a candidate was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateId,
    /// Matches the content of an entity already in the list.
    SimilarContent { existing: EntityId },
    RecentDuplicate,
    /// Held for moderation.
    Unapproved,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::DuplicateId => "duplicate_id",
            RejectReason::SimilarContent { .. } => "similar_content",
            RejectReason::RecentDuplicate => "recent_duplicate",
            RejectReason::Unapproved => "unapproved",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Content identity of an admitted entity.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    actor: String,
    payload: String,
    created_at: DateTime<Utc>,
}

impl Fingerprint {
    fn of(entity: &Entity) -> Self {
        let payload = match &entity.body {
            EntityBody::Contribution { amount } => {
                format!("amt:{}", (amount * 100.0).round() as i64)
            }
            EntityBody::SupportMessage { text } => format!("txt:{}", text.trim()),
        };
        Self {
            actor: entity.display_name.trim().to_lowercase(),
            payload,
            created_at: entity.created_at,
        }
    }

    fn matches(&self, other: &Fingerprint, window: chrono::Duration) -> bool {
        self.actor == other.actor
            && self.payload == other.payload
            && (self.created_at - other.created_at).abs() <= window
    }

    fn recent_key(&self, bucket_secs: i64) -> String {
        let bucket = self.created_at.timestamp().div_euclid(bucket_secs.max(1));
        format!("{}|{}|{}", self.actor, self.payload, bucket)
    }
}

/// Admitted ids plus the short-lived recent-event keys of one list view.
#[derive(Debug)]
pub struct DedupStore {
    admitted: HashMap<EntityId, Fingerprint>,
    recent: HashMap<String, Instant>,
    recent_ttl: Duration,
    bucket_secs: i64,
    similarity_window: chrono::Duration,
}

impl DedupStore {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            admitted: HashMap::new(),
            recent: HashMap::new(),
            recent_ttl: config.recent_key_ttl(),
            bucket_secs: config.recent_key_bucket_secs,
            similarity_window: config.similarity_window(),
        }
    }

    /// Check a candidate and, when it passes, record it as admitted.
    pub fn should_admit(&mut self, entity: &Entity, now: Instant) -> Admission {
        self.purge_expired(now);

        if self.admitted.contains_key(&entity.id) {
            return Admission::Rejected(RejectReason::DuplicateId);
        }

        let fingerprint = Fingerprint::of(entity);
        if let Some(existing) = self
            .admitted
            .iter()
            .find(|(_, admitted)| admitted.matches(&fingerprint, self.similarity_window))
            .map(|(id, _)| id.clone())
        {
            return Admission::Rejected(RejectReason::SimilarContent { existing });
        }

        let key = fingerprint.recent_key(self.bucket_secs);
        if self.recent.contains_key(&key) {
            return Admission::Rejected(RejectReason::RecentDuplicate);
        }
        self.recent.insert(key, now + self.recent_ttl);
        self.admitted.insert(entity.id.clone(), fingerprint);
        Admission::Admitted
    }

    /// Record an entity as admitted without checks (bulk-load seed path).
    pub fn register(&mut self, entity: &Entity) {
        self.admitted
            .insert(entity.id.clone(), Fingerprint::of(entity));
    }

    /// Drop an admitted id. Returns whether it was present.
    pub fn forget(&mut self, id: &EntityId) -> bool {
        self.admitted.remove(id).is_some()
    }

    /// Drop everything (force reload).
    pub fn clear(&mut self) {
        self.admitted.clear();
        self.recent.clear();
    }

    /// Remove recent keys whose expiry has passed.
    pub fn purge_expired(&mut self, now: Instant) {
        let before = self.recent.len();
        self.recent.retain(|_, expires_at| *expires_at > now);
        let purged = before - self.recent.len();
        if purged > 0 {
            debug!(
                subsystem = "feed",
                component = "dedup",
                op = "purge_expired",
                item_count = purged,
                "Purged expired recent keys"
            );
        }
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.admitted.contains_key(id)
    }

    /// Number of admitted ids.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Number of live recent keys (including not yet purged expired ones).
    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }
}
