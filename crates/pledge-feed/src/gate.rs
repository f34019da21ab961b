//! Debounced event gate.
//!
//! The push channel and the local broadcast can both announce the same
//! action within milliseconds. The gate holds one pending event behind a
//! short debounce: every arrival replaces the pending slot and re-arms the
//! deadline, so a burst collapses into the last event of the burst. After
//! forwarding, the event's key suppresses exact re-delivery until the
//! cooldown passes.
//!
//! The gate is a plain state machine over injected instants. The view's
//! event loop sleeps until [`DebounceGate::next_deadline`] and then calls
//! [`DebounceGate::fire`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use pledge_core::CanonicalEvent;

use crate::config::FeedConfig;

/// Key used when an event has no server-meaningful id.
pub const NO_ID: &str = "no-id";

/// Composite gate key: `kind|source timestamp|entity id or no-id`.
pub fn gate_key(event: &CanonicalEvent) -> String {
    let id = match event.entity_id() {
        Some(id) if !event.id_synthesized => id.as_str(),
        _ => NO_ID,
    };
    format!(
        "{}|{}|{}",
        event.kind(),
        event
            .source_timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        id
    )
}

/// What the gate did with an arriving event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Held in the pending slot. `superseded` is the key of a pending event
    /// this one replaced, if any.
    Armed { superseded: Option<String> },
    /// Same key as the last forwarded event, still cooling down.
    Suppressed,
}

#[derive(Debug)]
struct Pending {
    key: String,
    event: CanonicalEvent,
    deadline: Instant,
}

#[derive(Debug)]
pub struct DebounceGate {
    debounce: Duration,
    cooldown: Duration,
    pending: Option<Pending>,
    last_forwarded: Option<(String, Instant)>,
}

impl DebounceGate {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            debounce: config.debounce(),
            cooldown: config.cooldown(),
            pending: None,
            last_forwarded: None,
        }
    }

    /// Offer a canonical event to the gate.
    pub fn on_event(&mut self, event: CanonicalEvent, now: Instant) -> GateDecision {
        let key = gate_key(&event);
        if self.last_forwarded_key(now) == Some(key.as_str()) {
            debug!(
                subsystem = "feed",
                component = "gate",
                op = "on_event",
                gate_key = %key,
                reason = "cooldown",
                "Suppressed re-delivered event"
            );
            return GateDecision::Suppressed;
        }

        let superseded = self
            .pending
            .replace(Pending {
                key: key.clone(),
                event,
                deadline: now + self.debounce,
            })
            .map(|previous| previous.key);
        if let Some(previous) = superseded.as_deref().filter(|p| *p != key) {
            debug!(
                subsystem = "feed",
                component = "gate",
                op = "on_event",
                gate_key = %key,
                superseded = %previous,
                "Pending event replaced"
            );
        }
        GateDecision::Armed { superseded }
    }

    /// When the pending event is due, if there is one.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Forward the pending event if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Option<CanonicalEvent> {
        if self.pending.as_ref()?.deadline > now {
            return None;
        }
        let pending = self.pending.take()?;
        self.last_forwarded = Some((pending.key, now + self.cooldown));
        Some(pending.event)
    }

    /// Drop the pending event. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The last forwarded key, unless its cooldown has passed.
    pub fn last_forwarded_key(&self, now: Instant) -> Option<&str> {
        self.last_forwarded
            .as_ref()
            .filter(|(_, clear_at)| now < *clear_at)
            .map(|(key, _)| key.as_str())
    }
}
