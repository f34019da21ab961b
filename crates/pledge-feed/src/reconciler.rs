//! Bulk-load reconciler: the load state machine and the load-time buffer.
//!
//! ```text
//! NOT_STARTED ──begin──▶ LOADING ──finish──▶ LOADED
//!      ▲                    │                   │
//!      └──────fail──────────┘                   │
//!      └──────────────reset (force reload)──────┘
//! ```
//!
//! Every state change goes through [`transition`]. Canonical events that
//! reach the feed before the list is loaded are buffered here and handed
//! back, in arrival order, when the load finishes.

use std::collections::VecDeque;

use tracing::warn;

use pledge_core::{CanonicalEvent, Error, LoadState, Result};

use crate::config::FeedConfig;

/// Validate a load state change.
pub fn transition(from: LoadState, to: LoadState) -> Result<LoadState> {
    use LoadState::*;
    match (from, to) {
        (NotStarted, Loading)
        | (Loading, Loaded)
        | (Loading, NotStarted)
        | (Loaded, NotStarted)
        | (NotStarted, NotStarted) => Ok(to),
        _ => Err(Error::InvalidTransition { from, to }),
    }
}

#[derive(Debug)]
pub struct Reconciler {
    state: LoadState,
    pending: VecDeque<CanonicalEvent>,
    pending_capacity: usize,
    last_error: Option<String>,
}

impl Reconciler {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            state: LoadState::NotStarted,
            pending: VecDeque::new(),
            pending_capacity: config.pending_capacity,
            last_error: None,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    /// Error text of the last failed load, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Start a load. Returns `false` (no-op) while loading or loaded.
    pub fn begin(&mut self) -> Result<bool> {
        if self.state != LoadState::NotStarted {
            return Ok(false);
        }
        self.state = transition(self.state, LoadState::Loading)?;
        Ok(true)
    }

    /// Mark the load successful and hand back the buffered events.
    pub fn finish(&mut self) -> Result<Vec<CanonicalEvent>> {
        self.state = transition(self.state, LoadState::Loaded)?;
        self.last_error = None;
        Ok(self.pending.drain(..).collect())
    }

    /// Mark the load failed. Buffered events are kept for the retry.
    pub fn fail(&mut self, error: &Error) -> Result<()> {
        self.state = transition(self.state, LoadState::NotStarted)?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// Return to `NOT_STARTED` so the next `begin` reloads.
    pub fn reset(&mut self) -> Result<()> {
        self.state = transition(self.state, LoadState::NotStarted)?;
        Ok(())
    }

    /// Hold an event until the load finishes.
    ///
    /// When the buffer is full the oldest event is dropped and returned.
    pub fn buffer(&mut self, event: CanonicalEvent) -> Option<CanonicalEvent> {
        if self.pending_capacity == 0 {
            return Some(event);
        }
        let dropped = if self.pending.len() >= self.pending_capacity {
            self.pending.pop_front()
        } else {
            None
        };
        if let Some(ref dropped) = dropped {
            warn!(
                subsystem = "feed",
                component = "reconciler",
                op = "buffer",
                event_kind = %dropped.kind(),
                capacity = self.pending_capacity,
                "Load-time buffer full, dropping oldest event"
            );
        }
        self.pending.push_back(event);
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
