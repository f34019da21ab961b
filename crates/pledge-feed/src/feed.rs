//! The synchronous feed pipeline for one list view.
//!
//! [`Feed`] owns the dedup store, the visible list and the reconciler, and
//! applies gated canonical events to them. It never awaits except in
//! [`Feed::load_initial`]; the mounted view drives the fetch itself so it
//! can keep receiving notifications while the fetch is in flight.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use pledge_core::{
    CanonicalEvent, Change, Entity, EntityId, EntityService, Error, FeedScope, FetchPage,
    LoadState, Result,
};

use crate::config::FeedConfig;
use crate::dedup::{Admission, DedupStore, RejectReason};
use crate::merge::VisibleList;
use crate::reconciler::Reconciler;

/// What applying one canonical event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Added(EntityId),
    Updated(EntityId),
    Removed(EntityId),
    /// A confirmed entity took the place of an optimistic local one.
    Superseded {
        provisional: EntityId,
        confirmed: EntityId,
    },
    Rejected(RejectReason),
    /// Held until the bulk load finishes.
    Buffered,
    /// The caller should start a bulk load.
    ReloadRequested,
    /// Nothing to do (unknown id, reload while loading).
    Ignored,
}

impl Applied {
    /// Whether the visible list changed.
    pub fn changed_list(&self) -> bool {
        matches!(
            self,
            Applied::Added(_)
                | Applied::Updated(_)
                | Applied::Removed(_)
                | Applied::Superseded { .. }
        )
    }
}

#[derive(Debug)]
pub struct Feed {
    scope: FeedScope,
    config: FeedConfig,
    store: DedupStore,
    list: VisibleList,
    reconciler: Reconciler,
}

impl Feed {
    pub fn new(scope: FeedScope, config: FeedConfig) -> Self {
        Self {
            store: DedupStore::new(&config),
            list: VisibleList::new(),
            reconciler: Reconciler::new(&config),
            scope,
            config,
        }
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn load_state(&self) -> LoadState {
        self.reconciler.state()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.reconciler.last_error()
    }

    pub fn list(&self) -> &VisibleList {
        &self.list
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    pub fn pending_len(&self) -> usize {
        self.reconciler.pending_len()
    }

    /// Enter `LOADING`. Returns `false` when a load is running or done.
    pub fn begin_load(&mut self) -> Result<bool> {
        let started = self.reconciler.begin()?;
        if started {
            debug!(
                subsystem = "feed",
                component = "reconciler",
                op = "begin_load",
                scope_id = %self.scope.scope_id,
                load_state = %self.reconciler.state(),
                "Bulk load started"
            );
        }
        Ok(started)
    }

    /// Seed the list from a successful fetch and replay buffered events.
    ///
    /// Returns the outcomes of the replayed events in arrival order.
    pub fn complete_load(&mut self, page: FetchPage, now: Instant) -> Result<Vec<Applied>> {
        let buffered = self.reconciler.finish()?;
        let fetched = page.items.len();
        let items: Vec<Entity> = page
            .items
            .into_iter()
            .filter(|e| e.kind() == self.scope.kind)
            .filter(|e| !self.config.require_approval || e.is_approved)
            .collect();

        self.list.seed(items);
        self.store.clear();
        for entity in self.list.iter() {
            self.store.register(entity);
        }
        if self.list.len() < fetched {
            debug!(
                subsystem = "feed",
                component = "reconciler",
                op = "seed",
                scope_id = %self.scope.scope_id,
                dropped = fetched - self.list.len(),
                "Dropped off-kind, unapproved or repeated seed entities"
            );
        }

        let replayed = buffered.len();
        let outcomes = buffered
            .into_iter()
            .map(|event| self.apply(event, now))
            .collect();

        info!(
            subsystem = "feed",
            component = "reconciler",
            op = "seed",
            scope_id = %self.scope.scope_id,
            entity_kind = %self.scope.kind,
            item_count = self.list.len(),
            replayed,
            "Bulk load complete"
        );
        Ok(outcomes)
    }

    /// Record a failed fetch; the view stays empty until a retry.
    pub fn fail_load(&mut self, error: &Error) -> Result<()> {
        self.reconciler.fail(error)?;
        warn!(
            subsystem = "feed",
            component = "reconciler",
            op = "load_initial",
            scope_id = %self.scope.scope_id,
            error = %error,
            "Bulk load failed"
        );
        Ok(())
    }

    /// Fetch and seed in one call. No-op once loaded or while loading.
    pub async fn load_initial(&mut self, service: &dyn EntityService) -> Result<&VisibleList> {
        if !self.begin_load()? {
            return Ok(&self.list);
        }
        let fetched = service
            .fetch_initial_entities(&self.scope, self.config.bulk_limit)
            .await;
        match fetched {
            Ok(page) => {
                self.complete_load(page, Instant::now())?;
                Ok(&self.list)
            }
            Err(e) => {
                self.fail_load(&e)?;
                Err(e)
            }
        }
    }

    /// Apply one gated canonical event.
    pub fn apply(&mut self, event: CanonicalEvent, now: Instant) -> Applied {
        if let Change::ForceReload = event.change {
            return self.force_reload();
        }
        if !self.reconciler.is_loaded() {
            self.reconciler.buffer(event);
            return Applied::Buffered;
        }

        let outcome = match event.change {
            Change::EntityAdded(entity) => {
                if self.config.require_approval && !entity.is_approved {
                    Applied::Rejected(RejectReason::Unapproved)
                } else {
                    self.admit(entity, now)
                }
            }
            Change::EntityUpdated(entity) => self.update(entity, now),
            Change::EntityRemoved(id) => self.remove(&id),
            Change::ForceReload => Applied::Ignored,
        };

        match &outcome {
            Applied::Rejected(reason) => debug!(
                subsystem = "feed",
                component = "dedup",
                op = "admit",
                scope_id = %self.scope.scope_id,
                channel = %event.channel,
                reason = reason.as_str(),
                "Event rejected"
            ),
            other => debug!(
                subsystem = "feed",
                component = "merge",
                op = "apply",
                scope_id = %self.scope.scope_id,
                channel = %event.channel,
                outcome = ?other,
                item_count = self.list.len(),
                "Event applied"
            ),
        }
        outcome
    }

    fn force_reload(&mut self) -> Applied {
        match self.reconciler.state() {
            LoadState::Loading => Applied::Ignored,
            LoadState::NotStarted => Applied::ReloadRequested,
            LoadState::Loaded => {
                self.store.clear();
                if let Err(e) = self.reconciler.reset() {
                    warn!(
                        subsystem = "feed",
                        component = "reconciler",
                        op = "force_reload",
                        error = %e,
                        "Reset rejected"
                    );
                    return Applied::Ignored;
                }
                info!(
                    subsystem = "feed",
                    component = "reconciler",
                    op = "force_reload",
                    scope_id = %self.scope.scope_id,
                    "Force reload, dedup state cleared"
                );
                Applied::ReloadRequested
            }
        }
    }

    fn admit(&mut self, entity: Entity, now: Instant) -> Applied {
        match self.store.should_admit(&entity, now) {
            Admission::Admitted => {
                let id = entity.id.clone();
                self.list.apply_add(entity);
                Applied::Added(id)
            }
            Admission::Rejected(RejectReason::SimilarContent { existing })
                if existing.is_local()
                    && !entity.id.is_local()
                    && self.list.contains(&existing) =>
            {
                let confirmed = entity.id.clone();
                self.store.forget(&existing);
                self.store.register(&entity);
                self.list.replace(&existing, entity);
                Applied::Superseded {
                    provisional: existing,
                    confirmed,
                }
            }
            Admission::Rejected(reason) => Applied::Rejected(reason),
        }
    }

    fn update(&mut self, entity: Entity, now: Instant) -> Applied {
        let visible = self.list.contains(&entity.id);
        let approved = !self.config.require_approval || entity.is_approved;
        match (visible, approved) {
            (true, true) => {
                let id = entity.id.clone();
                self.store.register(&entity);
                self.list.apply_update(entity);
                Applied::Updated(id)
            }
            (true, false) => self.remove(&entity.id),
            (false, true) if self.config.require_approval => self.admit(entity, now),
            (false, true) => Applied::Ignored,
            (false, false) => Applied::Rejected(RejectReason::Unapproved),
        }
    }

    fn remove(&mut self, id: &EntityId) -> Applied {
        let removed = self.list.apply_remove(id);
        self.store.forget(id);
        if removed {
            Applied::Removed(id.clone())
        } else {
            Applied::Ignored
        }
    }
}
