//! Optimistic submit path used by sibling components.
//!
//! The form announces the new entity on the local bus under a provisional
//! `local-` id before the server answers, so mounted views show it at once.
//! When the server's push echo arrives, the view's content-similarity check
//! recognizes it and swaps the provisional entry for the confirmed one. A
//! failed submit retracts the provisional entry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use pledge_core::{
    local_entity_id, Entity, EntityKind, EntityService, LocalBroadcast, LocalNotice, Result,
    Submission,
};

pub struct OptimisticSubmitter {
    service: Arc<dyn EntityService>,
    bus: LocalBroadcast,
}

impl OptimisticSubmitter {
    pub fn new(service: Arc<dyn EntityService>, bus: LocalBroadcast) -> Self {
        Self { service, bus }
    }

    /// Announce, submit, and retract on failure. Returns the server's entity.
    #[instrument(skip_all, fields(scope_id = %submission.scope_id))]
    pub async fn submit(&self, submission: Submission) -> Result<Entity> {
        let kind = submission.body.kind();
        // Held messages are not shown until a moderator approves them.
        let provisional = submission.clone().into_entity(
            local_entity_id(),
            Utc::now(),
            kind == EntityKind::Contribution,
        );
        let listeners = self.bus.publish_notice(&LocalNotice::added(&provisional));
        debug!(
            subsystem = "feed",
            component = "optimistic",
            op = "announce",
            entity_id = %provisional.id,
            listeners,
            "Optimistic entity announced"
        );

        match self.service.submit_entity(submission).await {
            Ok(entity) => Ok(entity),
            Err(e) => {
                self.bus
                    .publish_notice(&LocalNotice::removed(&provisional.id, kind));
                warn!(
                    subsystem = "feed",
                    component = "optimistic",
                    op = "submit",
                    entity_id = %provisional.id,
                    error = %e,
                    "Submit failed, optimistic entity retracted"
                );
                Err(e)
            }
        }
    }
}
