//! # pledge-core
//!
//! Core types, traits, and abstractions for the pledgewall live feeds.
//!
//! This crate provides the entity and canonical event models shared by the
//! contributor list and the support-message wall, the collaborator trait the
//! feeds talk to, and the in-process broadcast bus sibling components use to
//! announce optimistic inserts.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod mock;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{LocalBroadcast, LocalNotice};
pub use mock::MemoryEntityService;
pub use models::*;
pub use traits::{EntityService, NotificationStream};
pub use uuid_utils::{is_v7, local_entity_id, new_v7};
