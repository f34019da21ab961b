//! UUID utilities for client-synthesized identifiers.
//!
//! Entities that reach a feed without a server id get a local id built from
//! a UUIDv7. The 48-bit millisecond prefix keeps ids time-ordered and the
//! random tail keeps two ids minted in the same millisecond distinct.
//!
//! # UUIDv7 Structure (RFC 9562)
//!
//! ```text
//! 0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          unix_ts_ms                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          unix_ts_ms           |  ver  |       rand_a         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |var|                        rand_b                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            rand_b                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use uuid::Uuid;

use crate::defaults::LOCAL_ID_PREFIX;
use crate::models::EntityId;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Mint a collision-resistant local entity id (`local-<uuidv7>`).
///
/// # Example
///
/// ```
/// use pledge_core::uuid_utils::local_entity_id;
///
/// let a = local_entity_id();
/// let b = local_entity_id();
/// assert!(a.is_local());
/// assert_ne!(a, b);
/// ```
pub fn local_entity_id() -> EntityId {
    EntityId::Local(format!("{}{}", LOCAL_ID_PREFIX, new_v7()))
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}
