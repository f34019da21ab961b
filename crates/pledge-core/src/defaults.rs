//! Centralized default constants for pledgewall feeds.
//!
//! **This module is the single source of truth** for shared default values.
//! `FeedConfig` and the mock service reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// DEBOUNCED GATE
// =============================================================================

/// Delay before a gated notification is forwarded (milliseconds).
pub const GATE_DEBOUNCE_MS: u64 = 50;

/// How long the last forwarded key suppresses exact re-delivery (milliseconds).
pub const GATE_COOLDOWN_MS: u64 = 2_000;

// =============================================================================
// DEDUPLICATION
// =============================================================================

/// Lifetime of a recent-event key (milliseconds). Observed range is 2000-5000.
pub const RECENT_KEY_TTL_MS: u64 = 3_000;

/// Width of the timestamp bucket used in recent-event keys (seconds).
pub const RECENT_KEY_BUCKET_SECS: i64 = 1;

/// Two admissions with the same actor and payload closer than this are the
/// same logical action (seconds).
pub const SIMILARITY_WINDOW_SECS: i64 = 10;

/// Ceiling for every configured delay, window and bucket (one day, seconds).
pub const MAX_WINDOW_SECS: i64 = 86_400;

// =============================================================================
// BULK LOAD
// =============================================================================

/// Number of entities requested by the initial fetch.
pub const BULK_LOAD_LIMIT: usize = 50;

/// Canonical events buffered while the bulk load is in flight.
pub const PENDING_EVENT_CAPACITY: usize = 128;

// =============================================================================
// CHANNELS
// =============================================================================

/// Buffer size for the local broadcast bus.
pub const LOCAL_BUS_CAPACITY: usize = 256;

/// Buffer size for the mock push channel.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

/// Command queue depth for a mounted feed view.
pub const VIEW_COMMAND_CAPACITY: usize = 16;

// =============================================================================
// ENTITY FALLBACKS
// =============================================================================

/// Display name used when a notification carries none.
pub const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous";

/// Emoji used when a notification carries none.
pub const DEFAULT_EMOJI: &str = "💚";

/// Prefix for client-synthesized entity ids.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Prefix older producers used for client-synthesized ids.
pub const LEGACY_TEMP_ID_PREFIX: &str = "temp-";
