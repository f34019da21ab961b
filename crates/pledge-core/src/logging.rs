//! Structured logging schema and field name constants for pledgewall.
//!
//! Feed code logs with `tracing` using these field names so a single
//! `subsystem = "feed"` filter pulls every reconciliation decision for a view.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | View task died or cannot make progress |
//! | WARN  | Load failure, lagged channel, dropped buffered event, detach failure |
//! | INFO  | Mount/unmount, load completions, force reloads |
//! | DEBUG | Admission decisions, gate drops, malformed notifications |
//! | TRACE | Per-notification arrival, gate re-arms |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event. Values: "feed", "service", "replay"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "normalizer", "dedup", "gate", "reconciler", "view"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "admit", "seed", "load_initial", "forward"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Scope (project) the feed belongs to.
pub const SCOPE_ID: &str = "scope_id";

/// Entity kind the feed renders ("contribution", "support_message").
pub const ENTITY_KIND: &str = "entity_kind";

/// Entity identifier being admitted or rejected.
pub const ENTITY_ID: &str = "entity_id";

/// Canonical event kind ("ENTITY_ADDED", "FORCE_RELOAD", ...).
pub const EVENT_KIND: &str = "event_kind";

/// Channel that delivered a notification ("push", "local").
pub const CHANNEL: &str = "channel";

// ─── Decision fields ───────────────────────────────────────────────────────

/// Rejection or drop reason.
pub const REASON: &str = "reason";

/// Gate key of a notification.
pub const GATE_KEY: &str = "gate_key";

/// Load state after a transition.
pub const LOAD_STATE: &str = "load_state";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items in the visible list.
pub const ITEM_COUNT: &str = "item_count";

/// Number of buffered events replayed after a load.
pub const REPLAYED: &str = "replayed";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
