//! Feed view configuration.

use std::env;
use std::time::Duration;

use pledge_core::defaults;
use pledge_core::{EntityKind, Error, Result};

/// Tunables for one mounted feed view.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Delay before a gated notification is forwarded.
    pub debounce_ms: u64,
    /// How long the last forwarded gate key suppresses exact re-delivery.
    pub cooldown_ms: u64,
    /// Lifetime of a recent-event key in the dedup store.
    pub recent_key_ttl_ms: u64,
    /// Width of the timestamp bucket in recent-event keys.
    pub recent_key_bucket_secs: i64,
    /// Content-similarity window for admissions.
    pub similarity_window_secs: i64,
    /// Entities requested by the bulk load.
    pub bulk_limit: usize,
    /// Canonical events buffered while the bulk load is in flight.
    pub pending_capacity: usize,
    /// Only approved entities are admitted.
    pub require_approval: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            debounce_ms: defaults::GATE_DEBOUNCE_MS,
            cooldown_ms: defaults::GATE_COOLDOWN_MS,
            recent_key_ttl_ms: defaults::RECENT_KEY_TTL_MS,
            recent_key_bucket_secs: defaults::RECENT_KEY_BUCKET_SECS,
            similarity_window_secs: defaults::SIMILARITY_WINDOW_SECS,
            bulk_limit: defaults::BULK_LOAD_LIMIT,
            pending_capacity: defaults::PENDING_EVENT_CAPACITY,
            require_approval: false,
        }
    }
}

impl FeedConfig {
    /// Defaults for a list of the given kind.
    ///
    /// The support wall is moderated, so it requires approval.
    pub fn for_kind(kind: EntityKind) -> Self {
        Self {
            require_approval: kind == EntityKind::SupportMessage,
            ..Self::default()
        }
    }

    /// Create config from environment variables (with per-kind defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PLEDGE_FEED_DEBOUNCE_MS` | `50` | Gate debounce delay |
    /// | `PLEDGE_FEED_COOLDOWN_MS` | `2000` | Gate re-delivery cooldown |
    /// | `PLEDGE_FEED_RECENT_TTL_MS` | `3000` | Recent-key lifetime |
    /// | `PLEDGE_FEED_RECENT_BUCKET_SECS` | `1` | Recent-key timestamp bucket |
    /// | `PLEDGE_FEED_SIMILARITY_WINDOW_SECS` | `10` | Content-similarity window |
    /// | `PLEDGE_FEED_BULK_LIMIT` | `50` | Bulk load size |
    /// | `PLEDGE_FEED_PENDING_CAPACITY` | `128` | Events buffered during load |
    /// | `PLEDGE_FEED_REQUIRE_APPROVAL` | per kind | Moderation filter |
    pub fn from_env(kind: EntityKind) -> Self {
        let base = Self::for_kind(kind);
        Self {
            debounce_ms: parse_env("PLEDGE_FEED_DEBOUNCE_MS", base.debounce_ms),
            cooldown_ms: parse_env("PLEDGE_FEED_COOLDOWN_MS", base.cooldown_ms),
            recent_key_ttl_ms: parse_env("PLEDGE_FEED_RECENT_TTL_MS", base.recent_key_ttl_ms),
            recent_key_bucket_secs: parse_env(
                "PLEDGE_FEED_RECENT_BUCKET_SECS",
                base.recent_key_bucket_secs,
            )
            .max(1),
            similarity_window_secs: parse_env(
                "PLEDGE_FEED_SIMILARITY_WINDOW_SECS",
                base.similarity_window_secs,
            ),
            bulk_limit: parse_env("PLEDGE_FEED_BULK_LIMIT", base.bulk_limit).max(1),
            pending_capacity: parse_env("PLEDGE_FEED_PENDING_CAPACITY", base.pending_capacity),
            require_approval: parse_bool_env("PLEDGE_FEED_REQUIRE_APPROVAL", base.require_approval),
        }
    }

    /// Set the gate debounce delay.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the gate cooldown.
    pub fn with_cooldown_ms(mut self, ms: u64) -> Self {
        self.cooldown_ms = ms;
        self
    }

    /// Set the recent-key lifetime.
    pub fn with_recent_key_ttl_ms(mut self, ms: u64) -> Self {
        self.recent_key_ttl_ms = ms;
        self
    }

    /// Set the bulk load size.
    pub fn with_bulk_limit(mut self, limit: usize) -> Self {
        self.bulk_limit = limit;
        self
    }

    /// Set the load-time buffer size.
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    /// Enable or disable the moderation filter.
    pub fn with_require_approval(mut self, enabled: bool) -> Self {
        self.require_approval = enabled;
        self
    }

    // Accessors clamp to MAX_WINDOW_SECS so deadline arithmetic cannot
    // overflow even on a config that skipped validate().

    pub fn debounce(&self) -> Duration {
        clamp_millis(self.debounce_ms)
    }

    pub fn cooldown(&self) -> Duration {
        clamp_millis(self.cooldown_ms)
    }

    pub fn recent_key_ttl(&self) -> Duration {
        clamp_millis(self.recent_key_ttl_ms)
    }

    pub fn similarity_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.similarity_window_secs
                .clamp(0, defaults::MAX_WINDOW_SECS),
        )
    }

    /// Reject combinations the gate or the store cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.bulk_limit == 0 {
            return Err(Error::Config("bulk_limit must be > 0".to_string()));
        }
        if self.recent_key_bucket_secs <= 0 {
            return Err(Error::Config(
                "recent_key_bucket_secs must be > 0".to_string(),
            ));
        }
        if self.similarity_window_secs < 0 {
            return Err(Error::Config(
                "similarity_window_secs cannot be negative".to_string(),
            ));
        }
        let max_secs = defaults::MAX_WINDOW_SECS;
        let max_ms = max_secs as u64 * 1_000;
        for (name, secs) in [
            ("recent_key_bucket_secs", self.recent_key_bucket_secs),
            ("similarity_window_secs", self.similarity_window_secs),
        ] {
            if secs > max_secs {
                return Err(Error::Config(format!(
                    "{name} ({secs}) exceeds {max_secs}"
                )));
            }
        }
        for (name, ms) in [
            ("debounce_ms", self.debounce_ms),
            ("cooldown_ms", self.cooldown_ms),
            ("recent_key_ttl_ms", self.recent_key_ttl_ms),
        ] {
            if ms > max_ms {
                return Err(Error::Config(format!("{name} ({ms}) exceeds {max_ms}")));
            }
        }
        if self.cooldown_ms < self.debounce_ms {
            return Err(Error::Config(format!(
                "cooldown_ms ({}) must not be shorter than debounce_ms ({})",
                self.cooldown_ms, self.debounce_ms
            )));
        }
        Ok(())
    }
}

fn clamp_millis(ms: u64) -> Duration {
    Duration::from_millis(ms.min(defaults::MAX_WINDOW_SECS as u64 * 1_000))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Recognizes "true", "1", "yes", "on" (case-insensitive) as true and the
/// matching negatives as false. Anything else returns the default.
fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|val| match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global, so tests must not run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_feed_env() {
        for key in [
            "PLEDGE_FEED_DEBOUNCE_MS",
            "PLEDGE_FEED_COOLDOWN_MS",
            "PLEDGE_FEED_RECENT_TTL_MS",
            "PLEDGE_FEED_RECENT_BUCKET_SECS",
            "PLEDGE_FEED_SIMILARITY_WINDOW_SECS",
            "PLEDGE_FEED_BULK_LIMIT",
            "PLEDGE_FEED_PENDING_CAPACITY",
            "PLEDGE_FEED_REQUIRE_APPROVAL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.cooldown_ms, 2_000);
        assert_eq!(config.similarity_window_secs, 10);
        assert!(!config.require_approval);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_support_wall_requires_approval() {
        assert!(FeedConfig::for_kind(EntityKind::SupportMessage).require_approval);
        assert!(!FeedConfig::for_kind(EntityKind::Contribution).require_approval);
    }

    #[test]
    fn test_from_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_feed_env();
        env::set_var("PLEDGE_FEED_DEBOUNCE_MS", "75");
        env::set_var("PLEDGE_FEED_BULK_LIMIT", "20");
        env::set_var("PLEDGE_FEED_REQUIRE_APPROVAL", "off");

        let config = FeedConfig::from_env(EntityKind::SupportMessage);
        assert_eq!(config.debounce_ms, 75);
        assert_eq!(config.bulk_limit, 20);
        assert!(!config.require_approval);
        assert_eq!(config.cooldown_ms, 2_000);

        clear_feed_env();
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_feed_env();
        env::set_var("PLEDGE_FEED_COOLDOWN_MS", "soon");
        env::set_var("PLEDGE_FEED_BULK_LIMIT", "0");

        let config = FeedConfig::from_env(EntityKind::Contribution);
        assert_eq!(config.cooldown_ms, 2_000);
        assert_eq!(config.bulk_limit, 1);

        clear_feed_env();
    }

    #[test]
    fn test_validate_rejects_short_cooldown() {
        let config = FeedConfig::default()
            .with_debounce_ms(500)
            .with_cooldown_ms(100);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_windows() {
        let mut config = FeedConfig::default();
        config.similarity_window_secs = i64::MAX;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert_eq!(config.similarity_window(), chrono::Duration::days(1));

        let config = FeedConfig::default()
            .with_recent_key_ttl_ms(u64::MAX)
            .with_cooldown_ms(u64::MAX);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert_eq!(config.recent_key_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.cooldown(), Duration::from_secs(86_400));

        let mut config = FeedConfig::default();
        config.similarity_window_secs = 86_400;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_oversized_window_fails_validation() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_feed_env();
        env::set_var("PLEDGE_FEED_SIMILARITY_WINDOW_SECS", "9223372036854775807");

        let config = FeedConfig::from_env(EntityKind::Contribution);
        assert_eq!(config.similarity_window_secs, i64::MAX);
        assert!(config.validate().is_err());

        clear_feed_env();
    }

    #[test]
    fn test_builders() {
        let config = FeedConfig::default()
            .with_bulk_limit(10)
            .with_pending_capacity(4)
            .with_recent_key_ttl_ms(5_000)
            .with_require_approval(true);
        assert_eq!(config.bulk_limit, 10);
        assert_eq!(config.pending_capacity, 4);
        assert_eq!(config.recent_key_ttl(), Duration::from_secs(5));
        assert!(config.require_approval);
    }
}
