//! Store configuration.

use std::time::Duration;

/// Environment variable overriding [`StoreConfig::change_debounce`].
pub const CHANGE_DEBOUNCE_ENV: &str = "RESQ_CHANGE_DEBOUNCE_MS";

/// Environment variable overriding [`StoreConfig::update_debounce`].
pub const UPDATE_DEBOUNCE_ENV: &str = "RESQ_UPDATE_DEBOUNCE_MS";

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Window of the per-entity `changes()` bus consumed by UI adapters.
    pub change_debounce: Duration,
    /// Delay before an update manager re-runs its callback.
    pub update_debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_debounce: Duration::from_millis(100),
            update_debounce: Duration::from_millis(100),
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `RESQ_CHANGE_DEBOUNCE_MS` / `RESQ_UPDATE_DEBOUNCE_MS`.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StoreConfig::from_env`] with a caller-supplied lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let defaults = Self::default();
        Self {
            change_debounce: millis(CHANGE_DEBOUNCE_ENV).unwrap_or(defaults.change_debounce),
            update_debounce: millis(UPDATE_DEBOUNCE_ENV).unwrap_or(defaults.update_debounce),
        }
    }
}
