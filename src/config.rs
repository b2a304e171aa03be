//! Session configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the auto-save debounce window, in ms
pub const DEBOUNCE_ENV: &str = "FORMSYNC_DEBOUNCE_MS";

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Configuration for one editing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Operation prefix on the persistence boundary, e.g. `agent` gives
    /// `agent/create`, `agent/update`, ...
    pub feature: String,

    /// Trailing debounce applied to field edits before auto-save
    #[serde(with = "millis")]
    pub debounce_window: Duration,

    /// Ids starting with this prefix have never been persisted
    pub temp_id_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            feature: "entity".to_string(),
            debounce_window: DEFAULT_DEBOUNCE,
            temp_id_prefix: "temp-".to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a SessionConfig with default values for `feature`
    pub fn new(feature: impl Into<String>) -> Self {
        SessionConfig {
            feature: feature.into(),
            ..Self::default()
        }
    }

    /// Like [`SessionConfig::new`], with the debounce window taken from
    /// `FORMSYNC_DEBOUNCE_MS` when it is set and parses.
    pub fn from_env(feature: impl Into<String>) -> Self {
        let config = Self::new(feature);
        match env::var(DEBOUNCE_ENV) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(ms) => config.with_debounce_window(Duration::from_millis(ms)),
                Err(_) => {
                    log::warn!("Ignoring {}={:?}: not a number of milliseconds", DEBOUNCE_ENV, value);
                    config
                }
            },
            Err(_) => config,
        }
    }

    /// Set a custom debounce window
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Set the prefix marking unsaved ids
    pub fn with_temp_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_id_prefix = prefix.into();
        self
    }

    pub fn operation(&self, action: &str) -> String {
        format!("{}/{}", self.feature, action)
    }

    /// Whether saving `id` must create rather than update
    pub fn is_unsaved_id(&self, id: &str) -> bool {
        id.is_empty() || id.starts_with(&self.temp_id_prefix)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
