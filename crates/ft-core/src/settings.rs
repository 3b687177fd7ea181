//! User-tunable session and suggestion settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Settings consumed by the suggestion engine and the live tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Master switch for proactive suggestions.
    pub suggestion_enabled: bool,

    /// Session age before the first suggestion. Values `<= 0` disable suggestions.
    /// Default: 600 (10 minutes).
    pub suggestion_trigger_seconds: i64,

    /// Minimum dwell of the current foreground app before interrupting.
    /// Default: 5.
    pub suggestion_foreground_stable_seconds: i64,

    /// Quiet period after a suggestion decision.
    /// Default: 300 (5 minutes).
    pub suggestion_cooldown_seconds: i64,

    /// How long a departure must persist before the session ends.
    /// Default: 5000.
    pub grace_period_millis: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            suggestion_enabled: true,
            suggestion_trigger_seconds: 600,
            suggestion_foreground_stable_seconds: 5,
            suggestion_cooldown_seconds: 300,
            grace_period_millis: 5_000,
        }
    }
}

impl SessionSettings {
    /// Flattens the settings into `key -> value` strings for audit diffs.
    pub fn to_entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "suggestion_enabled".to_string(),
                self.suggestion_enabled.to_string(),
            ),
            (
                "suggestion_trigger_seconds".to_string(),
                self.suggestion_trigger_seconds.to_string(),
            ),
            (
                "suggestion_foreground_stable_seconds".to_string(),
                self.suggestion_foreground_stable_seconds.to_string(),
            ),
            (
                "suggestion_cooldown_seconds".to_string(),
                self.suggestion_cooldown_seconds.to_string(),
            ),
            (
                "grace_period_millis".to_string(),
                self.grace_period_millis.to_string(),
            ),
        ])
    }
}
