//! Event type names as stored in the timeline's `type` column.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a [`crate::TimelineEvent`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TargetAppsChanged,
    ForegroundApp,
    SuggestionShown,
    SuggestionDecision,
    SettingsChanged,
    ServiceConfig,
    SessionLifecycle,
}

#[derive(Debug, Clone, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(String);

impl EventType {
    pub const ALL: [Self; 7] = [
        Self::TargetAppsChanged,
        Self::ForegroundApp,
        Self::SuggestionShown,
        Self::SuggestionDecision,
        Self::SettingsChanged,
        Self::ServiceConfig,
        Self::SessionLifecycle,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TargetAppsChanged => "target_apps_changed",
            Self::ForegroundApp => "foreground_app",
            Self::SuggestionShown => "suggestion_shown",
            Self::SuggestionDecision => "suggestion_decision",
            Self::SettingsChanged => "settings_changed",
            Self::ServiceConfig => "service_config",
            Self::SessionLifecycle => "session_lifecycle",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}
