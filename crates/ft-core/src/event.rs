//! Timeline events: the append-only facts every projection is folded from.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event_type::EventType;
use crate::session::SessionEventType;
use crate::types::{EventId, PackageName, SessionId, SuggestionId, ValidationError};

/// What the user did with a shown suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionDecision {
    Opened,
    SnoozedLater,
    DisabledThisSession,
    DismissedOnly,
}

impl SuggestionDecision {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::SnoozedLater => "snoozed_later",
            Self::DisabledThisSession => "disabled_this_session",
            Self::DismissedOnly => "dismissed_only",
        }
    }
}

impl fmt::Display for SuggestionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionDecision {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(Self::Opened),
            "snoozed_later" | "snoozed" => Ok(Self::SnoozedLater),
            "disabled_this_session" | "disabled" => Ok(Self::DisabledThisSession),
            "dismissed_only" | "dismissed" => Ok(Self::DismissedOnly),
            _ => Err(ValidationError::InvalidDecision {
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of the monitoring service, recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Started,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
        })
    }
}

/// Seed key of `ForegroundApp` events.
pub const FOREGROUND_KEY: &str = "foreground";

/// Seed key of the lifecycle markers of every session of `package_name`.
#[must_use]
pub fn session_key(package_name: &PackageName) -> String {
    format!("session:{package_name}")
}

/// A domain fact appended to the timeline.
///
/// Every fold matches this enum exhaustively, so a new variant has to be
/// handled (or explicitly ignored) by each projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// The set of monitored packages was redefined.
    TargetAppsChanged { target_packages: BTreeSet<PackageName> },
    /// The sampled foreground app. `None` means no tracked app is in front.
    ForegroundApp { package_name: Option<PackageName> },
    /// A suggestion was presented.
    SuggestionShown {
        package_name: PackageName,
        suggestion_id: SuggestionId,
    },
    /// The user acted on a shown suggestion.
    SuggestionDecision {
        package_name: PackageName,
        suggestion_id: SuggestionId,
        decision: SuggestionDecision,
    },
    /// A setting changed value. Audit only.
    SettingsChanged {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<String>,
        new_value: String,
    },
    /// Effective service configuration at a state change. Audit only.
    ServiceConfig {
        config: serde_json::Value,
        state: ServiceState,
    },
    /// A session lifecycle marker written by the live tracker.
    SessionLifecycle {
        session_id: SessionId,
        package_name: PackageName,
        event: SessionEventType,
        /// When the transition happened, if earlier than the event's stamp.
        /// Set on the `End` that closes a session a previous run left open.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        occurred_ms: Option<i64>,
    },
}

impl TimelineEvent {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::TargetAppsChanged { .. } => EventType::TargetAppsChanged,
            Self::ForegroundApp { .. } => EventType::ForegroundApp,
            Self::SuggestionShown { .. } => EventType::SuggestionShown,
            Self::SuggestionDecision { .. } => EventType::SuggestionDecision,
            Self::SettingsChanged { .. } => EventType::SettingsChanged,
            Self::ServiceConfig { .. } => EventType::ServiceConfig,
            Self::SessionLifecycle { .. } => EventType::SessionLifecycle,
        }
    }

    /// The package this event is about, if any.
    #[must_use]
    pub const fn package_name(&self) -> Option<&PackageName> {
        match self {
            Self::ForegroundApp { package_name } => package_name.as_ref(),
            Self::SuggestionShown { package_name, .. }
            | Self::SuggestionDecision { package_name, .. }
            | Self::SessionLifecycle { package_name, .. } => Some(package_name),
            Self::TargetAppsChanged { .. }
            | Self::SettingsChanged { .. }
            | Self::ServiceConfig { .. } => None,
        }
    }

    /// Key of the fact this event establishes.
    ///
    /// Seed queries return the newest event per key before a window start, so
    /// folds over a window never treat an established fact as unset.
    #[must_use]
    pub fn seed_key(&self) -> String {
        match self {
            Self::TargetAppsChanged { .. } => "targets".to_string(),
            Self::ForegroundApp { .. } => FOREGROUND_KEY.to_string(),
            Self::SuggestionShown { package_name, .. } => {
                format!("suggestion_shown:{package_name}")
            }
            Self::SuggestionDecision { package_name, .. } => {
                format!("suggestion_decision:{package_name}")
            }
            Self::SettingsChanged { key, .. } => format!("setting:{key}"),
            Self::ServiceConfig { .. } => "service_config".to_string(),
            Self::SessionLifecycle { package_name, .. } => session_key(package_name),
        }
    }
}

/// An event as persisted by a timeline store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub event: TimelineEvent,
}

impl StoredEvent {
    /// When the event took effect: the lifecycle's `occurred_ms` if set,
    /// otherwise the stamp.
    #[must_use]
    pub const fn occurred_ms(&self) -> i64 {
        match &self.event {
            TimelineEvent::SessionLifecycle {
                occurred_ms: Some(occurred_ms),
                ..
            } => *occurred_ms,
            _ => self.timestamp_ms,
        }
    }
}

/// Sorts events into replay order and drops duplicate ids.
///
/// Replay order is timestamp ascending, then id ascending.
pub fn sort_for_replay(events: &mut Vec<StoredEvent>) {
    events.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then(a.id.cmp(&b.id)));
    events.dedup_by_key(|e| e.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str) -> PackageName {
        PackageName::new(name).unwrap()
    }

    #[test]
    fn foreground_event_serializes_tagged() {
        let event = TimelineEvent::ForegroundApp {
            package_name: Some(pkg("a")),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"foreground_app","package_name":"a"}"#);

        let none: TimelineEvent =
            serde_json::from_str(r#"{"type":"foreground_app","package_name":null}"#).unwrap();
        assert_eq!(none, TimelineEvent::ForegroundApp { package_name: None });
    }

    #[test]
    fn decision_parses_short_aliases() {
        assert_eq!(
            "snoozed".parse::<SuggestionDecision>().unwrap(),
            SuggestionDecision::SnoozedLater
        );
        assert_eq!(
            "disabled_this_session".parse::<SuggestionDecision>().unwrap(),
            SuggestionDecision::DisabledThisSession
        );
        assert!("maybe".parse::<SuggestionDecision>().is_err());
    }

    #[test]
    fn seed_keys_are_per_package_for_suggestions() {
        let shown_a = TimelineEvent::SuggestionShown {
            package_name: pkg("a"),
            suggestion_id: SuggestionId::new("1").unwrap(),
        };
        let shown_b = TimelineEvent::SuggestionShown {
            package_name: pkg("b"),
            suggestion_id: SuggestionId::new("1").unwrap(),
        };
        assert_ne!(shown_a.seed_key(), shown_b.seed_key());
        assert_eq!(
            TimelineEvent::ForegroundApp { package_name: None }.seed_key(),
            TimelineEvent::ForegroundApp {
                package_name: Some(pkg("a"))
            }
            .seed_key()
        );
    }

    #[test]
    fn backdated_end_takes_effect_at_occurred_time() {
        let end = |occurred_ms| StoredEvent {
            id: EventId::new(1),
            timestamp_ms: 500,
            event: TimelineEvent::SessionLifecycle {
                session_id: SessionId::new("s").unwrap(),
                package_name: pkg("a"),
                event: SessionEventType::End,
                occurred_ms,
            },
        };
        assert_eq!(end(None).occurred_ms(), 500);
        assert_eq!(end(Some(120)).occurred_ms(), 120);

        let plain = serde_json::to_string(&end(None).event).unwrap();
        assert!(!plain.contains("occurred_ms"));
        let parsed: TimelineEvent = serde_json::from_str(
            r#"{"type":"session_lifecycle","session_id":"s","package_name":"a","event":"end"}"#,
        )
        .unwrap();
        assert_eq!(parsed, end(None).event);
    }

    #[test]
    fn sort_for_replay_orders_by_timestamp_then_id() {
        let event = TimelineEvent::ForegroundApp { package_name: None };
        let mut events = vec![
            StoredEvent {
                id: EventId::new(3),
                timestamp_ms: 10,
                event: event.clone(),
            },
            StoredEvent {
                id: EventId::new(1),
                timestamp_ms: 20,
                event: event.clone(),
            },
            StoredEvent {
                id: EventId::new(2),
                timestamp_ms: 10,
                event: event.clone(),
            },
            StoredEvent {
                id: EventId::new(2),
                timestamp_ms: 10,
                event,
            },
        ];
        sort_for_replay(&mut events);
        let ids: Vec<i64> = events.iter().map(|e| e.id.value()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
