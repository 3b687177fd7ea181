//! Shared utilities for CLI commands.

use anyhow::Context as _;
use chrono::{DateTime, SecondsFormat, Utc};
use ft_core::{PackageName, StoredEvent, TimelineEvent};

const MILLIS_PER_HOUR: i64 = 3_600_000;

pub const fn hours_to_ms(hours: i64) -> i64 {
    hours.saturating_mul(MILLIS_PER_HOUR)
}

/// Parses a package name argument.
pub fn parse_package(raw: &str) -> anyhow::Result<PackageName> {
    PackageName::new(raw).with_context(|| format!("invalid package name {raw:?}"))
}

/// Formats epoch milliseconds as RFC 3339 in UTC.
pub fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(
        || format!("{ms}ms"),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Formats a duration as `HH:MM:SS`.
pub fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1_000;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// One-line human description of an event.
pub fn describe_event(event: &TimelineEvent) -> String {
    match event {
        TimelineEvent::TargetAppsChanged { target_packages } => {
            format!("targets: {}", join_packages(target_packages.iter()))
        }
        TimelineEvent::ForegroundApp { package_name } => match package_name {
            Some(package) => format!("foreground: {package}"),
            None => "foreground: none".to_string(),
        },
        TimelineEvent::SuggestionShown {
            package_name,
            suggestion_id,
        } => format!("suggestion {suggestion_id} shown for {package_name}"),
        TimelineEvent::SuggestionDecision {
            package_name,
            suggestion_id,
            decision,
        } => format!("suggestion {suggestion_id} for {package_name}: {decision}"),
        TimelineEvent::SettingsChanged {
            key,
            old_value,
            new_value,
        } => format!(
            "setting {key}: {} -> {new_value}",
            old_value.as_deref().unwrap_or("unset")
        ),
        TimelineEvent::ServiceConfig { state, .. } => format!("service {state}"),
        TimelineEvent::SessionLifecycle {
            session_id,
            package_name,
            event,
            occurred_ms: None,
        } => format!("session {session_id} {event} ({package_name})"),
        TimelineEvent::SessionLifecycle {
            session_id,
            package_name,
            event,
            occurred_ms: Some(occurred_ms),
        } => format!(
            "session {session_id} {event} ({package_name}) as of {}",
            format_timestamp(*occurred_ms)
        ),
    }
}

/// Text line used by `ft events`.
pub fn format_event_line(stored: &StoredEvent) -> String {
    format!(
        "{}  #{:<4} {:<20} {}",
        format_timestamp(stored.timestamp_ms),
        stored.id.to_string(),
        stored.event.event_type().as_str(),
        describe_event(&stored.event)
    )
}

pub fn join_packages<'a>(packages: impl Iterator<Item = &'a PackageName>) -> String {
    let names: Vec<&str> = packages.map(PackageName::as_str).collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}
