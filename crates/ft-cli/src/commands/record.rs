//! Record commands for appending single events by hand.
//!
//! These feed the timeline the same way the live monitor does, so external
//! collaborators (an overlay, a shell hook) can report what they observed.

use std::io::Write;

use anyhow::{Context as _, Result};
use ft_core::{EventRecorder, StoredEvent, SuggestionDecision, SuggestionId, TimelineEvent};

use super::Context;
use super::util::{format_event_line, parse_package};

/// Records the foreground app; `None` means nothing monitored is in front.
pub fn foreground<W: Write>(
    writer: &mut W,
    context: &Context,
    package: Option<&str>,
) -> Result<()> {
    let package_name = package.map(parse_package).transpose()?;
    let stored = record(context, TimelineEvent::ForegroundApp { package_name })?;
    writeln!(writer, "{}", format_event_line(&stored))?;
    Ok(())
}

/// Records that a suggestion was put on screen.
pub fn shown<W: Write>(writer: &mut W, context: &Context, package: &str, id: &str) -> Result<()> {
    let event = TimelineEvent::SuggestionShown {
        package_name: parse_package(package)?,
        suggestion_id: parse_suggestion_id(id)?,
    };
    let stored = record(context, event)?;
    writeln!(writer, "{}", format_event_line(&stored))?;
    Ok(())
}

/// Records the user's decision on a suggestion.
pub fn decision<W: Write>(
    writer: &mut W,
    context: &Context,
    package: &str,
    id: &str,
    decision: &str,
) -> Result<()> {
    let decision: SuggestionDecision = decision
        .parse()
        .with_context(|| format!("invalid decision {decision:?}"))?;
    let event = TimelineEvent::SuggestionDecision {
        package_name: parse_package(package)?,
        suggestion_id: parse_suggestion_id(id)?,
        decision,
    };
    let stored = record(context, event)?;
    writeln!(writer, "{}", format_event_line(&stored))?;
    Ok(())
}

fn parse_suggestion_id(raw: &str) -> Result<SuggestionId> {
    SuggestionId::new(raw).with_context(|| format!("invalid suggestion id {raw:?}"))
}

fn record(context: &Context, event: TimelineEvent) -> Result<StoredEvent> {
    let mut recorder = EventRecorder::new(context.store.clone(), context.clock.clone());
    let stored = recorder
        .record(event)
        .context("failed to append event to the timeline")?;
    tracing::debug!(id = %stored.id, "recorded event from command line");
    Ok(stored)
}
