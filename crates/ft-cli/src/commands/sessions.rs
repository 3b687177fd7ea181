//! Sessions command: sessions in a window with their active time.

use std::io::Write;

use anyhow::Result;
use ft_core::{SessionSummary, TimelineProjection};

use super::Context;
use super::util::{format_duration, format_timestamp, hours_to_ms, parse_package};

pub fn run<W: Write>(
    writer: &mut W,
    context: &Context,
    package: Option<&str>,
    hours: i64,
    at: Option<i64>,
) -> Result<()> {
    let package = package.map(parse_package).transpose()?;
    let at_ms = at.unwrap_or_else(|| context.now_ms());
    let projection = TimelineProjection::new(context.store.clone());
    let sessions: Vec<SessionSummary> = projection
        .sessions(at_ms.saturating_sub(hours_to_ms(hours)), at_ms, at_ms)?
        .into_iter()
        .filter(|s| package.as_ref().is_none_or(|p| s.package_name == *p))
        .collect();

    if sessions.is_empty() {
        writeln!(writer, "No sessions in the last {hours}h.")?;
        return Ok(());
    }

    let total: i64 = sessions.iter().map(|s| s.active_ms).sum();
    for session in &sessions {
        writeln!(writer, "{}", format_session(session))?;
    }
    writeln!(
        writer,
        "{} session(s), {} active",
        sessions.len(),
        format_duration(total)
    )?;
    Ok(())
}

fn format_session(session: &SessionSummary) -> String {
    let state = if session.end_ms.is_some() {
        "ended"
    } else if session.paused {
        "paused"
    } else {
        "ongoing"
    };
    format!(
        "{}  {}  {}  active {}  segments {}  suggestions {}  {state}",
        session.package_name,
        session.session_id,
        format_timestamp(session.start_ms),
        format_duration(session.active_ms),
        session.segments.len(),
        session.suggestions_shown,
    )
}
