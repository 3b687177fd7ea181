//! Events command for listing the timeline.
//!
//! Text output is one line per event; `--json` emits JSONL for scripting.

use std::io::Write;

use anyhow::Result;
use ft_core::{EventId, StoredEvent, TimelineProjection};

use super::Context;
use super::util::{format_event_line, hours_to_ms};

pub fn run<W: Write>(writer: &mut W, context: &Context, hours: i64, json: bool) -> Result<()> {
    let now_ms = context.now_ms();
    let projection = TimelineProjection::new(context.store.clone());
    let events = projection.events_in_window(now_ms.saturating_sub(hours_to_ms(hours)), now_ms)?;
    if events.is_empty() && !json {
        writeln!(writer, "No events in the last {hours}h.")?;
        return Ok(());
    }
    write_events(writer, &events, json)?;
    Ok(())
}

/// Prints the window, then keeps printing events as they are appended.
///
/// Runs until the process is interrupted.
pub fn follow<W: Write>(writer: &mut W, context: &Context, hours: i64, json: bool) -> Result<()> {
    let start_ms = context.now_ms().saturating_sub(hours_to_ms(hours));
    let projection = TimelineProjection::new(context.store.clone());
    let mut observer = projection.observe(start_ms, i64::MAX);
    let mut last_printed: Option<EventId> = None;
    loop {
        if let Some(events) = observer.poll()? {
            let fresh: Vec<StoredEvent> = events
                .into_iter()
                .filter(|e| last_printed.is_none_or(|last| e.id > last))
                .collect();
            if let Some(newest) = fresh.iter().map(|e| e.id).max() {
                last_printed = Some(newest);
            }
            write_events(writer, &fresh, json)?;
            writer.flush()?;
        }
        std::thread::sleep(context.config.poll_interval());
    }
}

fn write_events<W: Write>(writer: &mut W, events: &[StoredEvent], json: bool) -> Result<()> {
    for event in events {
        if json {
            writeln!(writer, "{}", serde_json::to_string(event)?)?;
        } else {
            writeln!(writer, "{}", format_event_line(event))?;
        }
    }
    Ok(())
}
