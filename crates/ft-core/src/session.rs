//! Session lifecycle events and active-duration calculation.
//!
//! A session's lifecycle is a time-ordered list of [`SessionEvent`]s. The
//! calculator folds that list into [`ActiveSegment`]s: maximal intervals during
//! which the session was running and not paused.
//!
//! Logs written by older versions can hold sequences the tracker no longer
//! produces. An unmatched `Pause`/`Resume`/`End` is a no-op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// Kind of a session lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    Start,
    Pause,
    Resume,
    SuggestionShown,
    End,
}

impl SessionEventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::SuggestionShown => "suggestion_shown",
            Self::End => "end",
        }
    }
}

impl fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionEventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "suggestion_shown" => Ok(Self::SuggestionShown),
            "end" => Ok(Self::End),
            _ => Err(ValidationError::InvalidSessionEventType {
                value: s.to_string(),
            }),
        }
    }
}

/// A single lifecycle event of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_type: SessionEventType,
    pub timestamp_ms: i64,
}

impl SessionEvent {
    #[must_use]
    pub const fn new(event_type: SessionEventType, timestamp_ms: i64) -> Self {
        Self {
            event_type,
            timestamp_ms,
        }
    }
}

/// A maximal interval of active (non-paused) time within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSegment {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl ActiveSegment {
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Builds the active segments of a single session.
///
/// Events must belong to one session and be ordered by timestamp. A session
/// with neither a closing `End` nor a trailing `Pause` is still running, so its
/// last segment closes at `now_ms`.
pub fn build_active_segments(events: &[SessionEvent], now_ms: i64) -> Vec<ActiveSegment> {
    let mut segments = Vec::new();
    let mut segment_start: Option<i64> = None;
    let mut ended = false;

    for event in events {
        if ended {
            break;
        }
        match event.event_type {
            SessionEventType::Start | SessionEventType::Resume => {
                if segment_start.is_none() {
                    segment_start = Some(event.timestamp_ms);
                }
            }
            SessionEventType::Pause | SessionEventType::End => {
                if let Some(start) = segment_start.take() {
                    segments.push(ActiveSegment {
                        start_ms: start,
                        end_ms: event.timestamp_ms.max(start),
                    });
                }
                ended = event.event_type == SessionEventType::End;
            }
            SessionEventType::SuggestionShown => {}
        }
    }

    if let Some(start) = segment_start {
        segments.push(ActiveSegment {
            start_ms: start,
            end_ms: now_ms.max(start),
        });
    }

    segments
}

/// Total active duration of a single session in milliseconds.
pub fn calculate_duration_millis(events: &[SessionEvent], now_ms: i64) -> i64 {
    build_active_segments(events, now_ms)
        .iter()
        .map(ActiveSegment::duration_ms)
        .sum()
}

/// Whether the lifecycle ends in an unmatched `Pause`.
pub fn is_paused(events: &[SessionEvent]) -> bool {
    events
        .iter()
        .rev()
        .find(|e| e.event_type != SessionEventType::SuggestionShown)
        .is_some_and(|e| e.event_type == SessionEventType::Pause)
}
