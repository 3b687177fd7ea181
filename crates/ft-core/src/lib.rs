//! Core domain logic for focus session tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Timeline events: the append-only log every other state is derived from
//! - Session durations: active time from start/pause/resume/end markers
//! - Suggestion gating: when a proactive suggestion may interrupt a session
//! - Bootstrap: restart-safe reconstruction of a session from the timeline
//! - Live tracking: the foreground-driven session state machine

pub mod bootstrap;
pub mod clock;
pub mod event;
pub mod event_type;
pub mod monitor;
pub mod projection;
mod recorder;
pub mod session;
pub mod settings;
pub mod store;
pub mod suggestion;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testing;

pub use bootstrap::{
    BootstrapError, LiveSessionView, NoLiveSession, SessionBootstrapFromTimeline,
    SessionBootstrapper,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{ServiceState, StoredEvent, SuggestionDecision, TimelineEvent};
pub use event_type::{EventType, UnknownEventType};
pub use monitor::{MonitorCommand, MonitorError, SessionMonitor};
pub use projection::{
    OpenSession, SessionSummary, TimelineFacts, TimelineObserver, TimelineProjection,
};
pub use recorder::EventRecorder;
pub use session::{SessionEvent, SessionEventType, calculate_duration_millis};
pub use settings::SessionSettings;
pub use store::{InMemoryTimelineStore, StoreError, TimelineStore};
pub use suggestion::{SessionSuggestionGate, SuggestionInput, SuggestionVerdict, should_show};
pub use tracker::{
    ForegroundSample, OverlaySessionTracker, TrackerError, TrackerOutcome, TrackerState,
    Transition,
};
pub use types::{EventId, PackageName, SessionId, SuggestionId, ValidationError};
