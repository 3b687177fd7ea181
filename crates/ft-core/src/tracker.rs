//! The live session state machine.
//!
//! The tracker is `Idle` or `Tracking` one package. It advances on foreground
//! samples, pause/resume, and suggestion decisions, and appends a timeline
//! event for every transition. Elapsed time comes from the monotonic clock.
//!
//! The tracker is single-writer: callers must serialize every call.
//!
//! A failed append never rolls back a transition. Live state stays in memory,
//! the failure is logged and counted, and the outcome reports it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::bootstrap::{LiveSessionView, SessionBootstrapFromTimeline};
use crate::clock::Clock;
use crate::event::{StoredEvent, SuggestionDecision, TimelineEvent};
use crate::projection::OpenSession;
use crate::recorder::EventRecorder;
use crate::session::{SessionEvent, SessionEventType, calculate_duration_millis};
use crate::store::TimelineStore;
use crate::suggestion::SessionSuggestionGate;
use crate::types::{PackageName, SessionId, SuggestionId};

/// Errors from tracker operations that need a running session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no session is being tracked")]
    NotTracking,
}

/// One reading from the foreground-detection collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundSample {
    pub package_name: Option<PackageName>,
    /// Monotonically increasing; stale samples are dropped.
    pub generation: u64,
}

/// The session currently tracked. Times are monotonic milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSession {
    pub package_name: PackageName,
    pub session_id: SessionId,
    /// Shifted forward on resume, so `now - start` excludes paused time.
    pub session_start_elapsed_realtime: i64,
    pub paused_at: Option<i64>,
    pub gate: SessionSuggestionGate,
    pub foreground_since: i64,
    /// Set while a departure waits out the grace period.
    pub departed_at: Option<i64>,
}

impl TrackedSession {
    const fn elapsed_at(&self, now: i64) -> i64 {
        let until = match self.paused_at {
            Some(paused_at) => paused_at,
            None => now,
        };
        let elapsed = until - self.session_start_elapsed_realtime;
        if elapsed < 0 { 0 } else { elapsed }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrackerState {
    #[default]
    Idle,
    Tracking(TrackedSession),
}

/// Observable result of a tracker transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    TargetsChanged {
        target_packages: BTreeSet<PackageName>,
    },
    SessionStarted {
        package_name: PackageName,
        session_id: SessionId,
        restored: bool,
        initial_elapsed_millis: i64,
    },
    SessionEnded {
        package_name: PackageName,
        session_id: SessionId,
        elapsed_millis: i64,
    },
    DepartureStarted {
        package_name: PackageName,
    },
    DepartureCancelled {
        package_name: PackageName,
    },
    Paused {
        package_name: PackageName,
    },
    Resumed {
        package_name: PackageName,
    },
    SuggestionShown {
        package_name: PackageName,
        suggestion_id: SuggestionId,
    },
    DecisionRecorded {
        package_name: PackageName,
        decision: SuggestionDecision,
        elapsed_millis: i64,
    },
}

/// What a single tracker call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerOutcome {
    pub transitions: Vec<Transition>,
    /// Appends that failed during this call.
    pub append_failures: usize,
    /// The input was a stale sample and was dropped.
    pub stale: bool,
}

impl TrackerOutcome {
    /// Folds a later call's outcome into this one.
    pub fn merge(&mut self, later: Self) {
        self.transitions.extend(later.transitions);
        self.append_failures += later.append_failures;
        self.stale |= later.stale;
    }
}

/// Live, in-memory session tracker.
pub struct OverlaySessionTracker {
    recorder: EventRecorder,
    clock: Arc<dyn Clock>,
    grace_period_millis: i64,
    targets: BTreeSet<PackageName>,
    state: TrackerState,
    last_generation: Option<u64>,
    /// Foreground value last written to the timeline.
    recorded_foreground: Option<Option<PackageName>>,
    append_failures: u64,
}

impl OverlaySessionTracker {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        grace_period_millis: i64,
    ) -> Self {
        Self {
            recorder: EventRecorder::new(store, Arc::clone(&clock)),
            clock,
            grace_period_millis,
            targets: BTreeSet::new(),
            state: TrackerState::Idle,
            last_generation: None,
            recorded_foreground: None,
            append_failures: 0,
        }
    }

    /// Seeds what the timeline already says, without appending anything.
    pub fn prime(
        &mut self,
        targets: BTreeSet<PackageName>,
        recorded_foreground: Option<PackageName>,
    ) {
        self.targets = targets;
        self.recorded_foreground = Some(recorded_foreground);
    }

    pub const fn state(&self) -> &TrackerState {
        &self.state
    }

    pub const fn targets(&self) -> &BTreeSet<PackageName> {
        &self.targets
    }

    /// Total appends that have failed since construction.
    pub const fn append_failures(&self) -> u64 {
        self.append_failures
    }

    pub fn session(&self) -> Option<&TrackedSession> {
        match &self.state {
            TrackerState::Tracking(session) => Some(session),
            TrackerState::Idle => None,
        }
    }

    /// Active elapsed time of the tracked session.
    pub fn elapsed_millis(&self) -> Option<i64> {
        let now = self.clock.monotonic_millis();
        self.session().map(|s| s.elapsed_at(now))
    }

    /// Time since the tracked package last arrived in the foreground.
    pub fn since_foreground_millis(&self) -> Option<i64> {
        let now = self.clock.monotonic_millis();
        self.session()
            .map(|s| now.saturating_sub(s.foreground_since).max(0))
    }

    fn is_stale(&self, sample: &ForegroundSample) -> bool {
        self.last_generation
            .is_some_and(|last| sample.generation <= last)
    }

    /// The package a sample would start tracking, if it needs a bootstrap.
    pub fn needs_bootstrap<'a>(&self, sample: &'a ForegroundSample) -> Option<&'a PackageName> {
        if self.is_stale(sample) {
            return None;
        }
        let package = sample.package_name.as_ref()?;
        if !self.targets.contains(package) {
            return None;
        }
        match &self.state {
            TrackerState::Tracking(session) if session.package_name == *package => None,
            _ => Some(package),
        }
    }

    /// Replaces the monitored package set.
    pub fn set_targets(&mut self, targets: BTreeSet<PackageName>) -> TrackerOutcome {
        let mut outcome = TrackerOutcome::default();
        if targets == self.targets {
            return outcome;
        }
        self.targets = targets;
        self.append(
            TimelineEvent::TargetAppsChanged {
                target_packages: self.targets.clone(),
            },
            &mut outcome,
        );
        outcome.transitions.push(Transition::TargetsChanged {
            target_packages: self.targets.clone(),
        });
        outcome
    }

    /// Applies a foreground sample.
    ///
    /// `bootstrap` restores a session interrupted by a restart; it is only
    /// consulted when the sample starts tracking a package.
    pub fn on_foreground_sample(
        &mut self,
        sample: ForegroundSample,
        bootstrap: Option<&SessionBootstrapFromTimeline>,
    ) -> TrackerOutcome {
        if self.is_stale(&sample) {
            tracing::debug!(
                generation = sample.generation,
                last = ?self.last_generation,
                "dropping stale foreground sample"
            );
            return TrackerOutcome {
                stale: true,
                ..TrackerOutcome::default()
            };
        }
        self.last_generation = Some(sample.generation);

        let mut outcome = self.tick();
        let now = self.clock.monotonic_millis();
        let monitored = sample
            .package_name
            .filter(|package| self.targets.contains(package));
        match monitored {
            Some(package) => self.arrive(package, bootstrap, now, &mut outcome),
            None => self.depart(now, &mut outcome),
        }
        outcome
    }

    /// Ends the session once a pending departure has outlasted the grace period.
    pub fn tick(&mut self) -> TrackerOutcome {
        let mut outcome = TrackerOutcome::default();
        let now = self.clock.monotonic_millis();
        let expired = self
            .session()
            .and_then(|s| s.departed_at)
            .is_some_and(|departed_at| now.saturating_sub(departed_at) >= self.grace_period_millis);
        if expired {
            self.end_session(now, &mut outcome);
        }
        outcome
    }

    pub fn pause(&mut self) -> Result<TrackerOutcome, TrackerError> {
        let now = self.clock.monotonic_millis();
        let mut outcome = TrackerOutcome::default();
        let TrackerState::Tracking(session) = &mut self.state else {
            return Err(TrackerError::NotTracking);
        };
        if session.paused_at.is_some() {
            return Ok(outcome);
        }
        session.paused_at = Some(now);
        let package_name = session.package_name.clone();
        let session_id = session.session_id.clone();
        self.append_lifecycle(
            session_id,
            package_name.clone(),
            SessionEventType::Pause,
            &mut outcome,
        );
        outcome.transitions.push(Transition::Paused { package_name });
        Ok(outcome)
    }

    pub fn resume(&mut self) -> Result<TrackerOutcome, TrackerError> {
        let now = self.clock.monotonic_millis();
        let mut outcome = TrackerOutcome::default();
        let TrackerState::Tracking(session) = &mut self.state else {
            return Err(TrackerError::NotTracking);
        };
        let Some(paused_at) = session.paused_at.take() else {
            return Ok(outcome);
        };
        session.session_start_elapsed_realtime += now.saturating_sub(paused_at).max(0);
        let package_name = session.package_name.clone();
        let session_id = session.session_id.clone();
        self.append_lifecycle(
            session_id,
            package_name.clone(),
            SessionEventType::Resume,
            &mut outcome,
        );
        outcome.transitions.push(Transition::Resumed { package_name });
        Ok(outcome)
    }

    pub fn record_suggestion_shown(
        &mut self,
        suggestion_id: SuggestionId,
    ) -> Result<TrackerOutcome, TrackerError> {
        let mut outcome = TrackerOutcome::default();
        let package_name = self
            .session()
            .map(|s| s.package_name.clone())
            .ok_or(TrackerError::NotTracking)?;
        self.append(
            TimelineEvent::SuggestionShown {
                package_name: package_name.clone(),
                suggestion_id: suggestion_id.clone(),
            },
            &mut outcome,
        );
        outcome.transitions.push(Transition::SuggestionShown {
            package_name,
            suggestion_id,
        });
        Ok(outcome)
    }

    /// Records a decision and restarts the cooldown from the current elapsed time.
    pub fn record_decision(
        &mut self,
        suggestion_id: SuggestionId,
        decision: SuggestionDecision,
    ) -> Result<TrackerOutcome, TrackerError> {
        let now = self.clock.monotonic_millis();
        let mut outcome = TrackerOutcome::default();
        let TrackerState::Tracking(session) = &mut self.state else {
            return Err(TrackerError::NotTracking);
        };
        let elapsed_millis = session.elapsed_at(now);
        session.gate.last_decision_elapsed_millis = Some(elapsed_millis);
        let package_name = session.package_name.clone();
        self.append(
            TimelineEvent::SuggestionDecision {
                package_name: package_name.clone(),
                suggestion_id,
                decision,
            },
            &mut outcome,
        );
        outcome.transitions.push(Transition::DecisionRecorded {
            package_name,
            decision,
            elapsed_millis,
        });
        Ok(outcome)
    }

    /// Ends a session an earlier run left open, as of `ended_at_ms`.
    ///
    /// The `End` marker is stamped now and carries `ended_at_ms` as the time
    /// the session actually stopped.
    pub fn close_abandoned(&mut self, session: &OpenSession, ended_at_ms: i64) -> TrackerOutcome {
        let mut outcome = TrackerOutcome::default();
        let ended_at_ms = ended_at_ms.max(session.last_marker_ms());
        let mut lifecycle = session.lifecycle.clone();
        lifecycle.push(SessionEvent::new(SessionEventType::End, ended_at_ms));
        let elapsed_millis = calculate_duration_millis(&lifecycle, ended_at_ms);
        tracing::info!(
            package = %session.package_name,
            session_id = %session.session_id,
            ended_at_ms,
            elapsed_millis,
            "closed session left open by an earlier run"
        );
        self.append(
            TimelineEvent::SessionLifecycle {
                session_id: session.session_id.clone(),
                package_name: session.package_name.clone(),
                event: SessionEventType::End,
                occurred_ms: Some(ended_at_ms),
            },
            &mut outcome,
        );
        outcome.transitions.push(Transition::SessionEnded {
            package_name: session.package_name.clone(),
            session_id: session.session_id.clone(),
            elapsed_millis,
        });
        outcome
    }

    /// Appends an audit event through the shared write path, best effort.
    pub fn record_audit(&mut self, event: TimelineEvent) -> Option<StoredEvent> {
        let stored = self.recorder.record_best_effort(event);
        if stored.is_none() {
            self.append_failures += 1;
        }
        stored
    }

    fn arrive(
        &mut self,
        package: PackageName,
        bootstrap: Option<&SessionBootstrapFromTimeline>,
        now: i64,
        outcome: &mut TrackerOutcome,
    ) {
        if let TrackerState::Tracking(session) = &mut self.state {
            if session.package_name == package {
                if session.departed_at.take().is_some() {
                    session.foreground_since = now;
                    outcome
                        .transitions
                        .push(Transition::DepartureCancelled {
                            package_name: package.clone(),
                        });
                }
                self.record_foreground(Some(package), outcome);
                return;
            }
            self.end_session(now, outcome);
        }
        self.record_foreground(Some(package.clone()), outcome);
        self.start_session(package, bootstrap, now, outcome);
    }

    fn depart(&mut self, now: i64, outcome: &mut TrackerOutcome) {
        self.record_foreground(None, outcome);
        let TrackerState::Tracking(session) = &mut self.state else {
            return;
        };
        if session.departed_at.is_some() {
            return;
        }
        session.departed_at = Some(now);
        outcome.transitions.push(Transition::DepartureStarted {
            package_name: session.package_name.clone(),
        });
        if self.grace_period_millis <= 0 {
            self.end_session(now, outcome);
        }
    }

    fn start_session(
        &mut self,
        package: PackageName,
        bootstrap: Option<&SessionBootstrapFromTimeline>,
        now: i64,
        outcome: &mut TrackerOutcome,
    ) {
        let restored = bootstrap.filter(|b| b.is_ongoing_session);
        let (session_id, needs_start_marker) = match restored.and_then(|b| b.session_id.clone()) {
            Some(id) => (id, false),
            None => (SessionId::generate(), true),
        };
        let initial_elapsed_millis = restored.map_or(0, |b| b.initial_elapsed_millis.max(0));
        let session = TrackedSession {
            package_name: package.clone(),
            session_id: session_id.clone(),
            session_start_elapsed_realtime: now - initial_elapsed_millis,
            paused_at: restored.filter(|b| b.is_paused).map(|_| now),
            gate: restored.map(|b| b.gate).unwrap_or_default(),
            foreground_since: now - restored.map_or(0, |b| b.since_foreground_millis.max(0)),
            departed_at: None,
        };
        tracing::info!(
            %package,
            %session_id,
            restored = restored.is_some(),
            initial_elapsed_millis,
            "session started"
        );
        self.state = TrackerState::Tracking(session);
        if needs_start_marker {
            self.append_lifecycle(
                session_id.clone(),
                package.clone(),
                SessionEventType::Start,
                outcome,
            );
        }
        outcome.transitions.push(Transition::SessionStarted {
            package_name: package,
            session_id,
            restored: restored.is_some(),
            initial_elapsed_millis,
        });
    }

    fn end_session(&mut self, now: i64, outcome: &mut TrackerOutcome) {
        let TrackerState::Tracking(session) = std::mem::take(&mut self.state) else {
            return;
        };
        let elapsed_millis = session.elapsed_at(now);
        tracing::info!(
            package = %session.package_name,
            session_id = %session.session_id,
            elapsed_millis,
            "session ended"
        );
        self.append_lifecycle(
            session.session_id.clone(),
            session.package_name.clone(),
            SessionEventType::End,
            outcome,
        );
        outcome.transitions.push(Transition::SessionEnded {
            package_name: session.package_name,
            session_id: session.session_id,
            elapsed_millis,
        });
    }

    fn record_foreground(
        &mut self,
        package_name: Option<PackageName>,
        outcome: &mut TrackerOutcome,
    ) {
        if self.recorded_foreground.as_ref() == Some(&package_name) {
            return;
        }
        self.append(
            TimelineEvent::ForegroundApp {
                package_name: package_name.clone(),
            },
            outcome,
        );
        self.recorded_foreground = Some(package_name);
    }

    fn append_lifecycle(
        &mut self,
        session_id: SessionId,
        package_name: PackageName,
        event: SessionEventType,
        outcome: &mut TrackerOutcome,
    ) {
        self.append(
            TimelineEvent::SessionLifecycle {
                session_id,
                package_name,
                event,
                occurred_ms: None,
            },
            outcome,
        );
    }

    fn append(&mut self, event: TimelineEvent, outcome: &mut TrackerOutcome) {
        if self.recorder.record_best_effort(event).is_none() {
            self.append_failures += 1;
            outcome.append_failures += 1;
        }
    }
}

impl LiveSessionView for OverlaySessionTracker {
    /// Serves the tracked session as a snapshot; `now_ms` is ignored in favour
    /// of the monotonic clock.
    fn live_bootstrap(
        &self,
        package: &PackageName,
        _now_ms: i64,
    ) -> Option<SessionBootstrapFromTimeline> {
        let now = self.clock.monotonic_millis();
        let session = self.session()?;
        if session.package_name != *package || session.departed_at.is_some() {
            return None;
        }
        Some(SessionBootstrapFromTimeline {
            initial_elapsed_millis: session.elapsed_at(now),
            is_ongoing_session: true,
            gate: session.gate,
            session_id: Some(session.session_id.clone()),
            is_paused: session.paused_at.is_some(),
            since_foreground_millis: now.saturating_sub(session.foreground_since).max(0),
        })
    }
}
