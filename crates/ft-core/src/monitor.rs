//! Orchestrates the tracker, the bootstrapper and the suggestion engine.
//!
//! `SessionMonitor` is the single consumer of monitor commands. Every command
//! is applied to completion before the next one, so the tracker never sees
//! concurrent calls.
//!
//! Sessions a previous run left open (killed before it could write `End`) are
//! picked up on start. Each one is either resumed, when its package comes back
//! and the bootstrap bridges to it, or closed once its package has been away
//! for the grace period. The `End` is backdated to when that grace period ran
//! out, where a live tracker would have written it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use crate::bootstrap::{BootstrapError, SessionBootstrapFromTimeline, SessionBootstrapper};
use crate::clock::Clock;
use crate::event::{ServiceState, SuggestionDecision, TimelineEvent};
use crate::projection::{OpenSession, TimelineProjection};
use crate::settings::SessionSettings;
use crate::store::{StoreError, TimelineStore};
use crate::suggestion::{SuggestionInput, SuggestionVerdict, evaluate};
use crate::tracker::{
    ForegroundSample, OverlaySessionTracker, TrackerError, TrackerOutcome, TrackerState,
    Transition,
};
use crate::types::{PackageName, SuggestionId};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("failed to load timeline state")]
    Load(#[from] StoreError),

    #[error("no suggestion is on screen")]
    NoSuggestion,
}

/// Input to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    Sample(ForegroundSample),
    Pause,
    Resume,
    Decide(SuggestionDecision),
    SetTargets(BTreeSet<PackageName>),
    Tick,
}

/// Live session monitor over one timeline.
pub struct SessionMonitor {
    tracker: OverlaySessionTracker,
    bootstrapper: SessionBootstrapper,
    projection: TimelineProjection,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    overlay: Option<SuggestionId>,
    /// Open sessions found on start that are neither resumed nor closed yet.
    abandoned: Vec<OpenSession>,
    started: bool,
}

impl SessionMonitor {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
        lookback_hours: i64,
    ) -> Self {
        Self {
            tracker: OverlaySessionTracker::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                settings.grace_period_millis,
            ),
            bootstrapper: SessionBootstrapper::new(Arc::clone(&store), lookback_hours),
            projection: TimelineProjection::new(store),
            clock,
            settings,
            overlay: None,
            abandoned: Vec::new(),
            started: false,
        }
    }

    pub const fn tracker(&self) -> &OverlaySessionTracker {
        &self.tracker
    }

    /// Suggestion currently on screen.
    pub const fn overlay(&self) -> Option<&SuggestionId> {
        self.overlay.as_ref()
    }

    /// Loads targets and foreground from the timeline and records the
    /// effective settings. Idempotent.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.started {
            return Ok(());
        }
        let now_ms = self.clock.wall_millis();
        let facts = self.projection.facts_at(now_ms, 0)?;
        let targets = facts.target_packages.clone().unwrap_or_default();
        let foreground = facts.foreground_package().cloned();
        self.abandoned = self.projection.open_sessions(now_ms)?;
        tracing::info!(
            targets = targets.len(),
            foreground = ?foreground,
            open_sessions = self.abandoned.len(),
            "session monitor starting"
        );
        self.tracker.prime(targets, foreground);

        let entries = self.settings.to_entries();
        for (key, old_value, new_value) in settings_changes(&facts.settings, &entries) {
            self.tracker.record_audit(TimelineEvent::SettingsChanged {
                key,
                old_value,
                new_value,
            });
        }
        self.record_service_state(ServiceState::Started);
        self.started = true;
        let mut outcome = TrackerOutcome::default();
        self.settle_abandoned(now_ms, &mut outcome);
        Ok(())
    }

    /// Records that the monitor stopped. Idempotent.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        self.record_service_state(ServiceState::Stopped);
        tracing::info!(
            append_failures = self.tracker.append_failures(),
            "session monitor stopped"
        );
    }

    /// Applies one command and then re-evaluates suggestions.
    pub fn handle(&mut self, command: MonitorCommand) -> Result<TrackerOutcome, MonitorError> {
        let mut outcome = match command {
            MonitorCommand::Sample(sample) => self.on_sample(sample)?,
            MonitorCommand::Pause => self.tracker.pause()?,
            MonitorCommand::Resume => self.tracker.resume()?,
            MonitorCommand::Decide(decision) => {
                let suggestion_id = self.overlay.take().ok_or(MonitorError::NoSuggestion)?;
                self.tracker.record_decision(suggestion_id, decision)?
            }
            MonitorCommand::SetTargets(targets) => self.tracker.set_targets(targets),
            MonitorCommand::Tick => self.tracker.tick(),
        };
        if outcome
            .transitions
            .iter()
            .any(|t| matches!(t, Transition::SessionEnded { .. }))
        {
            self.overlay = None;
        }
        self.settle_abandoned(self.clock.wall_millis(), &mut outcome);
        self.maybe_suggest(&mut outcome);
        Ok(outcome)
    }

    fn on_sample(&mut self, sample: ForegroundSample) -> Result<TrackerOutcome, MonitorError> {
        let now_ms = self.clock.wall_millis();
        let mut outcome = TrackerOutcome::default();
        let snapshot = match self.tracker.needs_bootstrap(&sample) {
            Some(package) => {
                let snapshot = self.bootstrapper.compute_bootstrap_on_arrival(
                    package,
                    &self.settings,
                    now_ms,
                    false,
                    &self.tracker,
                )?;
                self.close_superseded(package, snapshot.as_ref(), now_ms, &mut outcome);
                snapshot
            }
            None => None,
        };
        let sampled = sample.package_name.clone();
        let applied = self.tracker.on_foreground_sample(sample, snapshot.as_ref());
        if !applied.stale {
            self.note_departures(sampled.as_ref(), now_ms);
        }
        outcome.merge(applied);
        Ok(outcome)
    }

    /// Closes the open session of `package` that the arriving run does not
    /// continue, before a new session for the package starts.
    fn close_superseded(
        &mut self,
        package: &PackageName,
        snapshot: Option<&SessionBootstrapFromTimeline>,
        now_ms: i64,
        outcome: &mut TrackerOutcome,
    ) {
        let resumed = snapshot
            .filter(|s| s.is_ongoing_session)
            .and_then(|s| s.session_id.as_ref());
        let Some(idx) = self.abandoned.iter().position(|open| {
            open.package_name == *package && Some(&open.session_id) != resumed
        }) else {
            return;
        };
        let open = self.abandoned.remove(idx);
        let grace = self.settings.grace_period_millis;
        let ended_at_ms = open
            .departed_ms
            .map_or(now_ms, |departed_ms| departed_ms.saturating_add(grace).min(now_ms));
        outcome.merge(self.tracker.close_abandoned(&open, ended_at_ms));
    }

    /// Starts the grace period of open sessions whose package the sample shows
    /// is not in front.
    fn note_departures(&mut self, sampled: Option<&PackageName>, now_ms: i64) {
        let targets = self.tracker.targets();
        for open in &mut self.abandoned {
            let present =
                sampled == Some(&open.package_name) && targets.contains(&open.package_name);
            if !present && open.departed_ms.is_none() {
                open.departed_ms = Some(now_ms);
            }
        }
    }

    /// Drops open sessions the tracker resumed and closes those whose package
    /// has been away for the grace period.
    fn settle_abandoned(&mut self, now_ms: i64, outcome: &mut TrackerOutcome) {
        let tracked = self.tracker.session().map(|s| s.session_id.clone());
        let grace = self.settings.grace_period_millis;
        let mut expired = Vec::new();
        self.abandoned.retain(|open| {
            if tracked.as_ref() == Some(&open.session_id) {
                tracing::debug!(session_id = %open.session_id, "open session resumed");
                return false;
            }
            match open.departed_ms {
                Some(departed_ms) if now_ms.saturating_sub(departed_ms) >= grace => {
                    expired.push((open.clone(), departed_ms.saturating_add(grace)));
                    false
                }
                _ => true,
            }
        });
        for (open, ended_at_ms) in expired {
            outcome.merge(self.tracker.close_abandoned(&open, ended_at_ms));
        }
    }

    /// Which gating rule currently decides, if a session is tracked.
    pub fn verdict(&self) -> Option<SuggestionVerdict> {
        let TrackerState::Tracking(session) = self.tracker.state() else {
            return None;
        };
        if session.departed_at.is_some() || session.paused_at.is_some() {
            return None;
        }
        let input = SuggestionInput {
            elapsed_millis: self.tracker.elapsed_millis()?,
            since_foreground_millis: self.tracker.since_foreground_millis()?,
            settings: &self.settings,
            last_decision_elapsed_millis: session.gate.last_decision_elapsed_millis,
            is_overlay_shown: self.overlay.is_some(),
        };
        Some(evaluate(&input))
    }

    fn maybe_suggest(&mut self, outcome: &mut TrackerOutcome) {
        if self.verdict() != Some(SuggestionVerdict::Show) {
            return;
        }
        let suggestion_id = SuggestionId::generate();
        match self.tracker.record_suggestion_shown(suggestion_id.clone()) {
            Ok(shown) => {
                tracing::info!(%suggestion_id, "showing suggestion");
                outcome.merge(shown);
                self.overlay = Some(suggestion_id);
            }
            Err(err) => tracing::warn!(error = %err, "could not show suggestion"),
        }
    }

    fn record_service_state(&mut self, state: ServiceState) {
        let config = self
            .settings
            .to_entries()
            .into_iter()
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect::<serde_json::Map<_, _>>()
            .into();
        self.tracker
            .record_audit(TimelineEvent::ServiceConfig { config, state });
    }
}

/// `(key, old, new)` for every setting whose value differs from the timeline.
fn settings_changes(
    recorded: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
) -> Vec<(String, Option<String>, String)> {
    current
        .iter()
        .filter(|(key, value)| recorded.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), recorded.get(key).cloned(), value.clone()))
        .collect()
}
