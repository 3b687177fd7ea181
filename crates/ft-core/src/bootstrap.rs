//! Restart-safe reconstruction of a package's session state.
//!
//! The bootstrapper answers "what is the state of the session for package P
//! right now" from the timeline alone:
//!
//! - A session is ongoing iff the newest foreground event names P.
//! - The run started at the earliest arrival of P reachable by walking back
//!   over repeated arrivals of P and over departures shorter than the grace
//!   period. A switch to another package always ends the walk.
//! - A package arriving now is placed at the end of that walk, so a restart
//!   during a pending departure still bridges back to the earlier run.
//! - Elapsed time excludes paused intervals recorded by the live tracker.
//! - The suggestion gate only considers decisions made during the run.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::event::{StoredEvent, TimelineEvent};
use crate::projection::{TimelineFacts, TimelineProjection};
use crate::session::{SessionEvent, SessionEventType, calculate_duration_millis, is_paused};
use crate::settings::SessionSettings;
use crate::store::{StoreError, TimelineStore};
use crate::suggestion::SessionSuggestionGate;
use crate::types::{PackageName, SessionId};

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Errors from a bootstrap attempt.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The timeline could not be read; no state was assumed.
    #[error("failed to read timeline for bootstrap")]
    Read(#[from] StoreError),
}

/// Reconstructed starting point for a live tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionBootstrapFromTimeline {
    pub initial_elapsed_millis: i64,
    pub is_ongoing_session: bool,
    pub gate: SessionSuggestionGate,
    /// Session whose lifecycle markers belong to the current run, if any.
    pub session_id: Option<SessionId>,
    /// Whether the run's lifecycle ends in an unmatched pause.
    pub is_paused: bool,
    /// Time since the package last arrived in the foreground.
    pub since_foreground_millis: i64,
}

impl SessionBootstrapFromTimeline {
    /// Snapshot for a package whose session is not running.
    pub const fn not_ongoing() -> Self {
        Self {
            initial_elapsed_millis: 0,
            is_ongoing_session: false,
            gate: SessionSuggestionGate {
                last_decision_elapsed_millis: None,
            },
            session_id: None,
            is_paused: false,
            since_foreground_millis: 0,
        }
    }
}

/// Live state a caller may already hold for a package.
///
/// Lets the bootstrapper skip the store read when `force` is false.
pub trait LiveSessionView {
    fn live_bootstrap(
        &self,
        package: &PackageName,
        now_ms: i64,
    ) -> Option<SessionBootstrapFromTimeline>;
}

/// A view with no live state, for cold starts and read-only callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiveSession;

impl LiveSessionView for NoLiveSession {
    fn live_bootstrap(&self, _: &PackageName, _: i64) -> Option<SessionBootstrapFromTimeline> {
        None
    }
}

/// Reconstructs session snapshots from the timeline.
#[derive(Clone)]
pub struct SessionBootstrapper {
    projection: TimelineProjection,
    lookback_ms: i64,
}

impl SessionBootstrapper {
    pub fn new(store: Arc<dyn TimelineStore>, lookback_hours: i64) -> Self {
        Self {
            projection: TimelineProjection::new(store),
            lookback_ms: lookback_hours.saturating_mul(MILLIS_PER_HOUR),
        }
    }

    /// Computes the session state of `package` at `now_ms`.
    ///
    /// Returns `Ok(None)` when the package was never a target in the queried
    /// window. With `force == false` a live snapshot from `tracker` is reused
    /// when available; both paths describe the same state.
    pub fn compute_bootstrap_from_timeline(
        &self,
        package: &PackageName,
        settings: &SessionSettings,
        now_ms: i64,
        force: bool,
        tracker: &dyn LiveSessionView,
    ) -> Result<Option<SessionBootstrapFromTimeline>, BootstrapError> {
        self.compute(package, settings, now_ms, force, tracker, Arrival::Recorded)
    }

    /// Like [`compute_bootstrap_from_timeline`](Self::compute_bootstrap_from_timeline),
    /// for a package that is arriving in the foreground at `now_ms` but is not
    /// recorded there yet.
    pub fn compute_bootstrap_on_arrival(
        &self,
        package: &PackageName,
        settings: &SessionSettings,
        now_ms: i64,
        force: bool,
        tracker: &dyn LiveSessionView,
    ) -> Result<Option<SessionBootstrapFromTimeline>, BootstrapError> {
        self.compute(package, settings, now_ms, force, tracker, Arrival::Now)
    }

    fn compute(
        &self,
        package: &PackageName,
        settings: &SessionSettings,
        now_ms: i64,
        force: bool,
        tracker: &dyn LiveSessionView,
        arrival: Arrival,
    ) -> Result<Option<SessionBootstrapFromTimeline>, BootstrapError> {
        if !force {
            if let Some(live) = tracker.live_bootstrap(package, now_ms) {
                tracing::debug!(%package, "bootstrap served from live tracker state");
                return Ok(Some(live));
            }
        }
        let start_ms = now_ms.saturating_sub(self.lookback_ms);
        let events = self.projection.events_with_seed(start_ms, now_ms)?;
        let grace = settings.grace_period_millis;
        let snapshot = bootstrap_at(&events, package, grace, now_ms, arrival);
        tracing::debug!(%package, now_ms, ?arrival, ?snapshot, "computed bootstrap from timeline");
        Ok(snapshot)
    }
}

/// Whether the package's arrival is already on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrival {
    Recorded,
    Now,
}

/// Pure bootstrap over events in replay order.
pub fn bootstrap_from_events(
    events: &[StoredEvent],
    package: &PackageName,
    grace_period_millis: i64,
    now_ms: i64,
) -> Option<SessionBootstrapFromTimeline> {
    bootstrap_at(events, package, grace_period_millis, now_ms, Arrival::Recorded)
}

fn bootstrap_at(
    events: &[StoredEvent],
    package: &PackageName,
    grace_period_millis: i64,
    now_ms: i64,
    arrival: Arrival,
) -> Option<SessionBootstrapFromTimeline> {
    let events: Vec<&StoredEvent> = events.iter().filter(|e| e.timestamp_ms <= now_ms).collect();

    let mut facts = TimelineFacts::default();
    let mut foreground: Vec<(i64, Option<&PackageName>)> = Vec::new();
    for stored in &events {
        facts.apply(stored);
        if let TimelineEvent::ForegroundApp { package_name } = &stored.event {
            foreground.push((stored.timestamp_ms, package_name.as_ref()));
        }
    }
    if !facts.ever_targeted.contains(package) {
        return None;
    }
    if arrival == Arrival::Now {
        foreground.push((now_ms, Some(package)));
    }

    let Some(run) = find_run(&foreground, package, grace_period_millis) else {
        return Some(SessionBootstrapFromTimeline::not_ongoing());
    };

    let (session_id, lifecycle) = run_lifecycle(&events, package, run.start_ms);
    let elapsed = calculate_duration_millis(&lifecycle, now_ms);

    let last_decision_ms = events
        .iter()
        .filter(|e| e.timestamp_ms >= run.start_ms)
        .filter_map(|e| match &e.event {
            TimelineEvent::SuggestionDecision { package_name, .. } if package_name == package => {
                Some(e.timestamp_ms)
            }
            _ => None,
        })
        .last();
    let gate = SessionSuggestionGate {
        last_decision_elapsed_millis: last_decision_ms.map(|decided_at| {
            let prefix: Vec<SessionEvent> = lifecycle
                .iter()
                .copied()
                .filter(|e| e.timestamp_ms <= decided_at)
                .collect();
            calculate_duration_millis(&prefix, decided_at)
        }),
    };

    Some(SessionBootstrapFromTimeline {
        initial_elapsed_millis: elapsed,
        is_ongoing_session: true,
        gate,
        session_id,
        is_paused: is_paused(&lifecycle),
        since_foreground_millis: now_ms.saturating_sub(run.last_arrival_ms).max(0),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    start_ms: i64,
    last_arrival_ms: i64,
}

/// Walks back from the newest foreground event to the start of the run.
fn find_run(
    foreground: &[(i64, Option<&PackageName>)],
    package: &PackageName,
    grace_period_millis: i64,
) -> Option<Run> {
    let is_package = |idx: usize| foreground[idx].1 == Some(package);

    let mut idx = foreground.len().checked_sub(1)?;
    if !is_package(idx) {
        return None;
    }

    while idx > 0 && is_package(idx - 1) {
        idx -= 1;
    }
    let last_arrival_ms = foreground[idx].0;

    loop {
        while idx > 0 && is_package(idx - 1) {
            idx -= 1;
        }
        if idx == 0 || foreground[idx - 1].1.is_some() {
            break;
        }
        // Departure run: find where it began.
        let mut departed = idx - 1;
        while departed > 0 && foreground[departed - 1].1.is_none() {
            departed -= 1;
        }
        let away_ms = foreground[idx].0 - foreground[departed].0;
        if away_ms >= grace_period_millis || departed == 0 || !is_package(departed - 1) {
            break;
        }
        idx = departed - 1;
    }

    Some(Run {
        start_ms: foreground[idx].0,
        last_arrival_ms,
    })
}

/// Lifecycle of the current run, anchored at the run start.
///
/// Pauses and resumes come from the newest session for `package` that has
/// markers inside the run and has not ended.
fn run_lifecycle(
    events: &[&StoredEvent],
    package: &PackageName,
    run_start_ms: i64,
) -> (Option<SessionId>, Vec<SessionEvent>) {
    let markers: Vec<(&SessionId, SessionEventType, i64)> = events
        .iter()
        .filter(|e| e.timestamp_ms >= run_start_ms)
        .filter_map(|e| match &e.event {
            TimelineEvent::SessionLifecycle {
                session_id,
                package_name,
                event,
                ..
            } if package_name == package => Some((session_id, *event, e.occurred_ms())),
            _ => None,
        })
        .collect();
    let ended: HashSet<&SessionId> = markers
        .iter()
        .filter(|(_, event, _)| *event == SessionEventType::End)
        .map(|(id, _, _)| *id)
        .collect();

    let mut lifecycle = vec![SessionEvent::new(SessionEventType::Start, run_start_ms)];
    let session_id = markers
        .iter()
        .rev()
        .find(|(id, _, _)| !ended.contains(id))
        .map(|(id, _, _)| (*id).clone());
    if let Some(id) = &session_id {
        lifecycle.extend(
            markers
                .iter()
                .filter(|(marker_id, event, _)| {
                    *marker_id == id
                        && matches!(event, SessionEventType::Pause | SessionEventType::Resume)
                })
                .map(|(_, event, ts)| SessionEvent::new(*event, *ts)),
        );
    }
    (session_id, lifecycle)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::event::SuggestionDecision;
    use crate::store::InMemoryTimelineStore;
    use crate::testing::FlakyStore;
    use crate::types::SuggestionId;

    fn pkg(name: &str) -> PackageName {
        PackageName::new(name).unwrap()
    }

    fn targets(names: &[&str]) -> TimelineEvent {
        TimelineEvent::TargetAppsChanged {
            target_packages: names.iter().map(|n| pkg(n)).collect(),
        }
    }

    fn foreground(name: Option<&str>) -> TimelineEvent {
        TimelineEvent::ForegroundApp {
            package_name: name.map(pkg),
        }
    }

    fn shown(name: &str, id: &str) -> TimelineEvent {
        TimelineEvent::SuggestionShown {
            package_name: pkg(name),
            suggestion_id: SuggestionId::new(id).unwrap(),
        }
    }

    fn decided(name: &str, id: &str) -> TimelineEvent {
        TimelineEvent::SuggestionDecision {
            package_name: pkg(name),
            suggestion_id: SuggestionId::new(id).unwrap(),
            decision: SuggestionDecision::Opened,
        }
    }

    fn lifecycle(session: &str, name: &str, event: SessionEventType) -> TimelineEvent {
        TimelineEvent::SessionLifecycle {
            session_id: SessionId::new(session).unwrap(),
            package_name: pkg(name),
            event,
            occurred_ms: None,
        }
    }

    fn settings(grace_period_millis: i64) -> SessionSettings {
        SessionSettings {
            grace_period_millis,
            ..SessionSettings::default()
        }
    }

    fn bootstrapper(events: &[(i64, TimelineEvent)]) -> SessionBootstrapper {
        let store = Arc::new(InMemoryTimelineStore::new());
        for (ts, event) in events {
            store.append(*ts, event).unwrap();
        }
        SessionBootstrapper::new(store, 24)
    }

    fn compute(
        bootstrapper: &SessionBootstrapper,
        package: &str,
        grace: i64,
        now_ms: i64,
    ) -> Option<SessionBootstrapFromTimeline> {
        bootstrapper
            .compute_bootstrap_from_timeline(
                &pkg(package),
                &settings(grace),
                now_ms,
                true,
                &NoLiveSession,
            )
            .unwrap()
    }

    #[test]
    fn ongoing_session_with_decision_restores_gate() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (4_000, shown("a", "1")),
            (7_000, decided("a", "1")),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 8_000).unwrap();
        assert!(snapshot.is_ongoing_session);
        assert_eq!(snapshot.initial_elapsed_millis, 7_000);
        assert_eq!(snapshot.gate.last_decision_elapsed_millis, Some(6_000));
        assert_eq!(snapshot.since_foreground_millis, 7_000);
        assert!(!snapshot.is_paused);
    }

    #[test]
    fn departed_session_is_not_ongoing() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (2_000, foreground(None)),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 10_000).unwrap();
        assert!(!snapshot.is_ongoing_session);
        assert_eq!(snapshot.initial_elapsed_millis, 0);
        assert_eq!(snapshot.gate.last_decision_elapsed_millis, None);
        assert_eq!(snapshot, SessionBootstrapFromTimeline::not_ongoing());
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (3_000, decided("a", "1")),
        ]);
        let first = compute(&bootstrapper, "a", 5_000, 9_000);
        let second = compute(&bootstrapper, "a", 5_000, 9_000);
        assert_eq!(first, second);
    }

    #[test]
    fn never_targeted_package_has_no_bootstrap() {
        let bootstrapper = bootstrapper(&[(0, targets(&["a"])), (1_000, foreground(Some("a")))]);
        assert_eq!(compute(&bootstrapper, "b", 5_000, 2_000), None);
    }

    #[test]
    fn switch_to_other_package_ends_session() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a", "b"])),
            (1_000, foreground(Some("a"))),
            (2_000, foreground(Some("b"))),
        ]);
        let a = compute(&bootstrapper, "a", 5_000, 3_000).unwrap();
        assert!(!a.is_ongoing_session);
        let b = compute(&bootstrapper, "b", 5_000, 3_000).unwrap();
        assert!(b.is_ongoing_session);
        assert_eq!(b.initial_elapsed_millis, 1_000);
    }

    #[test]
    fn return_after_other_package_starts_new_run() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a", "b"])),
            (1_000, foreground(Some("a"))),
            (2_000, foreground(Some("b"))),
            (2_500, foreground(Some("a"))),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 4_000).unwrap();
        assert_eq!(snapshot.initial_elapsed_millis, 1_500);
    }

    #[test]
    fn short_departure_within_grace_is_bridged() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (3_000, foreground(None)),
            (4_000, foreground(Some("a"))),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 10_000).unwrap();
        assert!(snapshot.is_ongoing_session);
        assert_eq!(snapshot.initial_elapsed_millis, 9_000);
        assert_eq!(snapshot.since_foreground_millis, 6_000);
    }

    #[test]
    fn departure_reaching_grace_splits_runs() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (3_000, foreground(None)),
            (8_000, foreground(Some("a"))),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 10_000).unwrap();
        assert_eq!(snapshot.initial_elapsed_millis, 2_000);
    }

    #[test]
    fn decision_from_previous_session_does_not_carry_over() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (2_000, decided("a", "old")),
            (3_000, foreground(None)),
            (20_000, foreground(Some("a"))),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 25_000).unwrap();
        assert_eq!(snapshot.initial_elapsed_millis, 5_000);
        assert_eq!(snapshot.gate, SessionSuggestionGate::default());
    }

    #[test]
    fn paused_intervals_are_excluded() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (1_000, lifecycle("s1", "a", SessionEventType::Start)),
            (3_000, lifecycle("s1", "a", SessionEventType::Pause)),
            (5_000, lifecycle("s1", "a", SessionEventType::Resume)),
            (6_000, decided("a", "1")),
            (7_000, lifecycle("s1", "a", SessionEventType::Pause)),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 9_000).unwrap();
        assert_eq!(snapshot.session_id, Some(SessionId::new("s1").unwrap()));
        assert_eq!(snapshot.initial_elapsed_millis, 2_000 + 2_000);
        assert_eq!(snapshot.gate.last_decision_elapsed_millis, Some(3_000));
        assert!(snapshot.is_paused);
    }

    #[test]
    fn ended_session_markers_are_not_reused() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (1_000, lifecycle("s1", "a", SessionEventType::Start)),
            (2_000, lifecycle("s1", "a", SessionEventType::End)),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 4_000).unwrap();
        assert!(snapshot.is_ongoing_session);
        assert_eq!(snapshot.session_id, None);
        assert_eq!(snapshot.initial_elapsed_millis, 3_000);
    }

    fn arriving(
        bootstrapper: &SessionBootstrapper,
        package: &str,
        grace: i64,
        now_ms: i64,
    ) -> Option<SessionBootstrapFromTimeline> {
        bootstrapper
            .compute_bootstrap_on_arrival(
                &pkg(package),
                &settings(grace),
                now_ms,
                true,
                &NoLiveSession,
            )
            .unwrap()
    }

    #[test]
    fn arrival_during_pending_departure_bridges_to_earlier_run() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (1_000, lifecycle("s1", "a", SessionEventType::Start)),
            (11_000, foreground(None)),
        ]);

        let recorded = compute(&bootstrapper, "a", 3_000, 13_000).unwrap();
        assert!(!recorded.is_ongoing_session);

        let snapshot = arriving(&bootstrapper, "a", 3_000, 13_000).unwrap();
        assert!(snapshot.is_ongoing_session);
        assert_eq!(snapshot.session_id, Some(SessionId::new("s1").unwrap()));
        assert_eq!(snapshot.initial_elapsed_millis, 12_000);
        assert_eq!(snapshot.since_foreground_millis, 0);
    }

    #[test]
    fn arrival_after_grace_starts_a_new_run() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (1_000, lifecycle("s1", "a", SessionEventType::Start)),
            (11_000, foreground(None)),
        ]);
        let snapshot = arriving(&bootstrapper, "a", 3_000, 14_000).unwrap();
        assert!(snapshot.is_ongoing_session);
        assert_eq!(snapshot.session_id, None);
        assert_eq!(snapshot.initial_elapsed_millis, 0);
    }

    #[test]
    fn arrival_while_recorded_in_front_matches_plain_bootstrap() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (3_000, decided("a", "1")),
        ]);
        assert_eq!(
            arriving(&bootstrapper, "a", 5_000, 9_000),
            compute(&bootstrapper, "a", 5_000, 9_000)
        );
    }

    #[test]
    fn late_end_of_older_session_does_not_hide_newer_one() {
        let bootstrapper = bootstrapper(&[
            (0, targets(&["a"])),
            (1_000, foreground(Some("a"))),
            (1_000, lifecycle("s1", "a", SessionEventType::Start)),
            (2_000, foreground(None)),
            (9_000, foreground(Some("a"))),
            (9_000, lifecycle("s2", "a", SessionEventType::Start)),
            (
                9_500,
                TimelineEvent::SessionLifecycle {
                    session_id: SessionId::new("s1").unwrap(),
                    package_name: pkg("a"),
                    event: SessionEventType::End,
                    occurred_ms: Some(2_000),
                },
            ),
            (9_600, lifecycle("s2", "a", SessionEventType::Pause)),
        ]);
        let snapshot = compute(&bootstrapper, "a", 5_000, 10_000).unwrap();
        assert_eq!(snapshot.session_id, Some(SessionId::new("s2").unwrap()));
        assert!(snapshot.is_paused);
        assert_eq!(snapshot.initial_elapsed_millis, 600);
    }

    #[test]
    fn facts_before_lookback_window_are_seeded() {
        let hour = MILLIS_PER_HOUR;
        let bootstrapper = bootstrapper(&[(0, targets(&["a"])), (1_000, foreground(Some("a")))]);
        let now_ms = 30 * hour;
        let snapshot = compute(&bootstrapper, "a", 5_000, now_ms).unwrap();
        assert!(snapshot.is_ongoing_session);
        assert_eq!(snapshot.initial_elapsed_millis, now_ms - 1_000);
    }

    #[test]
    fn read_failure_propagates() {
        let store = Arc::new(FlakyStore::default());
        store.inner.append(0, &targets(&["a"])).unwrap();
        store.set_fail_reads(true);
        let bootstrapper = SessionBootstrapper::new(store, 24);
        let result = bootstrapper.compute_bootstrap_from_timeline(
            &pkg("a"),
            &settings(0),
            1_000,
            true,
            &NoLiveSession,
        );
        assert!(matches!(result, Err(BootstrapError::Read(_))));
    }

    struct FixedLive(SessionBootstrapFromTimeline);

    impl LiveSessionView for FixedLive {
        fn live_bootstrap(&self, _: &PackageName, _: i64) -> Option<SessionBootstrapFromTimeline> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn unforced_bootstrap_reuses_live_state() {
        let store = Arc::new(FlakyStore::default());
        store.set_fail_reads(true);
        let bootstrapper = SessionBootstrapper::new(store, 24);
        let live = SessionBootstrapFromTimeline {
            initial_elapsed_millis: 42,
            is_ongoing_session: true,
            ..SessionBootstrapFromTimeline::not_ongoing()
        };
        let result = bootstrapper
            .compute_bootstrap_from_timeline(
                &pkg("a"),
                &settings(0),
                1_000,
                false,
                &FixedLive(live.clone()),
            )
            .unwrap();
        assert_eq!(result, Some(live));
    }
}
