//! Timeline projections: derived facts folded from the event log.
//!
//! Folds walk events once, in replay order, and keep only the newest value of
//! each fact. Windowed reads are widened with seed events (the newest event per
//! fact key before the window) so a fact established before the window is
//! never mistaken for unset.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::event::{
    FOREGROUND_KEY, ServiceState, StoredEvent, SuggestionDecision, TimelineEvent, session_key,
    sort_for_replay,
};
use crate::session::{
    ActiveSegment, SessionEvent, SessionEventType, build_active_segments, is_paused,
};
use crate::store::{StoreError, TimelineStore};
use crate::types::{PackageName, SessionId, SuggestionId};

/// The foreground app as last recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundFact {
    pub package_name: Option<PackageName>,
    /// When the foreground first took this value.
    pub since_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShownSuggestion {
    pub timestamp_ms: i64,
    pub suggestion_id: SuggestionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecidedSuggestion {
    pub timestamp_ms: i64,
    pub suggestion_id: SuggestionId,
    pub decision: SuggestionDecision,
}

/// Most recent suggestion shown and decided for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuggestionFacts {
    pub last_shown: Option<ShownSuggestion>,
    pub last_decision: Option<DecidedSuggestion>,
}

impl SuggestionFacts {
    /// Whether the last shown suggestion is still waiting for a decision.
    pub fn is_pending(&self) -> bool {
        match (&self.last_shown, &self.last_decision) {
            (Some(shown), Some(decided)) => {
                decided.suggestion_id != shown.suggestion_id
                    && decided.timestamp_ms <= shown.timestamp_ms
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Facts derived from a sequence of timeline events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineFacts {
    /// Current target set; `None` if never defined.
    pub target_packages: Option<BTreeSet<PackageName>>,
    /// Every package that was a target at some point in the folded events.
    pub ever_targeted: BTreeSet<PackageName>,
    pub foreground: Option<ForegroundFact>,
    pub suggestions: BTreeMap<PackageName, SuggestionFacts>,
    pub settings: BTreeMap<String, String>,
    pub service_config: Option<(serde_json::Value, ServiceState)>,
}

impl TimelineFacts {
    /// Folds events that are already in replay order.
    pub fn fold(events: &[StoredEvent]) -> Self {
        let mut facts = Self::default();
        for event in events {
            facts.apply(event);
        }
        facts
    }

    pub fn apply(&mut self, stored: &StoredEvent) {
        match &stored.event {
            TimelineEvent::TargetAppsChanged { target_packages } => {
                self.ever_targeted.extend(target_packages.iter().cloned());
                self.target_packages = Some(target_packages.clone());
            }
            TimelineEvent::ForegroundApp { package_name } => {
                let unchanged = self
                    .foreground
                    .as_ref()
                    .is_some_and(|current| current.package_name == *package_name);
                if !unchanged {
                    self.foreground = Some(ForegroundFact {
                        package_name: package_name.clone(),
                        since_ms: stored.timestamp_ms,
                    });
                }
            }
            TimelineEvent::SuggestionShown {
                package_name,
                suggestion_id,
            } => {
                self.suggestions
                    .entry(package_name.clone())
                    .or_default()
                    .last_shown = Some(ShownSuggestion {
                    timestamp_ms: stored.timestamp_ms,
                    suggestion_id: suggestion_id.clone(),
                });
            }
            TimelineEvent::SuggestionDecision {
                package_name,
                suggestion_id,
                decision,
            } => {
                self.suggestions
                    .entry(package_name.clone())
                    .or_default()
                    .last_decision = Some(DecidedSuggestion {
                    timestamp_ms: stored.timestamp_ms,
                    suggestion_id: suggestion_id.clone(),
                    decision: *decision,
                });
            }
            TimelineEvent::SettingsChanged { key, new_value, .. } => {
                self.settings.insert(key.clone(), new_value.clone());
            }
            TimelineEvent::ServiceConfig { config, state } => {
                self.service_config = Some((config.clone(), *state));
            }
            TimelineEvent::SessionLifecycle { .. } => {}
        }
    }

    /// The current foreground package, `None` when nothing tracked is in front.
    pub fn foreground_package(&self) -> Option<&PackageName> {
        self.foreground.as_ref()?.package_name.as_ref()
    }

    pub fn is_target(&self, package: &PackageName) -> bool {
        self.target_packages
            .as_ref()
            .is_some_and(|targets| targets.contains(package))
    }
}

/// One session reconstructed from lifecycle markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub package_name: PackageName,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
    pub active_ms: i64,
    pub segments: Vec<ActiveSegment>,
    pub suggestions_shown: usize,
    pub paused: bool,
}

struct SessionMarkers {
    package_name: PackageName,
    events: Vec<SessionEvent>,
}

fn collect_markers(events: &[StoredEvent]) -> Vec<(SessionId, SessionMarkers)> {
    let mut order: Vec<SessionId> = Vec::new();
    let mut markers: HashMap<SessionId, SessionMarkers> = HashMap::new();
    for stored in events {
        if let TimelineEvent::SessionLifecycle {
            session_id,
            package_name,
            event,
            ..
        } = &stored.event
        {
            let entry = markers.entry(session_id.clone()).or_insert_with(|| {
                order.push(session_id.clone());
                SessionMarkers {
                    package_name: package_name.clone(),
                    events: Vec::new(),
                }
            });
            entry
                .events
                .push(SessionEvent::new(*event, stored.occurred_ms()));
        }
    }
    order
        .into_iter()
        .filter_map(|id| markers.remove(&id).map(|m| (id, m)))
        .collect()
}

fn bounds(events: &[SessionEvent]) -> Option<(i64, Option<i64>)> {
    let start = events.first()?.timestamp_ms;
    let end = events
        .iter()
        .find(|e| e.event_type == SessionEventType::End)
        .map(|e| e.timestamp_ms);
    Some((start, end))
}

/// Merges suggestions shown for `package` inside the session bounds.
fn with_suggestions(
    mut lifecycle: Vec<SessionEvent>,
    package: &PackageName,
    events: &[StoredEvent],
) -> Vec<SessionEvent> {
    let Some((start, end)) = bounds(&lifecycle) else {
        return lifecycle;
    };
    for stored in events {
        if let TimelineEvent::SuggestionShown { package_name, .. } = &stored.event {
            let inside =
                stored.timestamp_ms >= start && end.is_none_or(|end| stored.timestamp_ms <= end);
            if package_name == package && inside {
                lifecycle.push(SessionEvent::new(
                    SessionEventType::SuggestionShown,
                    stored.timestamp_ms,
                ));
            }
        }
    }
    lifecycle.sort_by_key(|e| e.timestamp_ms);
    lifecycle
}

/// The lifecycle of one session, with suggestions shown during it merged in.
pub fn session_events(events: &[StoredEvent], session_id: &SessionId) -> Vec<SessionEvent> {
    collect_markers(events)
        .into_iter()
        .find(|(id, _)| id == session_id)
        .map(|(_, markers)| with_suggestions(markers.events, &markers.package_name, events))
        .unwrap_or_default()
}

/// Summaries of every session with lifecycle markers in `events`.
pub fn summarize_sessions(events: &[StoredEvent], now_ms: i64) -> Vec<SessionSummary> {
    collect_markers(events)
        .into_iter()
        .filter_map(|(session_id, markers)| {
            let (start_ms, end_ms) = bounds(&markers.events)?;
            let lifecycle = with_suggestions(markers.events, &markers.package_name, events);
            let segments = build_active_segments(&lifecycle, now_ms);
            Some(SessionSummary {
                session_id,
                package_name: markers.package_name,
                start_ms,
                end_ms,
                active_ms: segments.iter().map(ActiveSegment::duration_ms).sum(),
                suggestions_shown: lifecycle
                    .iter()
                    .filter(|e| e.event_type == SessionEventType::SuggestionShown)
                    .count(),
                paused: end_ms.is_none() && is_paused(&lifecycle),
                segments,
            })
        })
        .collect()
}

/// A session whose newest lifecycle marker is not an `End`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub session_id: SessionId,
    pub package_name: PackageName,
    /// Its lifecycle markers in replay order; never empty.
    pub lifecycle: Vec<SessionEvent>,
    /// When the package left the foreground after its last recorded arrival.
    /// `None` while the timeline still has it in front.
    pub departed_ms: Option<i64>,
}

impl OpenSession {
    pub fn last_marker_ms(&self) -> i64 {
        self.lifecycle.last().map_or(0, |e| e.timestamp_ms)
    }
}

/// The session a lifecycle seed leaves open, if any.
fn open_marker(seed: &StoredEvent) -> Option<(&SessionId, &PackageName)> {
    match &seed.event {
        TimelineEvent::SessionLifecycle {
            session_id,
            package_name,
            event,
            ..
        } if *event != SessionEventType::End => Some((session_id, package_name)),
        _ => None,
    }
}

/// Time of the first foreground change away from `package` after it was last
/// recorded in front.
fn departure_after(foreground: &[StoredEvent], package: &PackageName) -> Option<i64> {
    let mut departed = None;
    for stored in foreground {
        if let TimelineEvent::ForegroundApp { package_name } = &stored.event {
            if package_name.as_ref() == Some(package) {
                departed = None;
            } else if departed.is_none() {
                departed = Some(stored.timestamp_ms);
            }
        }
    }
    departed
}

/// Read side of the timeline.
#[derive(Clone)]
pub struct TimelineProjection {
    store: Arc<dyn TimelineStore>,
}

impl TimelineProjection {
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    /// Events in the closed window `[start_ms, end_ms]`.
    pub fn events_in_window(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.store.query(start_ms, end_ms)
    }

    /// Seed events before `start_ms` followed by the window's events.
    pub fn events_with_seed(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut events = self.store.query_seed_before(start_ms)?;
        events.extend(self.store.query(start_ms, end_ms)?);
        sort_for_replay(&mut events);
        tracing::debug!(start_ms, end_ms, count = events.len(), "loaded seeded window");
        Ok(events)
    }

    /// Facts as of `at_ms`, folded from the window `[at_ms - lookback_ms, at_ms]`
    /// plus seeds.
    pub fn facts_at(&self, at_ms: i64, lookback_ms: i64) -> Result<TimelineFacts, StoreError> {
        let events = self.events_with_seed(at_ms.saturating_sub(lookback_ms), at_ms)?;
        Ok(TimelineFacts::fold(&events))
    }

    /// The target set in effect at `at_ms`; empty if never defined.
    pub fn target_packages_at(&self, at_ms: i64) -> Result<BTreeSet<PackageName>, StoreError> {
        let seeds = self.store.query_seed_before(at_ms.saturating_add(1))?;
        Ok(TimelineFacts::fold(&seeds)
            .target_packages
            .unwrap_or_default())
    }

    /// The foreground package recorded as of `at_ms`.
    pub fn foreground_package_at(&self, at_ms: i64) -> Result<Option<PackageName>, StoreError> {
        let seeds = self.store.query_seed_before(at_ms.saturating_add(1))?;
        Ok(TimelineFacts::fold(&seeds).foreground_package().cloned())
    }

    /// The latest suggestion shown/decision pair for `package` as of `at_ms`.
    pub fn last_suggestion_for(
        &self,
        package: &PackageName,
        at_ms: i64,
    ) -> Result<SuggestionFacts, StoreError> {
        let seeds = self.store.query_seed_before(at_ms.saturating_add(1))?;
        Ok(TimelineFacts::fold(&seeds)
            .suggestions
            .remove(package)
            .unwrap_or_default())
    }

    /// Lifecycle markers of one session stamped in `[start_ms, end_ms]`.
    fn session_history(
        &self,
        package: &PackageName,
        session_id: &SessionId,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut history = self.store.query_key(&session_key(package), start_ms, end_ms)?;
        history.retain(|stored| {
            matches!(
                &stored.event,
                TimelineEvent::SessionLifecycle { session_id: id, .. } if id == session_id
            )
        });
        Ok(history)
    }

    /// Session summaries for sessions that have markers in the window.
    ///
    /// A session still open at `start_ms` is summarized from its first marker,
    /// so it keeps its real start and active time.
    pub fn sessions(
        &self,
        start_ms: i64,
        end_ms: i64,
        now_ms: i64,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let mut events = Vec::new();
        for seed in self.store.query_seed_before(start_ms)? {
            if let Some((session_id, package)) = open_marker(&seed) {
                let before = start_ms.saturating_sub(1);
                events.extend(self.session_history(package, session_id, i64::MIN, before)?);
            }
        }
        events.extend(self.store.query(start_ms, end_ms)?);
        sort_for_replay(&mut events);
        Ok(summarize_sessions(&events, now_ms))
    }

    /// Sessions left open on the timeline as of `at_ms`, at most one per
    /// package.
    pub fn open_sessions(&self, at_ms: i64) -> Result<Vec<OpenSession>, StoreError> {
        let mut open = Vec::new();
        for seed in self.store.query_seed_before(at_ms.saturating_add(1))? {
            let Some((session_id, package)) = open_marker(&seed) else {
                continue;
            };
            let history = self.session_history(package, session_id, i64::MIN, at_ms)?;
            let Some((_, markers)) = collect_markers(&history).into_iter().next() else {
                continue;
            };
            let first_ms = markers.events.first().map_or(seed.timestamp_ms, |e| e.timestamp_ms);
            let foreground = self.store.query_key(FOREGROUND_KEY, first_ms, at_ms)?;
            open.push(OpenSession {
                session_id: session_id.clone(),
                package_name: package.clone(),
                departed_ms: departure_after(&foreground, package),
                lifecycle: markers.events,
            });
        }
        Ok(open)
    }

    /// Pull-based observer that re-reads the window after each append.
    pub fn observe(&self, start_ms: i64, end_ms: i64) -> TimelineObserver {
        TimelineObserver {
            store: Arc::clone(&self.store),
            start_ms,
            end_ms,
            last_version: None,
        }
    }
}

/// Refreshes a window whenever the store changes.
pub struct TimelineObserver {
    store: Arc<dyn TimelineStore>,
    start_ms: i64,
    end_ms: i64,
    last_version: Option<u64>,
}

impl TimelineObserver {
    /// Returns the window's events if the store changed since the last poll.
    ///
    /// The first poll always returns the window.
    pub fn poll(&mut self) -> Result<Option<Vec<StoredEvent>>, StoreError> {
        let version = self.store.version()?;
        if self.last_version == Some(version) {
            return Ok(None);
        }
        let events = self.store.query(self.start_ms, self.end_ms)?;
        self.last_version = Some(version);
        Ok(Some(events))
    }
}
