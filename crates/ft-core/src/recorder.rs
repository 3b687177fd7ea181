//! Stamps domain events with the current time and appends them.

use std::sync::Arc;

use crate::clock::Clock;
use crate::event::{StoredEvent, TimelineEvent};
use crate::store::{StoreError, TimelineStore};

/// Write path shared by every component that appends to the timeline.
///
/// Stamps never go backwards: if the wall clock is behind the newest event in
/// the store, the event is stamped with that newest timestamp instead.
pub struct EventRecorder {
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    last_stamp: Option<i64>,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn TimelineStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            last_stamp: None,
        }
    }

    /// Appends `event` stamped with the current time.
    pub fn record(&mut self, event: TimelineEvent) -> Result<StoredEvent, StoreError> {
        let floor = match self.last_stamp {
            Some(stamp) => Some(stamp),
            None => self.store.latest_timestamp()?,
        };
        let now = self.clock.wall_millis();
        let timestamp_ms = floor.map_or(now, |floor| now.max(floor));
        let id = self.store.append(timestamp_ms, &event)?;
        self.last_stamp = Some(timestamp_ms);
        tracing::debug!(
            %id,
            timestamp_ms,
            event_type = %event.event_type(),
            "recorded timeline event"
        );
        Ok(StoredEvent {
            id,
            timestamp_ms,
            event,
        })
    }

    /// Like [`record`](Self::record), but a failure is logged and swallowed.
    ///
    /// Use for audit events whose loss degrades history but not live state.
    pub fn record_best_effort(&mut self, event: TimelineEvent) -> Option<StoredEvent> {
        let event_type = event.event_type();
        match self.record(event) {
            Ok(stored) => Some(stored),
            Err(err) => {
                tracing::warn!(%event_type, error = %err, "failed to record timeline event");
                None
            }
        }
    }
}
