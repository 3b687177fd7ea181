//! The timeline store contract and an in-memory implementation.
//!
//! A store is an append-only, ordered log of [`TimelineEvent`]s. Appends are
//! atomic per event and return a monotonically increasing [`EventId`]. Every
//! query returns events in replay order (timestamp, then id).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::event::{StoredEvent, TimelineEvent, sort_for_replay};
use crate::types::EventId;

/// Errors surfaced by a timeline store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be reached or written.
    #[error("timeline store unavailable: {0}")]
    Unavailable(String),

    /// A persisted event could not be decoded.
    #[error("invalid stored event {id}: {message}")]
    InvalidEvent { id: i64, message: String },

    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Append-only event log.
///
/// Implementations must be safe to read from several callers while a single
/// writer appends.
pub trait TimelineStore: Send + Sync {
    /// Appends an event stamped with `timestamp_ms`.
    fn append(&self, timestamp_ms: i64, event: &TimelineEvent) -> Result<EventId, StoreError>;

    /// Events with `start_ms <= timestamp <= end_ms`, in replay order.
    fn query(&self, start_ms: i64, end_ms: i64) -> Result<Vec<StoredEvent>, StoreError>;

    /// For each fact key, the newest event strictly before `before_ms`.
    ///
    /// See [`TimelineEvent::seed_key`].
    fn query_seed_before(&self, before_ms: i64) -> Result<Vec<StoredEvent>, StoreError>;

    /// Events whose seed key is `seed_key` with `start_ms <= timestamp <= end_ms`,
    /// in replay order.
    fn query_key(
        &self,
        seed_key: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Timestamp of the newest event, if any.
    fn latest_timestamp(&self) -> Result<Option<i64>, StoreError>;

    /// Changes whenever an event is appended or the store is reset.
    fn version(&self) -> Result<u64, StoreError>;

    /// Deletes every event.
    fn reset(&self) -> Result<(), StoreError>;
}

/// Picks the newest event per seed key from events already in replay order.
pub fn select_seed_events<'a>(
    events: impl IntoIterator<Item = &'a StoredEvent>,
) -> Vec<StoredEvent> {
    let mut latest: HashMap<String, &StoredEvent> = HashMap::new();
    for event in events {
        latest.insert(event.event.seed_key(), event);
    }
    let mut seeds: Vec<StoredEvent> = latest.into_values().cloned().collect();
    sort_for_replay(&mut seeds);
    seeds
}

#[derive(Debug, Default)]
struct InMemoryLog {
    events: Vec<StoredEvent>,
    next_id: i64,
    version: u64,
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryTimelineStore {
    log: Mutex<InMemoryLog>,
}

impl InMemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in replay order.
    pub fn snapshot(&self) -> Vec<StoredEvent> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }
}

impl TimelineStore for InMemoryTimelineStore {
    fn append(&self, timestamp_ms: i64, event: &TimelineEvent) -> Result<EventId, StoreError> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.next_id += 1;
        let id = EventId::new(log.next_id);
        log.events.push(StoredEvent {
            id,
            timestamp_ms,
            event: event.clone(),
        });
        sort_for_replay(&mut log.events);
        log.version += 1;
        Ok(id)
    }

    fn query(&self, start_ms: i64, end_ms: i64) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .events
            .iter()
            .filter(|e| e.timestamp_ms >= start_ms && e.timestamp_ms <= end_ms)
            .cloned()
            .collect())
    }

    fn query_seed_before(&self, before_ms: i64) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(select_seed_events(
            log.events.iter().filter(|e| e.timestamp_ms < before_ms),
        ))
    }

    fn query_key(
        &self,
        seed_key: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .events
            .iter()
            .filter(|e| e.timestamp_ms >= start_ms && e.timestamp_ms <= end_ms)
            .filter(|e| e.event.seed_key() == seed_key)
            .cloned()
            .collect())
    }

    fn latest_timestamp(&self) -> Result<Option<i64>, StoreError> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(log.events.last().map(|e| e.timestamp_ms))
    }

    fn version(&self) -> Result<u64, StoreError> {
        Ok(self
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .version)
    }

    fn reset(&self) -> Result<(), StoreError> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.events.clear();
        log.version += 1;
        Ok(())
    }
}
