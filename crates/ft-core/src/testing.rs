//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::event::{StoredEvent, TimelineEvent};
use crate::store::{InMemoryTimelineStore, StoreError, TimelineStore};
use crate::types::EventId;

/// An in-memory store whose reads and appends can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryTimelineStore,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }
}

impl TimelineStore for FlakyStore {
    fn append(&self, timestamp_ms: i64, event: &TimelineEvent) -> Result<EventId, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("appends disabled".to_string()));
        }
        self.inner.append(timestamp_ms, event)
    }

    fn query(&self, start_ms: i64, end_ms: i64) -> Result<Vec<StoredEvent>, StoreError> {
        self.check_reads()?;
        self.inner.query(start_ms, end_ms)
    }

    fn query_seed_before(&self, before_ms: i64) -> Result<Vec<StoredEvent>, StoreError> {
        self.check_reads()?;
        self.inner.query_seed_before(before_ms)
    }

    fn query_key(
        &self,
        seed_key: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.check_reads()?;
        self.inner.query_key(seed_key, start_ms, end_ms)
    }

    fn latest_timestamp(&self) -> Result<Option<i64>, StoreError> {
        self.check_reads()?;
        self.inner.latest_timestamp()
    }

    fn version(&self) -> Result<u64, StoreError> {
        self.check_reads()?;
        self.inner.version()
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.inner.reset()
    }
}
