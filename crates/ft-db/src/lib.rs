//! SQLite storage for the focus timeline.
//!
//! Implements [`TimelineStore`] on top of `rusqlite`.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`. [`Database`] keeps its
//! connection behind a `Mutex` so one instance can be shared through an `Arc`
//! by readers and the single writer. Separate processes (for example `ft
//! record` while `ft watch` runs) coordinate through SQLite's own locking; the
//! database runs in WAL mode with a busy timeout.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as INTEGER epoch milliseconds in `timestamp_ms`.
//! Replay order is `timestamp_ms` then `id`.
//!
//! ## Event Payload Storage
//!
//! The `data` column stores the whole event as tagged JSON. The `type` and
//! `seed_key` columns duplicate what the payload implies so queries can filter
//! and group without parsing JSON. When evolving event payloads:
//! - Adding fields: give them a serde default so old rows still decode
//! - Removing or renaming fields: old rows become unparseable (requires migration)
//!
//! ## Undecodable Rows
//!
//! Reads skip rows whose type is unknown or whose payload does not decode,
//! logging each at `warn`, so one bad row never hides the rest of the timeline.
//! [`Database::list_events_strict`] reports them instead.
//!
//! ## Version
//!
//! `timeline_meta.version` is bumped in the same transaction as every append
//! and reset, so observers in other processes see changes too.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ft_core::event::{StoredEvent, TimelineEvent};
use ft_core::event_type::{EventType, UnknownEventType};
use ft_core::store::{StoreError, TimelineStore};
use ft_core::types::EventId;
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to encode an event for storage.
    #[error("failed to encode {event_type} event: {source}")]
    Encode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    /// Failed to parse event payload JSON.
    #[error("invalid event data for {event_id}: {message}")]
    InvalidEventData { event_id: i64, message: String },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidEventData { event_id, message } => Self::InvalidEvent {
                id: event_id,
                message,
            },
            other => Self::Backend(Box::new(other)),
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened timeline database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn().execute_batch(
            "
            -- Events table: the append-only timeline
            -- timestamp_ms: epoch milliseconds
            -- type: event type (e.g., 'foreground_app')
            -- seed_key: fact the event establishes (e.g., 'foreground', 'session:com.example')
            -- data: JSON payload with event fields
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                type TEXT NOT NULL,
                seed_key TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp_ms, id);
            CREATE INDEX IF NOT EXISTS idx_events_seed ON events(seed_key, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);

            CREATE TABLE IF NOT EXISTS timeline_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO timeline_meta (key, value) VALUES ('version', 0);
            ",
        )?;
        Ok(())
    }

    /// Appends an event and bumps the version atomically.
    pub fn insert_event(
        &self,
        timestamp_ms: i64,
        event: &TimelineEvent,
    ) -> Result<EventId, DbError> {
        let event_type = event.event_type();
        let data = serde_json::to_string(event).map_err(|source| DbError::Encode {
            event_type: event_type.to_string(),
            source,
        })?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO events (timestamp_ms, type, seed_key, data) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp_ms, event_type.as_str(), event.seed_key(), data],
        )?;
        let id = tx.last_insert_rowid();
        bump_version(&tx)?;
        tx.commit()?;
        Ok(EventId::new(id))
    }

    /// Lists events with `start_ms <= timestamp_ms <= end_ms`, in replay order.
    pub fn list_events_in_range(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, DbError> {
        if end_ms < start_ms {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "
            SELECT id, timestamp_ms, type, data
            FROM events
            WHERE timestamp_ms >= ?1 AND timestamp_ms <= ?2
            ORDER BY timestamp_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![start_ms, end_ms], raw_row)?;
        decode_rows(rows)
    }

    /// Like [`list_events_in_range`](Self::list_events_in_range), but fails on
    /// the first row that does not decode.
    pub fn list_events_strict(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "
            SELECT id, timestamp_ms, type, data
            FROM events
            WHERE timestamp_ms >= ?1 AND timestamp_ms <= ?2
            ORDER BY timestamp_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![start_ms, end_ms], raw_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(decode_event(row?)?);
        }
        Ok(events)
    }

    /// Lists events establishing `seed_key` with
    /// `start_ms <= timestamp_ms <= end_ms`, in replay order.
    pub fn list_events_for_key(
        &self,
        seed_key: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "
            SELECT id, timestamp_ms, type, data
            FROM events
            WHERE seed_key = ?1 AND timestamp_ms >= ?2 AND timestamp_ms <= ?3
            ORDER BY timestamp_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![seed_key, start_ms, end_ms], raw_row)?;
        decode_rows(rows)
    }

    /// Lists, for each seed key, the newest event strictly before `before_ms`.
    pub fn list_seed_events(&self, before_ms: i64) -> Result<Vec<StoredEvent>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "
            SELECT id, timestamp_ms, type, data
            FROM (
                SELECT id, timestamp_ms, type, data,
                       ROW_NUMBER() OVER (
                           PARTITION BY seed_key
                           ORDER BY timestamp_ms DESC, id DESC
                       ) AS seed_rank
                FROM events
                WHERE timestamp_ms < ?1
            )
            WHERE seed_rank = 1
            ORDER BY timestamp_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![before_ms], raw_row)?;
        decode_rows(rows)
    }

    /// Timestamp of the newest event.
    pub fn latest_timestamp(&self) -> Result<Option<i64>, DbError> {
        let latest = self
            .conn()
            .query_row("SELECT MAX(timestamp_ms) FROM events", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(latest)
    }

    /// Current change counter.
    pub fn version(&self) -> Result<u64, DbError> {
        let version = self
            .conn()
            .query_row(
                "SELECT value FROM timeline_meta WHERE key = 'version'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(version.unsigned_abs())
    }

    /// Number of stored events.
    pub fn count_events(&self) -> Result<usize, DbError> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get::<_, i64>(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Deletes every event.
    pub fn clear_events(&self) -> Result<usize, DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM events", [])?;
        bump_version(&tx)?;
        tx.commit()?;
        tracing::info!(deleted, "cleared timeline");
        Ok(deleted)
    }
}

impl TimelineStore for Database {
    fn append(&self, timestamp_ms: i64, event: &TimelineEvent) -> Result<EventId, StoreError> {
        Ok(self.insert_event(timestamp_ms, event)?)
    }

    fn query(&self, start_ms: i64, end_ms: i64) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.list_events_in_range(start_ms, end_ms)?)
    }

    fn query_seed_before(&self, before_ms: i64) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.list_seed_events(before_ms)?)
    }

    fn query_key(
        &self,
        seed_key: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.list_events_for_key(seed_key, start_ms, end_ms)?)
    }

    fn latest_timestamp(&self) -> Result<Option<i64>, StoreError> {
        Ok(Self::latest_timestamp(self)?)
    }

    fn version(&self) -> Result<u64, StoreError> {
        Ok(Self::version(self)?)
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.clear_events()?;
        Ok(())
    }
}

fn bump_version(conn: &Connection) -> Result<(), DbError> {
    conn.execute(
        "UPDATE timeline_meta SET value = value + 1 WHERE key = 'version'",
        [],
    )?;
    Ok(())
}

struct RawEvent {
    id: i64,
    timestamp_ms: i64,
    event_type: String,
    data: String,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        event_type: row.get(2)?,
        data: row.get(3)?,
    })
}

fn decode_rows(
    rows: impl Iterator<Item = rusqlite::Result<RawEvent>>,
) -> Result<Vec<StoredEvent>, DbError> {
    let mut events = Vec::new();
    for row in rows {
        match decode_event(row?) {
            Ok(event) => events.push(event),
            Err(DbError::InvalidEventData { event_id, message }) => {
                tracing::warn!(event_id, %message, "skipping undecodable timeline event");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(events)
}

fn decode_event(raw: RawEvent) -> Result<StoredEvent, DbError> {
    let invalid = |message: String| DbError::InvalidEventData {
        event_id: raw.id,
        message,
    };
    let event_type: EventType = raw
        .event_type
        .parse()
        .map_err(|err: UnknownEventType| invalid(err.to_string()))?;
    let event: TimelineEvent =
        serde_json::from_str(&raw.data).map_err(|err| invalid(err.to_string()))?;
    if event.event_type() != event_type {
        return Err(invalid(format!(
            "type column {event_type} does not match {} payload",
            event.event_type()
        )));
    }
    Ok(StoredEvent {
        id: EventId::new(raw.id),
        timestamp_ms: raw.timestamp_ms,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use ft_core::event::SuggestionDecision;
    use ft_core::store::InMemoryTimelineStore;
    use ft_core::types::{PackageName, SuggestionId};

    fn pkg(name: &str) -> PackageName {
        PackageName::new(name).expect("valid package")
    }

    fn foreground(name: Option<&str>) -> TimelineEvent {
        TimelineEvent::ForegroundApp {
            package_name: name.map(pkg),
        }
    }

    fn targets(names: &[&str]) -> TimelineEvent {
        TimelineEvent::TargetAppsChanged {
            target_packages: names.iter().map(|n| pkg(n)).collect(),
        }
    }

    fn timestamps(events: &[StoredEvent]) -> Vec<i64> {
        events.iter().map(|e| e.timestamp_ms).collect()
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");
        let conn = db.conn();

        assert_eq!(
            table_columns(&conn, "events"),
            vec!["id", "timestamp_ms", "type", "seed_key", "data"]
        );
        assert_eq!(table_columns(&conn, "timeline_meta"), vec!["key", "value"]);

        let expected: HashSet<String> = [
            "idx_events_timestamp",
            "idx_events_seed",
            "idx_events_type",
        ]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(expected.is_subset(&index_names(&conn, "events")));
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .expect("prepare index_list");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query index_list");
        rows.map(|row| row.expect("index_list row")).collect()
    }

    #[test]
    fn append_and_query_in_replay_order() {
        let db = Database::open_in_memory().expect("open db");
        let late = db.append(20, &foreground(Some("a"))).expect("append");
        let early = db.append(10, &foreground(None)).expect("append");
        let tie = db.append(20, &foreground(Some("b"))).expect("append");
        assert!(early > late);

        let events = db.query(0, 100).expect("query");
        let ids: Vec<EventId> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early, late, tie]);
        assert_eq!(events[1].event, foreground(Some("a")));
    }

    #[test]
    fn query_window_is_closed_on_both_ends() {
        let db = Database::open_in_memory().expect("open db");
        for ts in [5, 10, 15, 20, 25] {
            db.append(ts, &foreground(Some("a"))).expect("append");
        }
        assert_eq!(timestamps(&db.query(10, 20).expect("query")), vec![10, 15, 20]);
        assert!(db.query(20, 10).expect("query").is_empty());
    }

    #[test]
    fn seed_query_returns_newest_per_key() {
        let db = Database::open_in_memory().expect("open db");
        db.append(1, &targets(&["a"])).expect("append");
        db.append(2, &foreground(Some("a"))).expect("append");
        db.append(3, &targets(&["a", "b"])).expect("append");
        db.append(4, &foreground(None)).expect("append");
        db.append(
            5,
            &TimelineEvent::SuggestionDecision {
                package_name: pkg("a"),
                suggestion_id: SuggestionId::new("s1").expect("id"),
                decision: SuggestionDecision::Opened,
            },
        )
        .expect("append");
        db.append(10, &foreground(Some("b"))).expect("append");

        let seeds = db.query_seed_before(10).expect("seed");
        assert_eq!(timestamps(&seeds), vec![3, 4, 5]);
        assert_eq!(seeds[0].event, targets(&["a", "b"]));
    }

    #[test]
    fn seed_query_breaks_timestamp_ties_by_id() {
        let db = Database::open_in_memory().expect("open db");
        db.append(5, &foreground(Some("a"))).expect("append");
        db.append(5, &foreground(Some("b"))).expect("append");
        let seeds = db.query_seed_before(6).expect("seed");
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].event, foreground(Some("b")));
    }

    #[test]
    fn matches_in_memory_store() {
        let db = Database::open_in_memory().expect("open db");
        let memory = InMemoryTimelineStore::new();
        let script = [
            (0, targets(&["a", "b"])),
            (10, foreground(Some("a"))),
            (10, foreground(None)),
            (30, foreground(Some("b"))),
            (40, targets(&["b"])),
        ];
        for (ts, event) in &script {
            db.append(*ts, event).expect("append");
            memory.append(*ts, event).expect("append");
        }
        for before in [0, 10, 11, 35, 100] {
            assert_eq!(
                db.query_seed_before(before).expect("seed"),
                memory.query_seed_before(before).expect("seed"),
                "seeds before {before}"
            );
        }
        assert_eq!(db.query(10, 30).expect("query"), memory.query(10, 30).expect("query"));
    }

    #[test]
    fn version_changes_on_append_and_reset() {
        let db = Database::open_in_memory().expect("open db");
        let v0 = TimelineStore::version(&db).expect("version");
        db.append(1, &foreground(None)).expect("append");
        let v1 = TimelineStore::version(&db).expect("version");
        assert_ne!(v0, v1);
        assert_eq!(TimelineStore::version(&db).expect("version"), v1);

        db.reset().expect("reset");
        assert_ne!(TimelineStore::version(&db).expect("version"), v1);
        assert_eq!(db.count_events().expect("count"), 0);
        assert_eq!(TimelineStore::latest_timestamp(&db).expect("latest"), None);
    }

    #[test]
    fn ids_are_not_reused_after_reset() {
        let db = Database::open_in_memory().expect("open db");
        let before = db.append(1, &foreground(None)).expect("append");
        db.reset().expect("reset");
        let after = db.append(1, &foreground(None)).expect("append");
        assert!(after > before);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ft.db");
        {
            let db = Database::open(&path).expect("open db");
            db.append(42, &targets(&["a"])).expect("append");
        }
        let db = Database::open(&path).expect("reopen db");
        assert_eq!(TimelineStore::latest_timestamp(&db).expect("latest"), Some(42));
        assert_eq!(db.query(0, 100).expect("query")[0].event, targets(&["a"]));
    }

    fn insert_raw(db: &Database, timestamp_ms: i64, event_type: &str, seed_key: &str, data: &str) {
        db.conn()
            .execute(
                "INSERT INTO events (timestamp_ms, type, seed_key, data) VALUES (?1, ?2, ?3, ?4)",
                params![timestamp_ms, event_type, seed_key, data],
            )
            .expect("insert raw row");
    }

    #[test]
    fn corrupt_payload_is_skipped_by_reads() {
        let db = Database::open_in_memory().expect("open db");
        db.append(1, &targets(&["a"])).expect("append");
        insert_raw(&db, 2, "foreground_app", "foreground", "{}");
        db.append(3, &foreground(Some("a"))).expect("append");

        assert_eq!(timestamps(&db.query(0, 10).expect("query")), vec![1, 3]);

        let err = db.list_events_strict(0, 10).expect_err("decode should fail");
        assert!(matches!(err, DbError::InvalidEventData { event_id: 2, .. }));
    }

    #[test]
    fn type_column_must_match_payload() {
        let db = Database::open_in_memory().expect("open db");
        insert_raw(
            &db,
            1,
            "suggestion_shown",
            "foreground",
            r#"{"type":"foreground_app","package_name":null}"#,
        );

        assert!(db.query(0, 10).expect("query").is_empty());
        let err = db.list_events_strict(0, 10).expect_err("decode should fail");
        assert!(matches!(
            &err,
            DbError::InvalidEventData { event_id: 1, message } if message.contains("does not match")
        ));
        assert!(matches!(
            StoreError::from(err),
            StoreError::InvalidEvent { id: 1, .. }
        ));
    }

    #[test]
    fn unknown_event_type_does_not_hide_later_facts() {
        let db = Database::open_in_memory().expect("open db");
        db.append(1_000, &targets(&["a"])).expect("append");
        insert_raw(&db, 1_500, "legacy_kind", "legacy", r#"{"type":"legacy_kind"}"#);
        db.append(8_000, &foreground(Some("a"))).expect("append");

        let events = db.query(0, 10_000).expect("query");
        assert_eq!(timestamps(&events), vec![1_000, 8_000]);
        let seeds = db.query_seed_before(10_000).expect("seed");
        assert_eq!(timestamps(&seeds), vec![1_000, 8_000]);
    }

    #[test]
    fn key_query_returns_one_fact_history() {
        let db = Database::open_in_memory().expect("open db");
        db.append(1, &foreground(Some("a"))).expect("append");
        db.append(2, &targets(&["a"])).expect("append");
        db.append(3, &foreground(None)).expect("append");
        db.append(9, &foreground(Some("b"))).expect("append");

        let events = db.query_key("foreground", 0, 5).expect("key query");
        assert_eq!(timestamps(&events), vec![1, 3]);
        let memory = InMemoryTimelineStore::new();
        for event in db.query(0, 10).expect("query") {
            memory.append(event.timestamp_ms, &event.event).expect("append");
        }
        assert_eq!(
            memory.query_key("foreground", 0, 5).expect("key query"),
            events
        );
    }
}
