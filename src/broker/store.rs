/// Event store - append-only durable log backing replay and audit
///
/// SQLite with split read/write connection pools, WAL journal, and
/// keyset-style range queries over the version sequence. The write pool is
/// capped at a single connection so version assignment (rowid) is
/// linearizable: no two appends can receive the same version.
///
/// The router core only appends and reads ranges. Retention purge is an
/// administrative path driven by the maintenance sweep, not part of the
/// core contract.
use super::dead_letter::{DeadLetterEntry, DeadLetterFilter};
use super::event::{Event, Priority};
use crate::errors::RouterError;
use crate::logger::{self, LogTag};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Connection pool configuration
const WRITE_POOL_MAX_SIZE: u32 = 1;
const READ_POOL_MAX_SIZE: u32 = 8;
const POOL_MIN_IDLE: u32 = 1;
const CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Default row cap for range reads without an explicit limit
const DEFAULT_READ_LIMIT: usize = 10_000;

// =============================================================================
// READ FILTER
// =============================================================================

/// Range query parameters for `read_range`
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// Exclusive lower version bound (replay: last acked version)
    pub from_version: Option<u64>,

    /// Inclusive upper version bound
    pub to_version: Option<u64>,

    /// Exact topic set (empty = all topics)
    pub topics: Vec<String>,

    /// Minimum priority level
    pub min_priority: Option<Priority>,

    /// Time window
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    /// Row cap (defaults to DEFAULT_READ_LIMIT)
    pub limit: Option<usize>,
}

// =============================================================================
// EVENT STORE
// =============================================================================

/// Append-only event log with split connection pools
pub struct EventStore {
    write_pool: Pool<SqliteConnectionManager>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl EventStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> Result<Self, RouterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RouterError::StoreAppendFailure(format!(
                    "failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let write_manager = SqliteConnectionManager::file(path);
        let read_manager = SqliteConnectionManager::file(path);

        let write_pool = Pool::builder()
            .max_size(WRITE_POOL_MAX_SIZE)
            .min_idle(Some(POOL_MIN_IDLE))
            .connection_timeout(std::time::Duration::from_millis(CONNECTION_TIMEOUT_MS))
            .build(write_manager)?;

        let read_pool = Pool::builder()
            .max_size(READ_POOL_MAX_SIZE)
            .min_idle(Some(POOL_MIN_IDLE))
            .connection_timeout(std::time::Duration::from_millis(CONNECTION_TIMEOUT_MS))
            .build(read_manager)?;

        let store = EventStore {
            write_pool,
            read_pool,
        };
        store.initialize_schema()?;

        logger::info(
            LogTag::Store,
            &format!("Event store ready at {}", path.display()),
        );

        Ok(store)
    }

    /// Throwaway store for tests, backed by a unique temp file so both
    /// pools see the same database
    #[cfg(test)]
    pub fn open_temporary() -> Result<Self, RouterError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        // Leak the handle so the files outlive this helper
        std::mem::forget(dir);
        Self::open(&path)
    }

    fn initialize_schema(&self) -> Result<(), RouterError> {
        let conn = self.write_conn()?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", 10000)?;
        conn.pragma_update(None, "temp_store", "memory")?;
        conn.busy_timeout(std::time::Duration::from_millis(30_000))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                version         INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id        TEXT    NOT NULL UNIQUE,
                topic           TEXT    NOT NULL,
                payload         TEXT    NOT NULL,
                priority        INTEGER NOT NULL,
                source          TEXT,
                correlation_id  TEXT,
                created_at      TEXT    NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_topic ON events(topic, version)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                entry_id        INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id        TEXT    NOT NULL,
                event_version   INTEGER NOT NULL,
                topic           TEXT    NOT NULL,
                payload         TEXT    NOT NULL,
                priority        INTEGER NOT NULL,
                client_id       TEXT    NOT NULL,
                attempt_count   INTEGER NOT NULL,
                last_error      TEXT    NOT NULL,
                dead_lettered_at TEXT   NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dead_letters_client ON dead_letters(client_id, entry_id)",
            [],
        )?;

        Ok(())
    }

    fn write_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, RouterError> {
        self.write_pool.get().map_err(RouterError::from)
    }

    fn read_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, RouterError> {
        self.read_pool.get().map_err(RouterError::from)
    }

    // =========================================================================
    // APPEND (durability boundary)
    // =========================================================================

    /// Append an accepted event and assign its version.
    ///
    /// This is the acceptance boundary: publish acks must wait for it. Any
    /// failure here is surfaced as StoreAppendFailure, never dropped.
    pub fn append(&self, event: &mut Event) -> Result<u64, RouterError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| RouterError::StoreAppendFailure(format!("payload encode: {}", e)))?;

        let conn = self
            .write_pool
            .get()
            .map_err(|e| RouterError::StoreAppendFailure(format!("connection pool: {}", e)))?;

        conn.execute(
            "INSERT INTO events (event_id, topic, payload, priority, source, correlation_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id,
                event.topic,
                payload,
                event.priority.level(),
                event.source,
                event.correlation_id,
                event.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RouterError::StoreAppendFailure(e.to_string()))?;

        let version = conn.last_insert_rowid() as u64;
        event.version = version;

        Ok(version)
    }

    // =========================================================================
    // RANGE READS
    // =========================================================================

    /// Read events matching the filter, ordered by version ascending.
    ///
    /// Reading the same range twice yields the same sequence; nothing in the
    /// router mutates stored rows.
    pub fn read_range(&self, filter: &ReadFilter) -> Result<Vec<Event>, RouterError> {
        let mut sql = String::from(
            "SELECT version, event_id, topic, payload, priority, source, correlation_id, created_at
             FROM events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(from) = filter.from_version {
            sql.push_str(" AND version > ?");
            args.push(Box::new(from as i64));
        }
        if let Some(to) = filter.to_version {
            sql.push_str(" AND version <= ?");
            args.push(Box::new(to as i64));
        }
        if !filter.topics.is_empty() {
            let placeholders = vec!["?"; filter.topics.len()].join(", ");
            sql.push_str(&format!(" AND topic IN ({})", placeholders));
            for topic in &filter.topics {
                args.push(Box::new(topic.clone()));
            }
        }
        if let Some(min) = filter.min_priority {
            sql.push_str(" AND priority >= ?");
            args.push(Box::new(min.level() as i64));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(until.to_rfc3339()));
        }

        sql.push_str(" ORDER BY version ASC LIMIT ?");
        args.push(Box::new(filter.limit.unwrap_or(DEFAULT_READ_LIMIT) as i64));

        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));

        let rows = stmt.query_map(params, row_to_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Version of a stored event by id (None when unknown)
    pub fn version_of(&self, event_id: &str) -> Result<Option<u64>, RouterError> {
        let conn = self.read_conn()?;
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(version.map(|v| v as u64))
    }

    /// Highest assigned version (0 when empty)
    pub fn latest_version(&self) -> Result<u64, RouterError> {
        let conn = self.read_conn()?;
        let version: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM events", [], |row| {
                row.get(0)
            })?;
        Ok(version as u64)
    }

    /// Stored event count
    pub fn event_count(&self) -> Result<u64, RouterError> {
        let conn = self.read_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // =========================================================================
    // DEAD LETTERS
    // =========================================================================

    pub fn dead_letter_insert(
        &self,
        event: &Event,
        client_id: &str,
        attempt_count: u32,
        last_error: &str,
    ) -> Result<i64, RouterError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| RouterError::StoreQueryFailure(format!("payload encode: {}", e)))?;

        let conn = self.write_conn()?;
        conn.execute(
            "INSERT INTO dead_letters
                (event_id, event_version, topic, payload, priority, client_id, attempt_count, last_error, dead_lettered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.version as i64,
                event.topic,
                payload,
                event.priority.level(),
                client_id,
                attempt_count,
                last_error,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn dead_letter_list(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterEntry>, RouterError> {
        let mut sql = String::from(
            "SELECT entry_id, event_id, event_version, topic, payload, priority, client_id,
                    attempt_count, last_error, dead_lettered_at
             FROM dead_letters WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(client_id) = &filter.client_id {
            sql.push_str(" AND client_id = ?");
            args.push(Box::new(client_id.clone()));
        }
        if let Some(topic) = &filter.topic {
            sql.push_str(" AND topic = ?");
            args.push(Box::new(topic.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND dead_lettered_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }

        sql.push_str(" ORDER BY entry_id ASC LIMIT ?");
        args.push(Box::new(filter.limit.unwrap_or(1_000) as i64));

        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
        let rows = stmt.query_map(params, row_to_dead_letter)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn dead_letter_get(&self, entry_id: i64) -> Result<DeadLetterEntry, RouterError> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT entry_id, event_id, event_version, topic, payload, priority, client_id,
                    attempt_count, last_error, dead_lettered_at
             FROM dead_letters WHERE entry_id = ?1",
            params![entry_id],
            row_to_dead_letter,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => RouterError::DeadLetterNotFound(entry_id),
            other => RouterError::from(other),
        })
    }

    pub fn dead_letter_delete(&self, entry_id: i64) -> Result<(), RouterError> {
        let conn = self.write_conn()?;
        let affected = conn.execute("DELETE FROM dead_letters WHERE entry_id = ?1", params![entry_id])?;
        if affected == 0 {
            return Err(RouterError::DeadLetterNotFound(entry_id));
        }
        Ok(())
    }

    pub fn dead_letter_count(&self) -> Result<u64, RouterError> {
        let conn = self.read_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // =========================================================================
    // MAINTENANCE (administrative, outside the core append/read contract)
    // =========================================================================

    /// Purge events and dead letters past their retention windows.
    /// Returns (events_purged, dead_letters_purged).
    pub fn purge_expired(
        &self,
        event_retention_days: i64,
        dead_letter_retention_days: i64,
    ) -> Result<(usize, usize), RouterError> {
        let event_cutoff = (Utc::now() - chrono::Duration::days(event_retention_days)).to_rfc3339();
        let dl_cutoff =
            (Utc::now() - chrono::Duration::days(dead_letter_retention_days)).to_rfc3339();

        let conn = self.write_conn()?;
        let events = conn.execute(
            "DELETE FROM events WHERE created_at < ?1",
            params![event_cutoff],
        )?;
        let dead_letters = conn.execute(
            "DELETE FROM dead_letters WHERE dead_lettered_at < ?1",
            params![dl_cutoff],
        )?;

        Ok((events, dead_letters))
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let version: i64 = row.get(0)?;
    let payload_text: String = row.get(3)?;
    let priority: u8 = row.get(4)?;
    let created_at_text: String = row.get(7)?;

    Ok(Event {
        version: version as u64,
        id: row.get(1)?,
        topic: row.get(2)?,
        payload: serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null),
        priority: Priority(priority),
        source: row.get(5)?,
        correlation_id: row.get(6)?,
        created_at: parse_timestamp(&created_at_text),
    })
}

fn row_to_dead_letter(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
    let payload_text: String = row.get(4)?;
    let priority: u8 = row.get(5)?;
    let event_version: i64 = row.get(2)?;
    let dead_lettered_at: String = row.get(9)?;

    Ok(DeadLetterEntry {
        entry_id: row.get(0)?,
        event_id: row.get(1)?,
        event_version: event_version as u64,
        topic: row.get(3)?,
        payload: serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null),
        priority: Priority(priority),
        client_id: row.get(6)?,
        attempt_count: row.get(7)?,
        last_error: row.get(8)?,
        dead_lettered_at: parse_timestamp(&dead_lettered_at),
    })
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(topic: &str, priority: Priority) -> Event {
        Event::accept(
            topic.to_string(),
            json!({"k": topic}),
            priority,
            Some("test".to_string()),
            None,
        )
    }

    #[test]
    fn test_append_assigns_monotonic_versions() {
        let store = EventStore::open_temporary().unwrap();

        let mut e1 = event("task.created", Priority::NORMAL);
        let mut e2 = event("task.completed", Priority::NORMAL);

        let v1 = store.append(&mut e1).unwrap();
        let v2 = store.append(&mut e2).unwrap();

        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(e1.version, 1);
        assert_eq!(store.latest_version().unwrap(), 2);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let store = EventStore::open_temporary().unwrap();

        let mut original = event("agent.status", Priority::HIGH);
        original.correlation_id = Some("corr-9".to_string());
        store.append(&mut original).unwrap();

        let read = store.read_range(&ReadFilter::default()).unwrap();
        assert_eq!(read.len(), 1);

        let back = &read[0];
        assert_eq!(back.id, original.id);
        assert_eq!(back.topic, original.topic);
        assert_eq!(back.payload, original.payload);
        assert_eq!(back.priority, original.priority);
        assert_eq!(back.version, original.version);
        assert_eq!(back.source, original.source);
        assert_eq!(back.correlation_id, original.correlation_id);
    }

    #[test]
    fn test_read_range_is_exclusive_below() {
        let store = EventStore::open_temporary().unwrap();
        for i in 0..15 {
            store.append(&mut event(&format!("t.{}", i), Priority::NORMAL)).unwrap();
        }

        // Acked through version 10: the range read returns 11..latest
        let filter = ReadFilter {
            from_version: Some(10),
            ..Default::default()
        };
        let events = store.read_range(&filter).unwrap();

        assert_eq!(events.len(), 5);
        assert_eq!(events.first().unwrap().version, 11);
        assert_eq!(events.last().unwrap().version, 15);
    }

    #[test]
    fn test_read_range_is_idempotent() {
        let store = EventStore::open_temporary().unwrap();
        for i in 0..5 {
            store.append(&mut event(&format!("t.{}", i), Priority::NORMAL)).unwrap();
        }

        let filter = ReadFilter {
            from_version: Some(1),
            to_version: Some(4),
            ..Default::default()
        };
        let first: Vec<u64> = store.read_range(&filter).unwrap().iter().map(|e| e.version).collect();
        let second: Vec<u64> = store.read_range(&filter).unwrap().iter().map(|e| e.version).collect();

        assert_eq!(first, vec![2, 3, 4]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_read_range_topic_and_priority_filters() {
        let store = EventStore::open_temporary().unwrap();
        store.append(&mut event("task.created", Priority::NORMAL)).unwrap();
        store.append(&mut event("task.created", Priority::CRITICAL)).unwrap();
        store.append(&mut event("agent.ready", Priority::CRITICAL)).unwrap();

        let filter = ReadFilter {
            topics: vec!["task.created".to_string()],
            min_priority: Some(Priority::HIGH),
            ..Default::default()
        };
        let events = store.read_range(&filter).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, "task.created");
        assert_eq!(events[0].priority, Priority::CRITICAL);
    }

    #[test]
    fn test_dead_letter_crud() {
        let store = EventStore::open_temporary().unwrap();

        let mut e = event("task.created", Priority::NORMAL);
        store.append(&mut e).unwrap();

        let entry_id = store
            .dead_letter_insert(&e, "c1", 5, "ack timeout")
            .unwrap();

        let listed = store.dead_letter_list(&DeadLetterFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].attempt_count, 5);
        assert_eq!(listed[0].client_id, "c1");

        let fetched = store.dead_letter_get(entry_id).unwrap();
        assert_eq!(fetched.event_id, e.id);

        store.dead_letter_delete(entry_id).unwrap();
        assert!(matches!(
            store.dead_letter_get(entry_id),
            Err(RouterError::DeadLetterNotFound(_))
        ));
    }

    #[test]
    fn test_dead_letter_list_filters_by_client() {
        let store = EventStore::open_temporary().unwrap();
        let mut e = event("task.created", Priority::NORMAL);
        store.append(&mut e).unwrap();

        store.dead_letter_insert(&e, "c1", 3, "timeout").unwrap();
        store.dead_letter_insert(&e, "c2", 3, "timeout").unwrap();

        let filter = DeadLetterFilter {
            client_id: Some("c2".to_string()),
            ..Default::default()
        };
        let listed = store.dead_letter_list(&filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].client_id, "c2");
    }
}
