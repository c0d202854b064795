use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use eventd_core::{Definer, EventKey, EventRecord, EventStatus, RoutineBody};

use crate::db::init_db;
use crate::error::{CatalogError, Result};

/// Durable store of event definitions, as seen by the scheduler.
///
/// The DDL layer mutates the catalog through its own transaction machinery;
/// the scheduler reads it at start (`scan_enabled`), writes back runtime
/// state after each firing (`update_runtime`), and deletes rows whose
/// on-completion policy is DROP. The store never calls back into the
/// scheduler.
pub trait CatalogStore: Send + Sync {
    /// Look up a row by identity.
    fn find(&self, key: &EventKey) -> Result<Option<EventRecord>>;

    /// Insert a new row. Fails with `DuplicateName` if the identity exists.
    fn insert(&self, record: &EventRecord) -> Result<()>;

    /// Replace the row at `old_key` with `record`. A differing
    /// `record.key` performs a rename. Fails with `NotFound`.
    fn update(&self, old_key: &EventKey, record: &EventRecord) -> Result<()>;

    /// Persist only the fields the scheduler owns after a firing, so a
    /// concurrent ALTER to body/definer is never clobbered.
    fn update_runtime(
        &self,
        key: &EventKey,
        last_executed: Option<DateTime<Utc>>,
        next_execution: Option<DateTime<Utc>>,
        status: EventStatus,
    ) -> Result<()>;

    /// Delete the row. Fails with `NotFound` if absent.
    fn delete(&self, key: &EventKey) -> Result<()>;

    /// All rows with `status = 'enabled'`, in catalog order.
    fn scan_enabled(&self) -> Result<Vec<EventRecord>>;
}

const SELECT_COLUMNS: &str = "schema_name, event_name, definer_user, definer_host, body, \
     schedule, status, on_completion, last_executed, next_execution, created, modified";

/// SQLite-backed catalog.
///
/// Wraps a single connection in a `Mutex`. The scheduler issues short
/// point queries and the bulk scan happens once per start, so a pool is
/// not worth the complexity here.
pub struct SqliteCatalog {
    db: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Open (or create) the catalog database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    /// Fresh in-memory catalog, used by tests and embedded setups.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn is_duplicate(e: &rusqlite::Error) -> bool {
        matches!(
            e,
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl CatalogStore for SqliteCatalog {
    fn find(&self, key: &EventKey) -> Result<Option<EventRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE schema_name = ?1 AND event_name = ?2"
        );
        match db.query_row(&sql, rusqlite::params![key.schema, key.name], row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CatalogError::Database(e)),
        }
    }

    fn insert(&self, record: &EventRecord) -> Result<()> {
        let schedule_json = serde_json::to_string(&record.schedule)
            .map_err(|e| CatalogError::Corrupt(e.to_string()))?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO events
             (schema_name, event_name, definer_user, definer_host, body, schedule,
              status, on_completion, last_executed, next_execution, created, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                record.key.schema,
                record.key.name,
                record.definer.user,
                record.definer.host,
                record.body.as_str(),
                schedule_json,
                record.status.to_string(),
                record.on_completion.to_string(),
                record.last_executed.map(|t| t.to_rfc3339()),
                record.next_execution.map(|t| t.to_rfc3339()),
                record.created.to_rfc3339(),
                record.modified.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            if Self::is_duplicate(&e) {
                CatalogError::DuplicateName {
                    key: record.key.clone(),
                }
            } else {
                CatalogError::Database(e)
            }
        })?;
        debug!(key = %record.key, "event row inserted");
        Ok(())
    }

    fn update(&self, old_key: &EventKey, record: &EventRecord) -> Result<()> {
        let schedule_json = serde_json::to_string(&record.schedule)
            .map_err(|e| CatalogError::Corrupt(e.to_string()))?;
        let db = self.db.lock().unwrap();
        let rows_changed = db
            .execute(
                "UPDATE events
                 SET schema_name = ?1, event_name = ?2, definer_user = ?3, definer_host = ?4,
                     body = ?5, schedule = ?6, status = ?7, on_completion = ?8,
                     last_executed = ?9, next_execution = ?10, modified = ?11
                 WHERE schema_name = ?12 AND event_name = ?13",
                rusqlite::params![
                    record.key.schema,
                    record.key.name,
                    record.definer.user,
                    record.definer.host,
                    record.body.as_str(),
                    schedule_json,
                    record.status.to_string(),
                    record.on_completion.to_string(),
                    record.last_executed.map(|t| t.to_rfc3339()),
                    record.next_execution.map(|t| t.to_rfc3339()),
                    record.modified.to_rfc3339(),
                    old_key.schema,
                    old_key.name,
                ],
            )
            .map_err(|e| {
                // Rename onto an existing identity trips the primary key.
                if Self::is_duplicate(&e) {
                    CatalogError::DuplicateName {
                        key: record.key.clone(),
                    }
                } else {
                    CatalogError::Database(e)
                }
            })?;
        if rows_changed == 0 {
            return Err(CatalogError::NotFound {
                key: old_key.clone(),
            });
        }
        Ok(())
    }

    fn update_runtime(
        &self,
        key: &EventKey,
        last_executed: Option<DateTime<Utc>>,
        next_execution: Option<DateTime<Utc>>,
        status: EventStatus,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE events
             SET last_executed = ?1, next_execution = ?2, status = ?3, modified = ?4
             WHERE schema_name = ?5 AND event_name = ?6",
            rusqlite::params![
                last_executed.map(|t| t.to_rfc3339()),
                next_execution.map(|t| t.to_rfc3339()),
                status.to_string(),
                Utc::now().to_rfc3339(),
                key.schema,
                key.name,
            ],
        )?;
        if rows_changed == 0 {
            return Err(CatalogError::NotFound { key: key.clone() });
        }
        Ok(())
    }

    fn delete(&self, key: &EventKey) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "DELETE FROM events WHERE schema_name = ?1 AND event_name = ?2",
            rusqlite::params![key.schema, key.name],
        )?;
        if rows_changed == 0 {
            return Err(CatalogError::NotFound { key: key.clone() });
        }
        debug!(key = %key, "event row deleted");
        Ok(())
    }

    fn scan_enabled(&self) -> Result<Vec<EventRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE status = 'enabled'
             ORDER BY schema_name, event_name"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

/// Map a SELECT row (column order from SELECT_COLUMNS) to an EventRecord.
/// Centralised here so every query in this crate stays consistent.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    use std::str::FromStr;

    let schedule_json: String = row.get(5)?;
    let schedule = serde_json::from_str(&schedule_json)
        .map_err(|e| conversion_err(5, Box::new(e)))?;
    let status = EventStatus::from_str(&row.get::<_, String>(6)?)
        .map_err(|e| conversion_err(6, e.into()))?;
    let on_completion = eventd_core::OnCompletion::from_str(&row.get::<_, String>(7)?)
        .map_err(|e| conversion_err(7, e.into()))?;

    Ok(EventRecord {
        key: EventKey {
            schema: row.get(0)?,
            name: row.get(1)?,
        },
        definer: Definer {
            user: row.get(2)?,
            host: row.get(3)?,
        },
        body: RoutineBody::new(row.get::<_, String>(4)?),
        schedule,
        status,
        on_completion,
        last_executed: parse_optional_ts(row, 8)?,
        next_execution: parse_optional_ts(row, 9)?,
        created: parse_ts(row, 10)?,
        modified: parse_ts(row, 11)?,
    })
}

fn parse_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, Box::new(e)))
}

fn parse_optional_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| conversion_err(idx, Box::new(e))),
    }
}

fn conversion_err(
    idx: usize,
    e: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e)
}
