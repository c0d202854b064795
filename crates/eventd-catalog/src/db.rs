use rusqlite::Connection;

use crate::error::Result;

/// Initialise the catalog schema in `conn`.
///
/// Creates the `events` table (idempotent) and an index on `status` so the
/// bulk-load scan at scheduler start stays efficient with a large catalog.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            schema_name    TEXT NOT NULL,
            event_name     TEXT NOT NULL,
            definer_user   TEXT NOT NULL,
            definer_host   TEXT NOT NULL,
            body           TEXT NOT NULL,   -- opaque routine text
            schedule       TEXT NOT NULL,   -- JSON-encoded EventSchedule enum
            status         TEXT NOT NULL DEFAULT 'enabled',
            on_completion  TEXT NOT NULL DEFAULT 'preserve',
            last_executed  TEXT,            -- RFC 3339 or NULL
            next_execution TEXT,            -- RFC 3339 or NULL
            created        TEXT NOT NULL,
            modified       TEXT NOT NULL,
            PRIMARY KEY (schema_name, event_name)
        ) STRICT;

        -- Bulk load: SELECT … WHERE status = 'enabled'
        CREATE INDEX IF NOT EXISTS idx_events_status ON events (status);
        ",
    )?;
    Ok(())
}
