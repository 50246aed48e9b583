//! Schema manager: creates/upgrades the `messages` table and its index,
//! tolerating re-runs.
//!
//! Follows the versioned-migration shape the rest of this codebase uses for
//! its own SQLite schemas (a `schema_version` row in a metadata table,
//! `migrate_vN_to_vN+1` functions applied in order), even though the spool
//! currently only needs one migration step.
//!
//! `id` is deliberately not declared `PRIMARY KEY`: it is assigned by the
//! repository from `messages_id_seq`, a single-row counter table, rather
//! than by SQLite's own `AUTOINCREMENT`. That keeps id assignment and id
//! uniqueness as separate concerns, which is what lets a sequence reset
//! actually collide with a still-resident row instead of being rejected
//! outright by a primary-key constraint.

use crate::error::{Result, SpoolError};
use rusqlite::Connection;

const LEGACY_INDEX: &str = "messages_publishedOn";
const NEXT_MSG_INDEX: &str = "messages_nextMsg";

/// Create the schema if absent and apply any pending migrations.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS spool_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
    .map_err(SpoolError::Backend)?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(
                (SELECT CAST(value AS INTEGER) FROM spool_metadata WHERE key = 'schema_version'),
                0
            )",
            [],
            |row| row.get(0),
        )
        .map_err(SpoolError::Backend)?;

    if current_version < 1 {
        apply_schema_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v1_to_v2(conn)?;
    }

    Ok(())
}

/// Initial schema (v1): the `messages` table, its id sequence, and their
/// supporting indexes.
fn apply_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER NOT NULL,
            topic TEXT NOT NULL,
            qos INTEGER NOT NULL,
            retain INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            payload BLOB,
            createdOn TEXT NOT NULL,
            publishedOn TEXT,
            publishedMessageId INTEGER NOT NULL DEFAULT -1,
            sessionId TEXT,
            confirmedOn TEXT,
            droppedOn TEXT
        );

        CREATE TABLE IF NOT EXISTS messages_id_seq (
            lock INTEGER PRIMARY KEY CHECK (lock = 0),
            next_id INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO messages_id_seq (lock, next_id) VALUES (0, 1);

        INSERT INTO spool_metadata (key, value) VALUES ('schema_version', '1')
            ON CONFLICT(key) DO UPDATE SET value = '1';",
    )
    .map_err(SpoolError::Backend)?;

    tracing::info!("spool schema initialized at version 1");
    Ok(())
}

/// Migration from v1 to v2: drop the legacy index (if present from an
/// earlier deployment) and create the composite `messages_nextMsg` index
/// that `Repository::get_next` relies on.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute(&format!("DROP INDEX IF EXISTS {LEGACY_INDEX}"), [])
        .map_err(SpoolError::Backend)?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS {NEXT_MSG_INDEX}
             ON messages (priority ASC, createdOn ASC, publishedOn, qos)"
        ),
        [],
    )
    .map_err(SpoolError::Backend)?;

    conn.execute(
        "UPDATE spool_metadata SET value = '2' WHERE key = 'schema_version'",
        [],
    )
    .map_err(SpoolError::Backend)?;

    tracing::info!("migrated spool schema from v1 to v2 (index {NEXT_MSG_INDEX})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
                [NEXT_MSG_INDEX],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
    }

    #[test]
    fn legacy_index_is_dropped_if_present() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE messages (
                id INTEGER NOT NULL,
                topic TEXT NOT NULL,
                qos INTEGER NOT NULL,
                retain INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                payload BLOB,
                createdOn TEXT NOT NULL,
                publishedOn TEXT,
                publishedMessageId INTEGER NOT NULL DEFAULT -1,
                sessionId TEXT,
                confirmedOn TEXT,
                droppedOn TEXT
             );
             CREATE INDEX messages_publishedOn ON messages(publishedOn);",
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
                [LEGACY_INDEX],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
