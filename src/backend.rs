//! Storage backend adapter: pools connections, executes parameterised
//! statements, rolls back on error.
//!
//! Every logical operation runs in a single short transaction: acquire a
//! pooled connection, execute, commit (or rollback), release. Autocommit is
//! off for the duration of each transaction; commits are explicit.

use crate::error::{Result, SpoolError};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

/// A pooled connection to the spool's SQLite database.
pub struct Backend {
    pool: Pool<SqliteConnectionManager>,
}

impl Backend {
    /// Open (creating if necessary) the database at `db_path` and build a
    /// bounded connection pool around it.
    pub fn open(db_path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;
                 PRAGMA foreign_keys=ON;",
            )
        });

        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        // Verify the pool can actually produce a working connection before
        // handing it back to the caller.
        let conn = pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;

        Ok(Self { pool })
    }

    /// Acquire a pooled connection.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err`. The connection is always released back to the pool on return.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(SpoolError::Backend)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(SpoolError::Backend)?;
                Ok(value)
            }
            Err(e) => {
                // rollback() consumes the transaction; its own failure is
                // not more informative than the original error, so it is
                // logged rather than propagated.
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!("rollback failed after error {e}: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_a_working_pool() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::open(dir.path().join("test.db"), 2).unwrap();
        let conn = backend.connection().unwrap();
        let value: i32 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::open(dir.path().join("test.db"), 2).unwrap();
        backend
            .transaction(|conn| {
                conn.execute_batch("CREATE TABLE t (x INTEGER)")
                    .map_err(SpoolError::Backend)
            })
            .unwrap();

        let result: Result<()> = backend.transaction(|conn| {
            conn.execute("INSERT INTO t (x) VALUES (1)", [])
                .map_err(SpoolError::Backend)?;
            Err(SpoolError::InvalidArgument("force rollback".into()))
        });
        assert!(result.is_err());

        let conn = backend.connection().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
