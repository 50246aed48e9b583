//! Message repository: CRUD on the message row plus state transitions.
//!
//! Every public operation is serialised on a single mutex, giving
//! linearisable semantics across producer threads, the publisher loop, and
//! the housekeeper. Acceptable for a device-local spool, not for
//! throughput.

use crate::backend::Backend;
use crate::error::{Result, SpoolError};
use crate::message::{Message, MessageBuilder};
use crate::schema;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Priorities that bypass the capacity cap: 0 (lifecycle), 1 (remote
/// management).
const CAPACITY_BYPASS_PRIORITIES: [i64; 2] = [0, 1];

enum InsertOutcome {
    Id(i64),
    SequenceExhausted,
}

/// Policy for `repair()`'s duplicate-id cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairPolicy {
    /// Delete every row sharing a duplicated id (the historical behaviour).
    #[default]
    DeleteAllCopies,
    /// Keep only the row with the highest `createdOn` among each set of
    /// duplicates.
    KeepNewestCreatedOn,
}

/// The message repository.
///
/// Owns every row; no pointer or aliasing escapes. Values returned to
/// callers are snapshots, not live references to stored state.
pub struct Repository {
    backend: Backend,
    /// Serialises every operation. Also guards the cached capacity so a
    /// racing pair of `store` calls can't both observe `count < capacity`
    /// and both insert.
    lock: Mutex<()>,
    capacity: u64,
}

impl Repository {
    /// Open the spool at `database_path`, creating and migrating its schema
    /// as needed.
    pub fn open(database_path: impl AsRef<std::path::Path>, pool_size: u32, capacity: u64) -> Result<Self> {
        let backend = Backend::open(database_path, pool_size)?;
        {
            let conn = backend.connection()?;
            schema::init_schema(&conn)?;
        }
        Ok(Self {
            backend,
            lock: Mutex::new(()),
            capacity,
        })
    }

    /// Store a new message, returning the freshly loaded row.
    ///
    /// Priorities 0 and 1 bypass the capacity check; any other priority
    /// fails with `CapacityReached` once the row count reaches `capacity`.
    pub fn store(
        &self,
        topic: &str,
        payload: Option<Vec<u8>>,
        qos: u8,
        retain: bool,
        priority: i64,
    ) -> Result<Message> {
        if topic.trim().is_empty() {
            return Err(SpoolError::InvalidArgument("topic must not be empty".into()));
        }
        if qos > 2 {
            return Err(SpoolError::InvalidArgument(format!(
                "qos must be 0, 1, or 2, got {qos}"
            )));
        }

        let _guard = self.lock.lock();

        if !CAPACITY_BYPASS_PRIORITIES.contains(&priority) {
            let count = self.count_rows()?;
            if count >= self.capacity {
                return Err(SpoolError::CapacityReached {
                    capacity: self.capacity,
                    priority,
                });
            }
        }

        let created_on = Utc::now();
        let id = self.insert_with_identity_retry(topic, &payload, qos, retain, priority, created_on)?;

        self.get_locked(id)?.ok_or(SpoolError::NotFound(id))
    }

    fn count_rows(&self) -> Result<u64> {
        let conn = self.backend.connection()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(SpoolError::Backend)?;
        Ok(count as u64)
    }

    /// Insert a row, retrying exactly once after an identity-sequence reset
    /// if the sequence counter is exhausted.
    fn insert_with_identity_retry(
        &self,
        topic: &str,
        payload: &Option<Vec<u8>>,
        qos: u8,
        retain: bool,
        priority: i64,
        created_on: DateTime<Utc>,
    ) -> Result<i64> {
        match self.try_insert(topic, payload, qos, retain, priority, created_on)? {
            InsertOutcome::Id(id) => Ok(id),
            InsertOutcome::SequenceExhausted => {
                tracing::warn!("identity sequence exhausted, resetting and retrying insert once");
                self.reset_identity_sequence()?;
                match self.try_insert(topic, payload, qos, retain, priority, created_on)? {
                    InsertOutcome::Id(id) => Ok(id),
                    InsertOutcome::SequenceExhausted => Err(SpoolError::IdentityExhausted(
                        "sequence still exhausted immediately after reset".into(),
                    )),
                }
            }
        }
    }

    /// Allocate the next id from `messages_id_seq` and insert the row in the
    /// same transaction. A freshly reset counter can legally reuse an id
    /// still held by an older row — that collision is what `repair` exists
    /// to clean up, not something this insert prevents.
    fn try_insert(
        &self,
        topic: &str,
        payload: &Option<Vec<u8>>,
        qos: u8,
        retain: bool,
        priority: i64,
        created_on: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        self.backend.transaction(|conn| {
            let next_id: i64 = conn
                .query_row(
                    "SELECT next_id FROM messages_id_seq WHERE lock = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(SpoolError::Backend)?;

            if next_id == i64::MAX {
                return Ok(InsertOutcome::SequenceExhausted);
            }

            conn.execute(
                "UPDATE messages_id_seq SET next_id = ?1 WHERE lock = 0",
                params![next_id + 1],
            )
            .map_err(SpoolError::Backend)?;

            conn.execute(
                "INSERT INTO messages
                    (id, topic, qos, retain, priority, payload, createdOn, publishedMessageId)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, -1)",
                params![
                    next_id,
                    topic,
                    qos as i64,
                    retain,
                    priority,
                    payload,
                    created_on.to_rfc3339(),
                ],
            )
            .map_err(SpoolError::Backend)?;

            Ok(InsertOutcome::Id(next_id))
        })
    }

    /// Reseed the id counter to 1.
    ///
    /// `messages_id_seq` is read fresh on every insert rather than cached
    /// client-side, so this reset is immediately effective for the very
    /// next insert — unlike the Java original's H2 sequence cache, there's
    /// no separate in-memory state to desynchronize. It can, by design,
    /// hand out an id that still belongs to an older row; `repair` is the
    /// routine that reconciles that.
    fn reset_identity_sequence(&self) -> Result<()> {
        self.backend.transaction(|conn| {
            conn.execute("UPDATE messages_id_seq SET next_id = 1 WHERE lock = 0", [])
                .map_err(SpoolError::Backend)?;
            Ok(())
        })
    }

    /// Fetch a row (payload included) by id, or `None` if absent.
    pub fn get(&self, id: i64) -> Result<Option<Message>> {
        let _guard = self.lock.lock();
        self.get_locked(id)
    }

    fn get_locked(&self, id: i64) -> Result<Option<Message>> {
        let conn = self.backend.connection()?;
        conn.query_row(
            &format!("{SELECT_FULL} WHERE id = ?1"),
            params![id],
            row_to_message,
        )
        .optional()
        .map_err(SpoolError::Backend)
    }

    /// Return the highest-priority, oldest unpublished message, or `None`
    /// if the spool has nothing waiting.
    pub fn get_next(&self) -> Result<Option<Message>> {
        let _guard = self.lock.lock();
        let conn = self.backend.connection()?;
        conn.query_row(
            &format!(
                "{SELECT_FULL} WHERE publishedOn IS NULL
                 ORDER BY priority ASC, createdOn ASC LIMIT 1"
            ),
            [],
            row_to_message,
        )
        .optional()
        .map_err(SpoolError::Backend)
    }

    /// Mark a message published (fire-and-forget form).
    pub fn published(&self, id: i64) -> Result<()> {
        let _guard = self.lock.lock();
        self.backend.transaction(|conn| {
            conn.execute(
                "UPDATE messages SET publishedOn = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(SpoolError::Backend)?;
            Ok(())
        })
    }

    /// Mark a message published with the broker-assigned transport id and
    /// session id (QoS >= 1 form).
    pub fn published_with_broker_id(
        &self,
        id: i64,
        published_message_id: i64,
        session_id: &str,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        self.backend.transaction(|conn| {
            conn.execute(
                "UPDATE messages
                 SET publishedOn = ?1, publishedMessageId = ?2, sessionId = ?3
                 WHERE id = ?4",
                params![Utc::now().to_rfc3339(), published_message_id, session_id, id],
            )
            .map_err(SpoolError::Backend)?;
            Ok(())
        })
    }

    /// Mark a message confirmed.
    pub fn confirmed(&self, id: i64) -> Result<()> {
        let _guard = self.lock.lock();
        self.backend.transaction(|conn| {
            conn.execute(
                "UPDATE messages SET confirmedOn = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(SpoolError::Backend)?;
            Ok(())
        })
    }

    /// All unpublished rows, payload stripped, ordered `priority ASC, createdOn ASC`.
    pub fn all_unpublished_messages_no_payload(&self) -> Result<Vec<Message>> {
        let _guard = self.lock.lock();
        self.list_no_payload("publishedOn IS NULL")
    }

    /// All in-flight (published QoS>0, unresolved) rows, payload stripped.
    pub fn all_in_flight_messages_no_payload(&self) -> Result<Vec<Message>> {
        let _guard = self.lock.lock();
        self.list_no_payload(
            "publishedOn IS NOT NULL AND qos > 0 AND confirmedOn IS NULL AND droppedOn IS NULL",
        )
    }

    /// All dropped in-flight rows, payload stripped.
    pub fn all_dropped_in_flight_messages_no_payload(&self) -> Result<Vec<Message>> {
        let _guard = self.lock.lock();
        self.list_no_payload("droppedOn IS NOT NULL")
    }

    fn list_no_payload(&self, predicate: &str) -> Result<Vec<Message>> {
        let conn = self.backend.connection()?;
        let sql = format!(
            "{SELECT_NO_PAYLOAD} WHERE {predicate} ORDER BY priority ASC, createdOn ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(SpoolError::Backend)?;
        let rows = stmt
            .query_map([], row_to_message_no_payload)
            .map_err(SpoolError::Backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(SpoolError::Backend)
    }

    /// Rejoin uncommitted in-flight QoS>0 messages to the unpublished queue.
    /// Intended for session-resume after transport loss.
    pub fn unpublish_all_in_flight(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.backend.transaction(|conn| {
            conn.execute(
                "UPDATE messages SET publishedOn = NULL
                 WHERE publishedOn IS NOT NULL AND qos > 0 AND confirmedOn IS NULL",
                [],
            )
            .map_err(SpoolError::Backend)?;
            Ok(())
        })
    }

    /// Mark uncommitted in-flight QoS>0 messages dropped. Intended for
    /// session-abandon: retained for diagnostics until the purge horizon.
    pub fn drop_all_in_flight(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.backend.transaction(|conn| {
            conn.execute(
                "UPDATE messages SET droppedOn = ?1
                 WHERE publishedOn IS NOT NULL AND qos > 0 AND confirmedOn IS NULL",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(SpoolError::Backend)?;
            Ok(())
        })
    }

    /// Purge stale rows: dropped/confirmed older than `purge_age_secs`, and
    /// QoS=0 rows published longer than `purge_age_secs` ago.
    ///
    /// Each sweep independently falls back to a coarser yearly horizon if
    /// `purge_age_secs` overflows the interval arithmetic.
    pub fn delete_stale_messages(&self, purge_age_secs: i64) -> Result<u64> {
        let _guard = self.lock.lock();
        let mut total = 0u64;
        total += self.delete_stale_sweep("droppedOn", purge_age_secs)?;
        total += self.delete_stale_sweep("confirmedOn", purge_age_secs)?;
        total += self.delete_stale_qos0_sweep(purge_age_secs)?;
        Ok(total)
    }

    fn delete_stale_sweep(&self, column: &str, purge_age_secs: i64) -> Result<u64> {
        self.backend.transaction(|conn| {
            run_sweep(
                conn,
                &format!(
                    "DELETE FROM messages WHERE {column} IS NOT NULL AND {column} < ?1"
                ),
                &format!(
                    "DELETE FROM messages WHERE {column} IS NOT NULL
                     AND CAST(strftime('%Y', {column}) AS INTEGER) < ?1"
                ),
                purge_age_secs,
            )
        })
    }

    fn delete_stale_qos0_sweep(&self, purge_age_secs: i64) -> Result<u64> {
        self.backend.transaction(|conn| {
            run_sweep(
                conn,
                "DELETE FROM messages WHERE qos = 0 AND publishedOn IS NOT NULL AND publishedOn < ?1",
                "DELETE FROM messages WHERE qos = 0 AND publishedOn IS NOT NULL
                 AND CAST(strftime('%Y', publishedOn) AS INTEGER) < ?1",
                purge_age_secs,
            )
        })
    }

    /// Issue a routine WAL checkpoint (the SQLite analogue of `CHECKPOINT`).
    pub fn checkpoint(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.checkpoint_locked()
    }

    /// Body of `checkpoint()`. Caller must already hold `self.lock`.
    fn checkpoint_locked(&self) -> Result<()> {
        let conn = self.backend.connection()?;
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE)")
            .map_err(SpoolError::Backend)
    }

    /// Truncate the WAL and compact free pages (the SQLite analogue of
    /// `CHECKPOINT DEFRAG`).
    pub fn defrag(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.defrag_locked()
    }

    /// Body of `defrag()`. Caller must already hold `self.lock`.
    fn defrag_locked(&self) -> Result<()> {
        let conn = self.backend.connection()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;")
            .map_err(SpoolError::Backend)
    }

    /// Detect and remove duplicate-id rows, then rebuild the table.
    /// No-op on a corruption-free store.
    pub fn repair(&self) -> Result<u64> {
        self.repair_with_policy(RepairPolicy::default())
    }

    /// `repair()` with an explicit duplicate-cleanup policy.
    pub fn repair_with_policy(&self, policy: RepairPolicy) -> Result<u64> {
        let _guard = self.lock.lock();

        let duplicate_group_count: i64 = {
            let conn = self.backend.connection()?;
            conn.query_row(
                "SELECT COUNT(*) FROM (
                    SELECT id FROM messages GROUP BY id HAVING COUNT(id) > 1
                )",
                [],
                |row| row.get(0),
            )
            .map_err(SpoolError::Backend)?
        };

        if duplicate_group_count == 0 {
            return Ok(0);
        }

        tracing::warn!(
            "repair: found {duplicate_group_count} duplicated id(s), applying {policy:?}"
        );

        let deleted = self
            .backend
            .transaction(|conn| {
                let deleted = match policy {
                    RepairPolicy::DeleteAllCopies => conn
                        .execute(
                            "DELETE FROM messages WHERE id IN (
                                SELECT id FROM messages GROUP BY id HAVING COUNT(*) > 1
                            )",
                            [],
                        )
                        .map_err(SpoolError::Backend)?,
                    RepairPolicy::KeepNewestCreatedOn => conn
                        .execute(
                            "DELETE FROM messages WHERE rowid NOT IN (
                                SELECT MAX(rowid) FROM messages GROUP BY id
                             ) AND id IN (
                                SELECT id FROM messages GROUP BY id HAVING COUNT(*) > 1
                             )",
                            [],
                        )
                        .map_err(SpoolError::Backend)?,
                };

                rebuild_messages_table(conn)?;
                Ok(deleted as u64)
            })
            .map_err(|e| SpoolError::Corruption(e.to_string()))?;

        self.defrag_locked()
            .map_err(|e| SpoolError::Corruption(e.to_string()))?;

        Ok(deleted)
    }
}

/// Rebuild the `messages` table from scratch, copying only the rows that
/// survived deduplication. `id` carries no uniqueness constraint here (a
/// reset identity sequence is allowed to reissue an id still held by an
/// older row, per the capacity/identity policy), so this rebuild doesn't
/// reinstate one either — it exists to reclaim the space the deleted rows
/// held and leave the table in a clean, contiguous state after corruption.
fn rebuild_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE messages_rebuilt (
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
        INSERT INTO messages_rebuilt
            SELECT id, topic, qos, retain, priority, payload, createdOn,
                   publishedOn, publishedMessageId, sessionId, confirmedOn, droppedOn
            FROM messages;
        DROP TABLE messages;
        ALTER TABLE messages_rebuilt RENAME TO messages;
        CREATE INDEX IF NOT EXISTS messages_nextMsg
            ON messages (priority ASC, createdOn ASC, publishedOn, qos);",
    )
    .map_err(SpoolError::Backend)
}

/// Run a delete sweep, falling back to a yearly-horizon variant if the
/// primary statement reports an interval overflow (the local analogue of
/// the reference backend's `-3435`).
fn run_sweep(conn: &Connection, primary_sql: &str, yearly_sql: &str, purge_age_secs: i64) -> Result<u64> {
    let cutoff = match Utc::now().checked_sub_signed(chrono::Duration::seconds(purge_age_secs)) {
        Some(cutoff) => cutoff,
        None => {
            tracing::warn!("purge_age_secs={purge_age_secs} overflowed interval arithmetic, falling back to yearly horizon");
            let one_year_ago_year = (Utc::now().format("%Y").to_string().parse::<i64>().unwrap_or(9999)) - 1;
            return conn
                .execute(yearly_sql, params![one_year_ago_year])
                .map(|n| n as u64)
                .map_err(SpoolError::Backend);
        }
    };

    conn.execute(primary_sql, params![cutoff.to_rfc3339()])
        .map(|n| n as u64)
        .map_err(SpoolError::Backend)
}

const SELECT_FULL: &str = "SELECT id, topic, qos, retain, priority, payload, createdOn,
    publishedOn, publishedMessageId, sessionId, confirmedOn, droppedOn FROM messages";

const SELECT_NO_PAYLOAD: &str = "SELECT id, topic, qos, retain, priority, createdOn,
    publishedOn, publishedMessageId, sessionId, confirmedOn, droppedOn FROM messages";

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let created_on: String = row.get(6)?;
    Ok(MessageBuilder::new(row.get(0)?)
        .topic(row.get::<_, String>(1)?)
        .qos(row.get::<_, i64>(2)? as u8)
        .retain(row.get(3)?)
        .priority(row.get(4)?)
        .payload(row.get(5)?)
        .created_on(parse_ts(Some(created_on)).unwrap_or_else(Utc::now))
        .published_on(parse_ts(row.get(7)?))
        .published_message_id(row.get(8)?)
        .session_id(row.get(9)?)
        .confirmed_on(parse_ts(row.get(10)?))
        .dropped_on(parse_ts(row.get(11)?))
        .build())
}

fn row_to_message_no_payload(row: &Row) -> rusqlite::Result<Message> {
    let created_on: String = row.get(5)?;
    Ok(MessageBuilder::new(row.get(0)?)
        .topic(row.get::<_, String>(1)?)
        .qos(row.get::<_, i64>(2)? as u8)
        .retain(row.get(3)?)
        .priority(row.get(4)?)
        .payload(None)
        .created_on(parse_ts(Some(created_on)).unwrap_or_else(Utc::now))
        .published_on(parse_ts(row.get(6)?))
        .published_message_id(row.get(7)?)
        .session_id(row.get(8)?)
        .confirmed_on(parse_ts(row.get(9)?))
        .dropped_on(parse_ts(row.get(10)?))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn open_repo(capacity: u64) -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path().join("spool.db"), 4, capacity).unwrap();
        (dir, repo)
    }

    #[test]
    fn store_then_get_round_trips() {
        let (_dir, repo) = open_repo(10);
        let stored = repo
            .store("a/b", Some(b"hello".to_vec()), 1, false, 5)
            .unwrap();
        let fetched = repo.get(stored.id).unwrap().unwrap();
        assert_eq!(fetched.topic, "a/b");
        assert_eq!(fetched.payload, Some(b"hello".to_vec()));
        assert_eq!(fetched.qos, 1);
        assert_eq!(fetched.priority, 5);
    }

    #[test]
    fn empty_topic_is_rejected() {
        let (_dir, repo) = open_repo(10);
        let err = repo.store("   ", None, 0, false, 5).unwrap_err();
        assert!(matches!(err, SpoolError::InvalidArgument(_)));
    }

    // capacity=2, priority=5 twice, third fails, priority=0 still succeeds.
    #[test]
    fn capacity_cap_applies_to_application_priority_only() {
        let (_dir, repo) = open_repo(2);
        repo.store("a", None, 0, false, 5).unwrap();
        repo.store("b", None, 0, false, 5).unwrap();

        let err = repo.store("c", None, 0, false, 5).unwrap_err();
        assert!(matches!(err, SpoolError::CapacityReached { .. }));

        repo.store("lifecycle", None, 0, false, 0).unwrap();
        assert_eq!(repo.count_rows().unwrap(), 3);
    }

    #[test]
    fn capacity_bypass_never_fails_for_priority_zero_or_one() {
        let (_dir, repo) = open_repo(0);
        repo.store("a", None, 0, false, 0).unwrap();
        repo.store("b", None, 0, false, 1).unwrap();
    }

    // Ordering and in-flight listing.
    #[test]
    fn get_next_orders_by_priority_then_age() {
        let (_dir, repo) = open_repo(100);
        let a = repo.store("A", None, 0, false, 3).unwrap();
        let b = repo.store("B", None, 1, false, 2).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let c = repo.store("C", None, 1, false, 2).unwrap();

        let next = repo.get_next().unwrap().unwrap();
        assert_eq!(next.id, b.id);

        repo.published_with_broker_id(b.id, 42, "sess-1").unwrap();

        let next = repo.get_next().unwrap().unwrap();
        assert_eq!(next.id, c.id);

        repo.confirmed(b.id).unwrap();

        let in_flight = repo.all_in_flight_messages_no_payload().unwrap();
        assert_eq!(in_flight.len(), 0, "C hasn't been published yet");

        repo.published(c.id).unwrap();
        let in_flight = repo.all_in_flight_messages_no_payload().unwrap();
        assert_eq!(in_flight.iter().map(|m| m.id).collect::<Vec<_>>(), vec![c.id]);

        // `a` is still unpublished the whole time.
        let unpublished = repo.all_unpublished_messages_no_payload().unwrap();
        assert_eq!(unpublished.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a.id]);
    }

    // Purge a fire-and-forget QoS=0 row by age.
    #[test]
    fn delete_stale_messages_purges_old_qos0_rows() {
        let (_dir, repo) = open_repo(100);
        let m = repo.store("a", None, 0, false, 5).unwrap();
        repo.published(m.id).unwrap();

        // Simulate the purge horizon having already elapsed by back-dating
        // publishedOn directly (no clock injection in this repository).
        {
            let conn = repo.backend.connection().unwrap();
            conn.execute(
                "UPDATE messages SET publishedOn = ?1 WHERE id = ?2",
                params![(Utc::now() - chrono::Duration::seconds(120)).to_rfc3339(), m.id],
            )
            .unwrap();
        }

        let deleted = repo.delete_stale_messages(60).unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get(m.id).unwrap().is_none());
    }

    // Dropped rows still count against capacity.
    #[test]
    fn dropped_rows_still_count_against_capacity() {
        let (_dir, repo) = open_repo(1);
        let m = repo.store("a", None, 1, false, 5).unwrap();
        repo.published(m.id).unwrap();
        repo.drop_all_in_flight().unwrap();

        let fetched = repo.get(m.id).unwrap().unwrap();
        assert!(fetched.dropped_on.is_some());

        let err = repo.store("b", None, 0, false, 5).unwrap_err();
        assert!(matches!(err, SpoolError::CapacityReached { .. }));
    }

    #[test]
    fn unpublish_all_in_flight_rejoins_the_unpublished_queue() {
        let (_dir, repo) = open_repo(100);
        let a = repo.store("a", None, 1, false, 2).unwrap();
        repo.published(a.id).unwrap();

        repo.unpublish_all_in_flight().unwrap();

        let fetched = repo.get(a.id).unwrap().unwrap();
        assert!(fetched.published_on.is_none());

        let next = repo.get_next().unwrap().unwrap();
        assert_eq!(next.id, a.id);
    }

    // Repair removes every copy of a duplicated id.
    #[test]
    fn repair_removes_all_copies_of_duplicated_ids() {
        let (_dir, repo) = open_repo(100);
        repo.store("kept", None, 0, false, 5).unwrap();

        {
            let conn = repo.backend.connection().unwrap();
            conn.execute(
                "INSERT INTO messages (id, topic, qos, retain, priority, createdOn, publishedMessageId)
                 VALUES (7, 'dup-a', 0, 0, 5, ?1, -1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO messages (id, topic, qos, retain, priority, createdOn, publishedMessageId)
                 VALUES (7, 'dup-b', 0, 0, 5, ?1, -1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        assert_eq!(repo.count_rows().unwrap(), 3);

        let deleted = repo.repair().unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.count_rows().unwrap(), 1);
        assert!(repo.get(7).unwrap().is_none());

        // The table is still usable after the rebuild: a subsequent store
        // still succeeds and gets a fresh id.
        let stored = repo.store("after-repair", None, 0, false, 5).unwrap();
        assert_ne!(stored.id, 7);
    }

    #[test]
    fn identity_reset_can_collide_with_an_existing_row_and_repair_fixes_it() {
        let (_dir, repo) = open_repo(100);
        let old = repo.store("old", None, 0, false, 5).unwrap();

        repo.reset_identity_sequence().unwrap();
        let reused = repo.store("reused-id", None, 0, false, 5).unwrap();
        assert_eq!(reused.id, old.id, "a reset counter reissues ids from 1");

        assert_eq!(repo.count_rows().unwrap(), 2);
        let deleted = repo.repair().unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.count_rows().unwrap(), 0);
    }

    #[test]
    fn repair_is_a_no_op_on_a_clean_store() {
        let (_dir, repo) = open_repo(100);
        repo.store("a", None, 0, false, 5).unwrap();
        repo.store("b", None, 0, false, 5).unwrap();

        let deleted = repo.repair().unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(repo.count_rows().unwrap(), 2);
    }
}
