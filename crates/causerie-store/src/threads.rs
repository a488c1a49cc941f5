//! CRUD operations for [`ChatThread`] records.

use causerie_shared::types::{ChatId, PairKey};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ChatThread, Side};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new thread.
    ///
    /// Returns [`StoreError::DuplicateThread`] if a thread for the same
    /// unordered pair already exists, so the caller can re-read and adopt
    /// the winner of the race.
    pub fn create_thread(&self, thread: &ChatThread) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO threads
                 (id, user_a, user_b, created_at,
                  deleted_by_a, deleted_at_a, deleted_by_b, deleted_at_b)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                thread.id.0.to_string(),
                thread.user_a.0,
                thread.user_b.0,
                thread.created_at.to_rfc3339(),
                thread.deleted_by_a,
                thread.deleted_at_a.map(|t| t.to_rfc3339()),
                thread.deleted_by_b,
                thread.deleted_at_b.map(|t| t.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateThread)
            }
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single thread by id.
    pub fn get_thread(&self, id: ChatId) -> Result<ChatThread> {
        self.conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_thread,
            )
            .map_err(not_found)
    }

    /// Look up the thread for an unordered pair, if any.  The pair is
    /// normalized, so `find_thread(A, B)` and `find_thread(B, A)` hit the
    /// same row.
    pub fn find_thread(&self, pair: PairKey) -> Result<Option<ChatThread>> {
        let result = self.conn().query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE user_a = ?1 AND user_b = ?2"),
            params![pair.low().0, pair.high().0],
            row_to_thread,
        );

        match result {
            Ok(thread) => Ok(Some(thread)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    // ------------------------------------------------------------------
    // Soft delete / restore
    // ------------------------------------------------------------------

    /// Set one side's delete flag and timestamp.  A no-op when the flag is
    /// already set (the original timestamp is kept).  Returns the updated
    /// row.
    pub fn set_thread_deleted(
        &self,
        id: ChatId,
        side: Side,
        at: DateTime<Utc>,
    ) -> Result<ChatThread> {
        let sql = match side {
            Side::A => {
                "UPDATE threads SET deleted_by_a = 1, deleted_at_a = ?2
                 WHERE id = ?1 AND deleted_by_a = 0"
            }
            Side::B => {
                "UPDATE threads SET deleted_by_b = 1, deleted_at_b = ?2
                 WHERE id = ?1 AND deleted_by_b = 0"
            }
        };
        self.conn()
            .execute(sql, params![id.0.to_string(), at.to_rfc3339()])?;
        self.get_thread(id)
    }

    /// Clear one side's delete flag.  The stale timestamp column is left
    /// untouched; it keeps bounding that side's history view.
    pub fn clear_thread_deleted(&self, id: ChatId, side: Side) -> Result<ChatThread> {
        let sql = match side {
            Side::A => "UPDATE threads SET deleted_by_a = 0 WHERE id = ?1",
            Side::B => "UPDATE threads SET deleted_by_b = 0 WHERE id = ?1",
        };
        self.conn().execute(sql, params![id.0.to_string()])?;
        self.get_thread(id)
    }

    // ------------------------------------------------------------------
    // Hard delete
    // ------------------------------------------------------------------

    /// Irreversibly purge a thread together with its messages and
    /// attachments.  The cascading foreign keys make this a single
    /// statement, so the purge is atomic.
    pub fn purge_thread(&self, id: ChatId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM threads WHERE id = ?1", params![id.0.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const THREAD_COLUMNS: &str = "id, user_a, user_b, created_at, \
     deleted_by_a, deleted_at_a, deleted_by_b, deleted_at_b";

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to a [`ChatThread`].
fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatThread> {
    use causerie_shared::types::UserId;

    let id_str: String = row.get(0)?;
    let user_a: i64 = row.get(1)?;
    let user_b: i64 = row.get(2)?;
    let created_str: String = row.get(3)?;
    let deleted_by_a: bool = row.get(4)?;
    let deleted_at_a: Option<String> = row.get(5)?;
    let deleted_by_b: bool = row.get(6)?;
    let deleted_at_b: Option<String> = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion(0, e))?;

    Ok(ChatThread {
        id: ChatId(id),
        user_a: UserId(user_a),
        user_b: UserId(user_b),
        created_at: parse_ts(&created_str).map_err(|e| conversion(3, e))?,
        deleted_by_a,
        deleted_at_a: parse_opt_ts(deleted_at_a).map_err(|e| conversion(5, e))?,
        deleted_by_b,
        deleted_at_b: parse_opt_ts(deleted_at_b).map_err(|e| conversion(7, e))?,
    })
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

pub(crate) fn conversion(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::types::UserId;

    fn open() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_find_is_order_independent() {
        let db = open();
        let pair = PairKey::new(UserId(1), UserId(2));
        let thread = ChatThread::new(pair, Utc::now());
        db.create_thread(&thread).unwrap();

        let forward = db.find_thread(PairKey::new(UserId(1), UserId(2))).unwrap();
        let reverse = db.find_thread(PairKey::new(UserId(2), UserId(1))).unwrap();
        assert_eq!(forward.as_ref().map(|t| t.id), Some(thread.id));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let db = open();
        let pair = PairKey::new(UserId(1), UserId(2));
        db.create_thread(&ChatThread::new(pair, Utc::now())).unwrap();

        let err = db
            .create_thread(&ChatThread::new(pair, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateThread));
    }

    #[test]
    fn soft_delete_is_idempotent_per_side() {
        let db = open();
        let thread = ChatThread::new(PairKey::new(UserId(1), UserId(2)), Utc::now());
        db.create_thread(&thread).unwrap();

        let first = Utc::now();
        let updated = db.set_thread_deleted(thread.id, Side::A, first).unwrap();
        assert!(updated.deleted_by_a);
        let original_stamp = updated.deleted_at_a;

        // Re-deleting the same side keeps the original timestamp.
        let later = first + chrono::Duration::seconds(60);
        let again = db.set_thread_deleted(thread.id, Side::A, later).unwrap();
        assert_eq!(again.deleted_at_a, original_stamp);
        assert!(!again.deleted_by_b);
    }

    #[test]
    fn clear_keeps_the_timestamp() {
        let db = open();
        let thread = ChatThread::new(PairKey::new(UserId(1), UserId(2)), Utc::now());
        db.create_thread(&thread).unwrap();

        let deleted = db
            .set_thread_deleted(thread.id, Side::B, Utc::now())
            .unwrap();
        let restored = db.clear_thread_deleted(thread.id, Side::B).unwrap();
        assert!(!restored.deleted_by_b);
        assert_eq!(restored.deleted_at_b, deleted.deleted_at_b);
    }

    #[test]
    fn purge_removes_the_thread() {
        let db = open();
        let thread = ChatThread::new(PairKey::new(UserId(1), UserId(2)), Utc::now());
        db.create_thread(&thread).unwrap();

        assert!(db.purge_thread(thread.id).unwrap());
        assert!(matches!(db.get_thread(thread.id), Err(StoreError::NotFound)));
        // A second purge finds nothing.
        assert!(!db.purge_thread(thread.id).unwrap());
    }
}
