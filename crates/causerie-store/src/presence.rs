//! Durable presence state.

use causerie_shared::types::UserId;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::PresenceRecord;
use crate::threads::parse_opt_ts;

impl Database {
    /// Write a presence transition.  `last_seen` must be `None` while
    /// online and the transition time when going offline.
    pub fn upsert_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO presence (user_id, is_online, last_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE
                 SET is_online = excluded.is_online,
                     last_seen = excluded.last_seen",
            params![user_id.0, is_online, last_seen.map(|t| t.to_rfc3339())],
        )?;
        Ok(())
    }

    /// Read durable presence state for a user, if ever recorded.
    pub fn get_presence(&self, user_id: UserId) -> Result<Option<PresenceRecord>> {
        let result = self.conn().query_row(
            "SELECT user_id, is_online, last_seen FROM presence WHERE user_id = ?1",
            params![user_id.0],
            |row| {
                let user: i64 = row.get(0)?;
                let is_online: bool = row.get(1)?;
                let last_seen: Option<String> = row.get(2)?;
                Ok((user, is_online, last_seen))
            },
        );

        match result {
            Ok((user, is_online, last_seen)) => Ok(Some(PresenceRecord {
                user_id: UserId(user),
                is_online,
                last_seen: parse_opt_ts(last_seen)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_transitions() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId(7);

        assert!(db.get_presence(user).unwrap().is_none());

        db.upsert_presence(user, true, None).unwrap();
        let online = db.get_presence(user).unwrap().unwrap();
        assert!(online.is_online);
        assert!(online.last_seen.is_none());

        let seen = Utc::now();
        db.upsert_presence(user, false, Some(seen)).unwrap();
        let offline = db.get_presence(user).unwrap().unwrap();
        assert!(!offline.is_online);
        assert!(offline.last_seen.is_some());
    }
}
