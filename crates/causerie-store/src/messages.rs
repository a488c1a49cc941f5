//! CRUD operations for [`Message`] and [`MediaAttachment`] records.

use causerie_shared::protocol::{MediaKind, MessageKind};
use causerie_shared::types::{AttachmentId, ChatId, MessageId, PairKey, UserId};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MediaAttachment, Message};
use crate::threads::{conversion, parse_opt_ts, parse_ts};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new message.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, thread_id, sender_id, kind, content, created_at,
                  read_at, is_edited, is_unsent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.0.to_string(),
                message.thread_id.0.to_string(),
                message.sender_id.0,
                message.kind.as_str(),
                message.content,
                message.created_at.to_rfc3339(),
                message.read_at.map(|t| t.to_rfc3339()),
                message.is_edited,
                message.is_unsent,
            ],
        )?;
        Ok(())
    }

    /// Insert the attachments of a message.  This is the follow-up write
    /// keyed by the already-persisted message id.
    pub fn insert_attachments(&self, attachments: &[MediaAttachment]) -> Result<()> {
        for attachment in attachments {
            self.conn().execute(
                "INSERT INTO attachments (id, message_id, url, kind)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    attachment.id.0.to_string(),
                    attachment.message_id.0.to_string(),
                    attachment.url,
                    attachment.kind.as_str(),
                ],
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by id.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Attachments of one message.
    pub fn attachments_of(&self, message_id: MessageId) -> Result<Vec<MediaAttachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, url, kind FROM attachments WHERE message_id = ?1",
        )?;
        let rows = stmt.query_map(params![message_id.0.to_string()], row_to_attachment)?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    /// The page of messages a given side of the thread is allowed to see.
    ///
    /// Excludes unsent messages and messages strictly before the caller's
    /// delete-timestamp bound, newest first.  This is the single filter
    /// behind both the paginated REST query and the hub-based fetch.
    pub fn visible_messages(
        &self,
        thread_id: ChatId,
        lower_bound: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE thread_id = ?1
               AND is_unsent = 0
               AND (?2 IS NULL OR created_at >= ?2)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let offset = page.saturating_mul(page_size);
        let rows = stmt.query_map(
            params![
                thread_id.0.to_string(),
                lower_bound.map(|t| t.to_rfc3339()),
                page_size,
                offset,
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Whether any message exists between the pair, in either direction.
    /// Unsent messages still count; they are prior contact.
    pub fn message_exists_between(&self, pair: PairKey) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM messages m
                 JOIN threads t ON m.thread_id = t.id
                 WHERE t.user_a = ?1 AND t.user_b = ?2
             )",
            params![pair.low().0, pair.high().0],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Unread messages addressed to `user` in a thread, excluding unsent.
    pub fn unread_count(&self, thread_id: ChatId, user: UserId) -> Result<u64> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE thread_id = ?1
               AND sender_id != ?2
               AND read_at IS NULL
               AND is_unsent = 0",
            params![thread_id.0.to_string(), user.0],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total stored rows for a thread, unsent included.  Audit surface.
    pub fn stored_message_count(&self, thread_id: ChatId) -> Result<u64> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
            params![thread_id.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Replace a message's content and mark it edited.
    pub fn set_message_content(&self, id: MessageId, content: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?2, is_edited = 1 WHERE id = ?1",
            params![id.0.to_string(), content],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Mark a message unsent.  The row is retained for audit.
    pub fn set_message_unsent(&self, id: MessageId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_unsent = 1 WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Batch-mark every unread message in the thread that was not sent by
    /// `reader`.  Returns only the rows actually transitioned, so a
    /// repeated call returns an empty vec and the caller emits no event.
    pub fn mark_thread_read(
        &self,
        thread_id: ChatId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE thread_id = ?1
               AND sender_id != ?2
               AND read_at IS NULL
               AND is_unsent = 0
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(
            params![thread_id.0.to_string(), reader.0],
            row_to_message,
        )?;

        let mut marked = Vec::new();
        for row in rows {
            let mut message: Message = row?;
            message.read_at = Some(at);
            marked.push(message);
        }
        drop(stmt);

        if !marked.is_empty() {
            self.conn().execute(
                "UPDATE messages SET read_at = ?3
                 WHERE thread_id = ?1
                   AND sender_id != ?2
                   AND read_at IS NULL
                   AND is_unsent = 0",
                params![thread_id.0.to_string(), reader.0, at.to_rfc3339()],
            )?;
        }

        Ok(marked)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MESSAGE_COLUMNS: &str =
    "id, thread_id, sender_id, kind, content, created_at, read_at, is_edited, is_unsent";

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let thread_str: String = row.get(1)?;
    let sender_id: i64 = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let content: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let read_str: Option<String> = row.get(6)?;
    let is_edited: bool = row.get(7)?;
    let is_unsent: bool = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion(0, e))?;
    let thread_id = Uuid::parse_str(&thread_str).map_err(|e| conversion(1, e))?;
    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message kind: {kind_str}").into(),
        )
    })?;

    Ok(Message {
        id: MessageId(id),
        thread_id: ChatId(thread_id),
        sender_id: UserId(sender_id),
        kind,
        content,
        created_at: parse_ts(&created_str).map_err(|e| conversion(5, e))?,
        read_at: parse_opt_ts(read_str).map_err(|e| conversion(6, e))?,
        is_edited,
        is_unsent,
    })
}

/// Map a `rusqlite::Row` to a [`MediaAttachment`].
fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaAttachment> {
    let id_str: String = row.get(0)?;
    let message_str: String = row.get(1)?;
    let url: String = row.get(2)?;
    let kind_str: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion(0, e))?;
    let message_id = Uuid::parse_str(&message_str).map_err(|e| conversion(1, e))?;
    let kind = MediaKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown media kind: {kind_str}").into(),
        )
    })?;

    Ok(MediaAttachment {
        id: AttachmentId(id),
        message_id: MessageId(message_id),
        url,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatThread;
    use chrono::Duration;

    fn open_with_thread() -> (Database, ChatThread) {
        let db = Database::open_in_memory().unwrap();
        let thread = ChatThread::new(PairKey::new(UserId(1), UserId(2)), Utc::now());
        db.create_thread(&thread).unwrap();
        (db, thread)
    }

    fn text_message(thread: &ChatThread, sender: UserId, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(),
            thread_id: thread.id,
            sender_id: sender,
            kind: MessageKind::Text,
            content: content.to_string(),
            created_at: at,
            read_at: None,
            is_edited: false,
            is_unsent: false,
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let (db, thread) = open_with_thread();
        let message = text_message(&thread, UserId(1), "bonjour", Utc::now());
        db.insert_message(&message).unwrap();

        let fetched = db.get_message(message.id).unwrap();
        assert_eq!(fetched, message);
    }

    #[test]
    fn attachments_follow_their_message() {
        let (db, thread) = open_with_thread();
        let message = text_message(&thread, UserId(1), "", Utc::now());
        db.insert_message(&message).unwrap();

        let attachment = MediaAttachment {
            id: AttachmentId::new(),
            message_id: message.id,
            url: "https://cdn.example/p.jpg".to_string(),
            kind: MediaKind::Image,
        };
        db.insert_attachments(std::slice::from_ref(&attachment)).unwrap();

        assert_eq!(db.attachments_of(message.id).unwrap(), vec![attachment]);
    }

    #[test]
    fn unsent_messages_are_hidden_but_retained() {
        let (db, thread) = open_with_thread();
        let now = Utc::now();
        let kept = text_message(&thread, UserId(1), "kept", now);
        let mut unsent = text_message(&thread, UserId(1), "gone", now + Duration::seconds(1));
        unsent.is_unsent = true;
        db.insert_message(&kept).unwrap();
        db.insert_message(&unsent).unwrap();

        let visible = db.visible_messages(thread.id, None, 0, 50).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, kept.id);

        assert_eq!(db.stored_message_count(thread.id).unwrap(), 2);
        assert_eq!(db.unread_count(thread.id, UserId(2)).unwrap(), 1);
    }

    #[test]
    fn lower_bound_hides_older_messages() {
        let (db, thread) = open_with_thread();
        let base = Utc::now();
        let old = text_message(&thread, UserId(1), "old", base);
        let new = text_message(&thread, UserId(1), "new", base + Duration::seconds(10));
        db.insert_message(&old).unwrap();
        db.insert_message(&new).unwrap();

        let bound = base + Duration::seconds(5);
        let visible = db.visible_messages(thread.id, Some(bound), 0, 50).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, new.id);
    }

    #[test]
    fn pagination_is_newest_first() {
        let (db, thread) = open_with_thread();
        let base = Utc::now();
        for i in 0..5 {
            let message = text_message(
                &thread,
                UserId(1),
                &format!("m{i}"),
                base + Duration::seconds(i),
            );
            db.insert_message(&message).unwrap();
        }

        let first = db.visible_messages(thread.id, None, 0, 2).unwrap();
        let second = db.visible_messages(thread.id, None, 1, 2).unwrap();
        assert_eq!(first[0].content, "m4");
        assert_eq!(first[1].content, "m3");
        assert_eq!(second[0].content, "m2");
    }

    #[test]
    fn mark_read_is_monotonic_and_idempotent() {
        let (db, thread) = open_with_thread();
        let now = Utc::now();
        let from_other = text_message(&thread, UserId(1), "hi", now);
        let own = text_message(&thread, UserId(2), "reply", now + Duration::seconds(1));
        db.insert_message(&from_other).unwrap();
        db.insert_message(&own).unwrap();

        let marked = db.mark_thread_read(thread.id, UserId(2), now).unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].id, from_other.id);
        assert!(marked[0].read_at.is_some());

        // The reader's own message stays untouched.
        assert!(db.get_message(own.id).unwrap().read_at.is_none());

        // Second pass transitions nothing.
        let again = db.mark_thread_read(thread.id, UserId(2), Utc::now()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn exists_between_sees_either_direction() {
        let (db, thread) = open_with_thread();
        let pair = PairKey::new(UserId(2), UserId(1));
        assert!(!db.message_exists_between(pair).unwrap());

        db.insert_message(&text_message(&thread, UserId(2), "first", Utc::now()))
            .unwrap();
        assert!(db.message_exists_between(pair).unwrap());
        assert!(db
            .message_exists_between(PairKey::new(UserId(1), UserId(2)))
            .unwrap());
    }

    #[test]
    fn edit_and_unsend_mutations() {
        let (db, thread) = open_with_thread();
        let message = text_message(&thread, UserId(1), "tpyo", Utc::now());
        db.insert_message(&message).unwrap();

        db.set_message_content(message.id, "typo").unwrap();
        let edited = db.get_message(message.id).unwrap();
        assert_eq!(edited.content, "typo");
        assert!(edited.is_edited);

        db.set_message_unsent(message.id).unwrap();
        assert!(db.get_message(message.id).unwrap().is_unsent);

        let missing = MessageId::new();
        assert!(matches!(
            db.set_message_content(missing, "x"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn purge_cascades_to_messages_and_attachments() {
        let (db, thread) = open_with_thread();
        let message = text_message(&thread, UserId(1), "payload", Utc::now());
        db.insert_message(&message).unwrap();
        db.insert_attachments(&[MediaAttachment {
            id: AttachmentId::new(),
            message_id: message.id,
            url: "https://cdn.example/v.mp4".to_string(),
            kind: MediaKind::Video,
        }])
        .unwrap();

        db.purge_thread(thread.id).unwrap();
        assert!(matches!(db.get_message(message.id), Err(StoreError::NotFound)));
        assert!(db.attachments_of(message.id).unwrap().is_empty());
    }
}
