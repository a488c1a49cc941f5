//! Domain model structs persisted in the relational store.
//!
//! Every struct derives `Serialize` so it can be handed to the transport
//! layer; the wire views in `causerie-shared` are built from these.

use causerie_shared::protocol::{MediaKind, MessageKind};
use causerie_shared::types::{AttachmentId, ChatId, MessageId, PairKey, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ChatThread
// ---------------------------------------------------------------------------

/// Which side of a thread a user occupies.  `user_a < user_b` is the
/// canonical storage order, so the side is a stable property of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

/// The single 1:1 conversation record between two users.
///
/// A thread with exactly one delete flag set is soft-deleted for that
/// side; a thread whose both flags become true is purged outright and
/// never observed in this state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatThread {
    pub id: ChatId,
    /// Lower user id of the canonical pair.
    pub user_a: UserId,
    /// Higher user id of the canonical pair.
    pub user_b: UserId,
    pub created_at: DateTime<Utc>,
    pub deleted_by_a: bool,
    pub deleted_at_a: Option<DateTime<Utc>>,
    pub deleted_by_b: bool,
    pub deleted_at_b: Option<DateTime<Utc>>,
}

impl ChatThread {
    /// Build a fresh thread for a pair, both delete flags clear.
    pub fn new(pair: PairKey, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ChatId::new(),
            user_a: pair.low(),
            user_b: pair.high(),
            created_at,
            deleted_by_a: false,
            deleted_at_a: None,
            deleted_by_b: false,
            deleted_at_b: None,
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.user_a, self.user_b)
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.user_a == user || self.user_b == user
    }

    pub fn side_of(&self, user: UserId) -> Option<Side> {
        if user == self.user_a {
            Some(Side::A)
        } else if user == self.user_b {
            Some(Side::B)
        } else {
            None
        }
    }

    /// The other participant, if `user` is one.
    pub fn other(&self, user: UserId) -> Option<UserId> {
        self.pair().other(user)
    }

    pub fn is_deleted_for(&self, side: Side) -> bool {
        match side {
            Side::A => self.deleted_by_a,
            Side::B => self.deleted_by_b,
        }
    }

    pub fn deleted_at_for(&self, side: Side) -> Option<DateTime<Utc>> {
        match side {
            Side::A => self.deleted_at_a,
            Side::B => self.deleted_at_b,
        }
    }

    /// Lower bound for the given user's history view: messages strictly
    /// before their delete timestamp stay hidden, including after the
    /// flag has been cleared by a restoring message.
    pub fn history_bound_for(&self, user: UserId) -> Option<DateTime<Utc>> {
        self.side_of(user).and_then(|side| self.deleted_at_for(side))
    }

    /// True once both sides have soft-deleted; the thread must then be
    /// purged (hard delete).
    pub fn is_fully_deleted(&self) -> bool {
        self.deleted_by_a && self.deleted_by_b
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.  Unsent messages are retained for audit but
/// excluded from every delivered history, preview, and unread count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub is_unsent: bool,
}

// ---------------------------------------------------------------------------
// MediaAttachment
// ---------------------------------------------------------------------------

/// Media reference owned by a message; written in a follow-up insert
/// keyed by the message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaAttachment {
    pub id: AttachmentId,
    pub message_id: MessageId,
    pub url: String,
    pub kind: MediaKind,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Durable online/offline state, mutated exactly once per transition by
/// the presence publisher.  `last_seen` is NULL while online.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
