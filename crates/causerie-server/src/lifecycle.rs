//! Thread lifecycle: find-or-create, soft delete, hard delete, restore.

use std::collections::HashMap;
use std::sync::Arc;

use causerie_shared::types::{ChatId, PairKey, UserId};
use causerie_store::{ChatThread, StoreError};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ServerError;
use crate::SharedStore;

/// Result of a soft delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftDeleteOutcome {
    /// The acting side is now hidden; the thread survives.
    SoftDeleted(ChatThread),
    /// Both sides had deleted: the thread and its messages are gone.
    Purged,
}

/// Manages the single conversation thread per unordered user pair.
///
/// Creation is serialized per pair through a keyed mutex map (reclaimed
/// when uncontended); the store's UNIQUE constraint is the backstop, and
/// a loser of that race re-reads and adopts the winner's thread.
pub struct ChatLifecycle {
    store: SharedStore,
    pair_locks: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl ChatLifecycle {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the thread for `(a, b)` in either order, creating it with
    /// both delete flags clear if absent.  Returns the thread and whether
    /// it was newly created.
    pub async fn find_or_create(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<(ChatThread, bool), ServerError> {
        let pair = PairKey::new(a, b);
        let lock = self.pair_lock(pair).await;
        let guard = lock.lock().await;

        let result = self.find_or_create_locked(pair).await;

        drop(guard);
        drop(lock);
        self.reclaim_pair_lock(pair).await;

        result
    }

    async fn find_or_create_locked(
        &self,
        pair: PairKey,
    ) -> Result<(ChatThread, bool), ServerError> {
        if let Some(existing) = self.store.lock().await.find_thread(pair)? {
            return Ok((existing, false));
        }

        let thread = ChatThread::new(pair, Utc::now());
        match self.store.lock().await.create_thread(&thread) {
            Ok(()) => {
                info!(chat = %thread.id, a = %pair.low(), b = %pair.high(), "created thread");
                Ok((thread, true))
            }
            // Lost a cross-instance race: adopt the winner's row.
            Err(StoreError::DuplicateThread) => {
                let existing = self
                    .store
                    .lock()
                    .await
                    .find_thread(pair)?
                    .ok_or_else(|| ServerError::Internal("thread vanished after conflict".into()))?;
                Ok((existing, false))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Soft-delete one side.  Idempotent per side; when the second side
    /// deletes, the thread and all its messages are purged atomically and
    /// irreversibly.
    pub async fn soft_delete(
        &self,
        chat_id: ChatId,
        acting_user: UserId,
    ) -> Result<SoftDeleteOutcome, ServerError> {
        let db = self.store.lock().await;
        let thread = db.get_thread(chat_id)?;
        let side = thread
            .side_of(acting_user)
            .ok_or_else(|| ServerError::NotFound("chat".to_string()))?;

        if thread.is_deleted_for(side) {
            // Already hidden for this side; not a new hard-delete attempt.
            return Ok(SoftDeleteOutcome::SoftDeleted(thread));
        }

        let updated = db.set_thread_deleted(chat_id, side, Utc::now())?;
        if updated.is_fully_deleted() {
            db.purge_thread(chat_id)?;
            info!(chat = %chat_id, "both sides deleted; thread purged");
            return Ok(SoftDeleteOutcome::Purged);
        }
        Ok(SoftDeleteOutcome::SoftDeleted(updated))
    }

    /// Clear the recipient's delete flag when a new message arrives for a
    /// thread they had soft-deleted.  The delete timestamp is left in
    /// place; it keeps bounding their history view.  Returns the (possibly
    /// updated) thread and whether a restore happened.
    pub async fn restore_if_needed(
        &self,
        thread: &ChatThread,
        recipient: UserId,
    ) -> Result<(ChatThread, bool), ServerError> {
        let Some(side) = thread.side_of(recipient) else {
            return Err(ServerError::NotFound("chat".to_string()));
        };
        if !thread.is_deleted_for(side) {
            return Ok((thread.clone(), false));
        }

        let restored = self
            .store
            .lock()
            .await
            .clear_thread_deleted(thread.id, side)?;
        info!(chat = %thread.id, user = %recipient, "thread restored by inbound message");
        Ok((restored, true))
    }

    async fn pair_lock(&self, pair: PairKey) -> Arc<Mutex<()>> {
        self.pair_locks
            .lock()
            .await
            .entry(pair)
            .or_default()
            .clone()
    }

    /// Drop the keyed mutex once nobody else holds a handle to it.
    async fn reclaim_pair_lock(&self, pair: PairKey) {
        let mut locks = self.pair_locks.lock().await;
        if let Some(lock) = locks.get(&pair) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&pair);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_store::Database;

    fn lifecycle() -> ChatLifecycle {
        let store: SharedStore = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        ChatLifecycle::new(store)
    }

    #[tokio::test]
    async fn find_or_create_is_order_independent() {
        let lifecycle = lifecycle();

        let (thread, created) = lifecycle.find_or_create(UserId(1), UserId(2)).await.unwrap();
        assert!(created);

        let (same, created_again) = lifecycle.find_or_create(UserId(2), UserId(1)).await.unwrap();
        assert!(!created_again);
        assert_eq!(same.id, thread.id);
    }

    #[tokio::test]
    async fn concurrent_first_contact_yields_one_thread() {
        let lifecycle = Arc::new(lifecycle());

        let left = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.find_or_create(UserId(1), UserId(2)).await })
        };
        let right = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.find_or_create(UserId(2), UserId(1)).await })
        };

        let (thread_l, _) = left.await.unwrap().unwrap();
        let (thread_r, _) = right.await.unwrap().unwrap();
        assert_eq!(thread_l.id, thread_r.id);

        // The keyed-lock map was reclaimed once uncontended.
        assert!(lifecycle.pair_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn second_side_delete_purges() {
        let lifecycle = lifecycle();
        let (thread, _) = lifecycle.find_or_create(UserId(1), UserId(2)).await.unwrap();

        let first = lifecycle.soft_delete(thread.id, UserId(1)).await.unwrap();
        assert!(matches!(first, SoftDeleteOutcome::SoftDeleted(ref t) if t.deleted_by_a));

        // Re-deleting the same side is a no-op, not a purge.
        let repeat = lifecycle.soft_delete(thread.id, UserId(1)).await.unwrap();
        assert!(matches!(repeat, SoftDeleteOutcome::SoftDeleted(_)));

        let second = lifecycle.soft_delete(thread.id, UserId(2)).await.unwrap();
        assert_eq!(second, SoftDeleteOutcome::Purged);

        // Terminal: the thread is no longer retrievable.
        let err = lifecycle.soft_delete(thread.id, UserId(1)).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_participant_cannot_delete() {
        let lifecycle = lifecycle();
        let (thread, _) = lifecycle.find_or_create(UserId(1), UserId(2)).await.unwrap();

        let err = lifecycle.soft_delete(thread.id, UserId(9)).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn restore_clears_flag_only_for_deleted_side() {
        let lifecycle = lifecycle();
        let (thread, _) = lifecycle.find_or_create(UserId(1), UserId(2)).await.unwrap();

        let outcome = lifecycle.soft_delete(thread.id, UserId(1)).await.unwrap();
        let SoftDeleteOutcome::SoftDeleted(deleted) = outcome else {
            panic!("thread should survive a one-sided delete");
        };

        let (restored, did_restore) = lifecycle
            .restore_if_needed(&deleted, UserId(1))
            .await
            .unwrap();
        assert!(did_restore);
        assert!(!restored.deleted_by_a);
        assert!(restored.deleted_at_a.is_some());

        // No flag set: nothing to do.
        let (_, again) = lifecycle
            .restore_if_needed(&restored, UserId(1))
            .await
            .unwrap();
        assert!(!again);
    }
}
