//! Messaging permission decisions.
//!
//! A pure decision table over two users' visibility and follow state,
//! evaluated fresh on every permission-sensitive call -- follow and block
//! edges can change between calls, so nothing here is cached.

use std::sync::Arc;

use causerie_shared::types::{PairKey, UserId};
use causerie_store::StoreError;

use crate::collaborators::{BlockRegistry, SocialGraph, UserDirectory};
use crate::SharedStore;

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allowed {
        /// Set when the send is allowed with a caveat, e.g. the last free
        /// message to a non-following private recipient.
        note: Option<String>,
    },
    /// Two private users without mutual follow edges.
    MustMutualFollow,
    NotAllowed {
        reason: String,
    },
}

impl PermissionDecision {
    pub fn allowed() -> Self {
        PermissionDecision::Allowed { note: None }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionDecision::Allowed { .. })
    }

    /// Human-readable denial reason; `None` when allowed.
    pub fn denial_reason(&self) -> Option<String> {
        match self {
            PermissionDecision::Allowed { .. } => None,
            PermissionDecision::MustMutualFollow => {
                Some("you and this user must follow each other to chat".to_string())
            }
            PermissionDecision::NotAllowed { reason } => Some(reason.clone()),
        }
    }
}

pub struct PermissionEngine {
    directory: Arc<dyn UserDirectory>,
    graph: Arc<dyn SocialGraph>,
    blocks: Arc<dyn BlockRegistry>,
    store: SharedStore,
}

impl PermissionEngine {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        graph: Arc<dyn SocialGraph>,
        blocks: Arc<dyn BlockRegistry>,
        store: SharedStore,
    ) -> Self {
        Self {
            directory,
            graph,
            blocks,
            store,
        }
    }

    /// May `sender` message `recipient` right now?
    ///
    /// Precedence, first match wins:
    /// 1. a block in either direction denies everything;
    /// 2. both public: allowed;
    /// 3. both private: allowed iff mutual follow;
    /// 4. private sender -> public recipient: allowed;
    /// 5. public sender -> private recipient: allowed if the recipient
    ///    already follows the sender, otherwise one free message while no
    ///    prior message exists between the pair.
    ///
    /// Callers validate user existence first; an unknown user resolves to
    /// `NotAllowed` here rather than an error.
    pub async fn check(
        &self,
        sender: UserId,
        recipient: UserId,
    ) -> Result<PermissionDecision, StoreError> {
        if self.blocks.blocks(sender, recipient).await {
            return Ok(PermissionDecision::NotAllowed {
                reason: "you have blocked this user".to_string(),
            });
        }
        if self.blocks.blocks(recipient, sender).await {
            return Ok(PermissionDecision::NotAllowed {
                reason: "this user has blocked you".to_string(),
            });
        }

        let (Some(sender_profile), Some(recipient_profile)) = (
            self.directory.profile(sender).await,
            self.directory.profile(recipient).await,
        ) else {
            return Ok(PermissionDecision::NotAllowed {
                reason: "unknown user".to_string(),
            });
        };

        let decision = match (sender_profile.is_public, recipient_profile.is_public) {
            (true, true) => PermissionDecision::allowed(),
            (false, false) => {
                let forward = self.graph.follows(sender, recipient).await;
                let backward = self.graph.follows(recipient, sender).await;
                if forward && backward {
                    PermissionDecision::allowed()
                } else {
                    PermissionDecision::MustMutualFollow
                }
            }
            (false, true) => PermissionDecision::allowed(),
            (true, false) => {
                if self.graph.follows(recipient, sender).await {
                    PermissionDecision::allowed()
                } else if !self
                    .store
                    .lock()
                    .await
                    .message_exists_between(PairKey::new(sender, recipient))?
                {
                    PermissionDecision::Allowed {
                        note: Some("last free message until the recipient follows you".to_string()),
                    }
                } else {
                    PermissionDecision::NotAllowed {
                        reason: "recipient must follow you now".to_string(),
                    }
                }
            }
        };

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryBlocks, InMemoryDirectory, InMemoryGraph};
    use causerie_shared::protocol::MessageKind;
    use causerie_shared::types::MessageId;
    use causerie_store::{ChatThread, Database, Message};
    use chrono::Utc;
    use tokio::sync::Mutex;

    struct Fixture {
        directory: Arc<InMemoryDirectory>,
        graph: Arc<InMemoryGraph>,
        blocks: Arc<InMemoryBlocks>,
        store: SharedStore,
        engine: PermissionEngine,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new());
        let graph = Arc::new(InMemoryGraph::new());
        let blocks = Arc::new(InMemoryBlocks::new());
        let store: SharedStore = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let engine = PermissionEngine::new(
            directory.clone(),
            graph.clone(),
            blocks.clone(),
            store.clone(),
        );
        Fixture {
            directory,
            graph,
            blocks,
            store,
            engine,
        }
    }

    async fn seed_prior_message(store: &SharedStore, a: UserId, b: UserId) {
        let db = store.lock().await;
        let thread = ChatThread::new(PairKey::new(a, b), Utc::now());
        db.create_thread(&thread).unwrap();
        db.insert_message(&Message {
            id: MessageId::new(),
            thread_id: thread.id,
            sender_id: a,
            kind: MessageKind::Text,
            content: "hi".to_string(),
            created_at: Utc::now(),
            read_at: None,
            is_edited: false,
            is_unsent: false,
        })
        .unwrap();
    }

    #[tokio::test]
    async fn public_pair_is_always_allowed() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", true);
        f.directory.add_user(UserId(2), "b", true);

        let decision = f.engine.check(UserId(1), UserId(2)).await.unwrap();
        assert_eq!(decision, PermissionDecision::allowed());
    }

    #[tokio::test]
    async fn block_overrides_everything() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", true);
        f.directory.add_user(UserId(2), "b", true);
        f.blocks.block(UserId(2), UserId(1));

        let decision = f.engine.check(UserId(1), UserId(2)).await.unwrap();
        assert!(matches!(decision, PermissionDecision::NotAllowed { ref reason }
            if reason.contains("blocked you")));

        // The other direction reports the other reason.
        let reverse = f.engine.check(UserId(2), UserId(1)).await.unwrap();
        assert!(matches!(reverse, PermissionDecision::NotAllowed { ref reason }
            if reason.contains("you have blocked")));
    }

    #[tokio::test]
    async fn private_pair_needs_mutual_follow() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", false);
        f.directory.add_user(UserId(2), "b", false);

        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::MustMutualFollow
        );

        f.graph.follow(UserId(1), UserId(2));
        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::MustMutualFollow
        );

        f.graph.follow(UserId(2), UserId(1));
        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::allowed()
        );

        // Removing either edge flips the decision back.
        f.graph.unfollow(UserId(1), UserId(2));
        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::MustMutualFollow
        );
    }

    #[tokio::test]
    async fn private_sender_may_message_public_recipient() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", false);
        f.directory.add_user(UserId(2), "b", true);

        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::allowed()
        );
    }

    #[tokio::test]
    async fn one_free_message_rule() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", true);
        f.directory.add_user(UserId(2), "b", false);

        // No prior contact: one free message, flagged as such.
        let first = f.engine.check(UserId(1), UserId(2)).await.unwrap();
        assert!(matches!(first, PermissionDecision::Allowed { note: Some(_) }));

        // After a message exists, the free pass is spent.
        seed_prior_message(&f.store, UserId(1), UserId(2)).await;
        let second = f.engine.check(UserId(1), UserId(2)).await.unwrap();
        assert!(matches!(second, PermissionDecision::NotAllowed { ref reason }
            if reason.contains("must follow")));

        // A follow from the recipient unlocks the pair for good.
        f.graph.follow(UserId(2), UserId(1));
        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::allowed()
        );
    }

    #[tokio::test]
    async fn free_message_rule_does_not_leak_into_private_pairs() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", false);
        f.directory.add_user(UserId(2), "b", false);

        // Zero prior messages, but both private: still mutual-follow.
        assert_eq!(
            f.engine.check(UserId(1), UserId(2)).await.unwrap(),
            PermissionDecision::MustMutualFollow
        );
    }

    #[tokio::test]
    async fn unknown_user_is_not_allowed() {
        let f = fixture();
        f.directory.add_user(UserId(1), "a", true);

        let decision = f.engine.check(UserId(1), UserId(99)).await.unwrap();
        assert!(matches!(decision, PermissionDecision::NotAllowed { .. }));
    }
}
