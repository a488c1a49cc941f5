//! Presence transitions: durable write first, then broadcast.

use std::sync::Arc;

use causerie_shared::protocol::ServerEvent;
use causerie_shared::types::UserId;
use chrono::Utc;
use tracing::warn;

use crate::registry::ConnectionRegistry;
use crate::SharedStore;

/// Publishes online/offline transitions.
///
/// Fired by the transport layer exactly once per user transition (the
/// registry collapses per-connection churn).  The durable write happens
/// before the broadcast; if it fails, the broadcast is suppressed and the
/// failure is a logged warning -- presence is best-effort and never blocks
/// message delivery.
pub struct PresencePublisher {
    store: SharedStore,
    registry: Arc<ConnectionRegistry>,
}

impl PresencePublisher {
    pub fn new(store: SharedStore, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Handle a 0 -> 1 connection transition.
    pub async fn went_online(&self, user: UserId) {
        let result = self.store.lock().await.upsert_presence(user, true, None);
        if let Err(e) = result {
            warn!(user = %user, error = %e, "presence write failed; skipping broadcast");
            return;
        }
        self.broadcast(user, true);
    }

    /// Handle a 1 -> 0 connection transition.
    pub async fn went_offline(&self, user: UserId) {
        let result = self
            .store
            .lock()
            .await
            .upsert_presence(user, false, Some(Utc::now()));
        if let Err(e) = result {
            warn!(user = %user, error = %e, "presence write failed; skipping broadcast");
            return;
        }
        self.broadcast(user, false);
    }

    /// Tell every *other* connected user about the transition.
    fn broadcast(&self, user: UserId, is_online: bool) {
        let event = ServerEvent::PresenceChanged {
            user_id: user,
            is_online,
        };
        for other in self.registry.online_users() {
            if other != user {
                self.registry.send_to(other, &event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_shared::types::ConnectionId;
    use causerie_store::Database;
    use tokio::sync::{mpsc, Mutex};

    fn store() -> SharedStore {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn online_writes_durable_state_and_broadcasts_to_others() {
        let store = store();
        let registry = Arc::new(ConnectionRegistry::new());
        let publisher = PresencePublisher::new(store.clone(), registry.clone());

        // User 2 is watching; user 1 comes online.
        let (tx_w, mut rx_w) = mpsc::channel(8);
        registry.register(UserId(2), ConnectionId::new(), tx_w);
        let (tx_s, mut rx_s) = mpsc::channel(8);
        registry.register(UserId(1), ConnectionId::new(), tx_s);

        publisher.went_online(UserId(1)).await;

        let record = store
            .lock()
            .await
            .get_presence(UserId(1))
            .unwrap()
            .unwrap();
        assert!(record.is_online);
        assert!(record.last_seen.is_none());

        assert_eq!(
            rx_w.recv().await.unwrap(),
            ServerEvent::PresenceChanged {
                user_id: UserId(1),
                is_online: true,
            }
        );
        // The transitioning user does not hear about itself.
        assert!(rx_s.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_records_last_seen() {
        let store = store();
        let registry = Arc::new(ConnectionRegistry::new());
        let publisher = PresencePublisher::new(store.clone(), registry);

        publisher.went_online(UserId(1)).await;
        publisher.went_offline(UserId(1)).await;

        let record = store
            .lock()
            .await
            .get_presence(UserId(1))
            .unwrap()
            .unwrap();
        assert!(!record.is_online);
        assert!(record.last_seen.is_some());
    }
}
