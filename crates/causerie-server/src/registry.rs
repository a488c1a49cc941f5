//! In-memory registry of live transport connections.
//!
//! One logical user may hold many physical connections (multiple devices
//! or tabs); the registry maps each user to the outbound event channel of
//! every live connection.  It is an injected, explicitly-owned component:
//! constructed once in `main` and passed by handle to the presence
//! publisher and the fan-out dispatcher.
//!
//! All operations are synchronous and non-blocking; the lock only guards
//! the map itself, never a suspension point.  The registry is a derived,
//! rebuildable cache of "who is reachable right now" -- durable presence
//! state lives in the store.

use std::collections::HashMap;
use std::sync::RwLock;

use causerie_shared::protocol::ServerEvent;
use causerie_shared::types::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tracing::debug;

type ConnectionMap = HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>;

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<ConnectionMap>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for a user, creating the user entry if absent.
    /// Returns `true` when this is the user's first live connection
    /// (the 0 -> 1 transition the presence publisher cares about).
    pub fn register(
        &self,
        user: UserId,
        conn: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
    ) -> bool {
        let mut map = self.inner.write().unwrap();
        let connections = map.entry(user).or_default();
        let was_offline = connections.is_empty();
        connections.insert(conn, sender);
        was_offline
    }

    /// Remove a connection.  When the user's set becomes empty the entry
    /// is removed entirely and the call reports "now fully offline", so
    /// presence fires once per user transition rather than once per
    /// connection.
    pub fn unregister(&self, user: UserId, conn: ConnectionId) -> bool {
        let mut map = self.inner.write().unwrap();
        let Some(connections) = map.get_mut(&user) else {
            return false;
        };
        connections.remove(&conn);
        if connections.is_empty() {
            map.remove(&user);
            true
        } else {
            false
        }
    }

    /// The live connection ids of a user (empty if none).
    pub fn connections_of(&self, user: UserId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .unwrap()
            .get(&user)
            .map(|connections| connections.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every user with at least one live connection.
    pub fn online_users(&self) -> Vec<UserId> {
        self.inner.read().unwrap().keys().copied().collect()
    }

    /// Total live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.inner
            .read()
            .unwrap()
            .values()
            .map(|connections| connections.len())
            .sum()
    }

    /// Push an event to every live connection of a user.  Returns the
    /// number of connections reached.  Connections whose receiver is gone
    /// are pruned; a full buffer drops the event for that connection only
    /// (slow consumer, accepted best-effort gap).
    pub fn send_to(&self, user: UserId, event: &ServerEvent) -> usize {
        self.send_filtered(user, event, None)
    }

    /// Like [`send_to`](Self::send_to) but skips one connection -- used
    /// to echo a send to the sender's *other* devices.
    pub fn send_to_excluding(
        &self,
        user: UserId,
        exclude: ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        self.send_filtered(user, event, Some(exclude))
    }

    fn send_filtered(
        &self,
        user: UserId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let map = self.inner.read().unwrap();
            let Some(connections) = map.get(&user) else {
                return 0;
            };
            for (conn, sender) in connections {
                if Some(*conn) == exclude {
                    continue;
                }
                match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(user = %user, conn = ?conn, "dropping event for slow connection");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*conn),
                }
            }
        }

        if !dead.is_empty() {
            let mut map = self.inner.write().unwrap();
            if let Some(connections) = map.get_mut(&user) {
                for conn in dead {
                    connections.remove(&conn);
                }
                if connections.is_empty() {
                    map.remove(&user);
                }
            }
        }

        delivered
    }
}
