//! Event fan-out to live connections, with push-notification fallback.

use std::sync::Arc;

use causerie_shared::protocol::ServerEvent;
use causerie_shared::types::{ConnectionId, UserId};
use tracing::{debug, warn};

use crate::collaborators::PushNotifier;
use crate::registry::ConnectionRegistry;

/// Pushes one logical event to every live connection of its targets.
///
/// Duplicate delivery across a user's devices is expected and correct;
/// each device renders independently.  Offline recipients fall back to the
/// push-notification collaborator, whose failures are logged and swallowed
/// -- they never fail the foreground operation.
pub struct FanoutDispatcher {
    registry: Arc<ConnectionRegistry>,
    push: Arc<dyn PushNotifier>,
}

impl FanoutDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, push: Arc<dyn PushNotifier>) -> Self {
        Self { registry, push }
    }

    /// Deliver to every live connection of every target.
    pub fn deliver(&self, event: &ServerEvent, targets: &[UserId]) {
        for target in targets {
            let delivered = self.registry.send_to(*target, event);
            debug!(target = %target, delivered, "fan-out");
        }
    }

    /// Deliver to one target, or hand the summary to the push collaborator
    /// if the target has no live connection.  The push runs detached so a
    /// slow or failing dispatcher never delays the send path.
    pub fn deliver_or_push(&self, event: &ServerEvent, target: UserId, summary: String) {
        let delivered = self.registry.send_to(target, event);
        if delivered > 0 {
            return;
        }

        let push = self.push.clone();
        tokio::spawn(async move {
            if let Err(e) = push.notify(target, &summary).await {
                warn!(recipient = %target, error = %e, "push notification failed");
            }
        });
    }

    /// Deliver to all of a user's connections except one -- the echo to a
    /// sender's other devices.
    pub fn deliver_excluding(&self, event: &ServerEvent, target: UserId, exclude: ConnectionId) {
        self.registry.send_to_excluding(target, exclude, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RecordingPush;
    use tokio::sync::mpsc;

    fn typing() -> ServerEvent {
        ServerEvent::TypingIndicator {
            sender_id: UserId(9),
        }
    }

    #[tokio::test]
    async fn online_target_gets_no_push() {
        let registry = Arc::new(ConnectionRegistry::new());
        let push = Arc::new(RecordingPush::new());
        let fanout = FanoutDispatcher::new(registry.clone(), push.clone());

        let (tx, mut rx) = mpsc::channel(8);
        registry.register(UserId(1), ConnectionId::new(), tx);

        fanout.deliver_or_push(&typing(), UserId(1), "summary".to_string());
        assert_eq!(rx.recv().await.unwrap(), typing());
        assert!(push.sent().is_empty());
    }

    #[tokio::test]
    async fn offline_target_gets_exactly_one_push() {
        let registry = Arc::new(ConnectionRegistry::new());
        let push = Arc::new(RecordingPush::new());
        let fanout = FanoutDispatcher::new(registry, push.clone());

        fanout.deliver_or_push(&typing(), UserId(1), "ada: hi".to_string());
        // The push runs on a detached task; give it a few polls to land.
        for _ in 0..16 {
            if !push.sent().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(push.sent(), vec![(UserId(1), "ada: hi".to_string())]);
    }

    #[tokio::test]
    async fn deliver_reaches_all_targets() {
        let registry = Arc::new(ConnectionRegistry::new());
        let push = Arc::new(RecordingPush::new());
        let fanout = FanoutDispatcher::new(registry.clone(), push);

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(UserId(1), ConnectionId::new(), tx_a);
        registry.register(UserId(2), ConnectionId::new(), tx_b);

        fanout.deliver(&typing(), &[UserId(1), UserId(2)]);
        assert_eq!(rx_a.recv().await.unwrap(), typing());
        assert_eq!(rx_b.recv().await.unwrap(), typing());
    }
}
