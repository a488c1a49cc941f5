//! External collaborator seams.
//!
//! The chat core calls into a user directory, a social-graph service, a
//! block registry, and a push-notification dispatcher; none of their
//! internals belong to this crate.  Each is a trait so production
//! deployments can plug in networked clients, while the in-memory
//! implementations below back standalone deployments and tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use causerie_shared::types::UserId;
use serde::Deserialize;

/// Profile fields the chat core needs: a display name for push previews
/// and the public/private visibility flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub display_name: String,
    pub is_public: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user: UserId) -> bool;
    async fn profile(&self, user: UserId) -> Option<UserProfile>;
}

#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Directed follow edge: does `follower` follow `followee`?
    async fn follows(&self, follower: UserId, followee: UserId) -> bool;
}

#[async_trait]
pub trait BlockRegistry: Send + Sync {
    /// Directed block edge: has `blocker` blocked `blocked`?
    async fn blocks(&self, blocker: UserId, blocked: UserId) -> bool;
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Deliver a human-readable summary to an offline recipient.
    /// Failures are logged and swallowed by the fan-out layer.
    async fn notify(&self, recipient: UserId, summary: &str) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserId, display_name: &str, is_public: bool) {
        self.profiles.write().unwrap().insert(
            user,
            UserProfile {
                display_name: display_name.to_string(),
                is_public,
            },
        );
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn user_exists(&self, user: UserId) -> bool {
        self.profiles.read().unwrap().contains_key(&user)
    }

    async fn profile(&self, user: UserId) -> Option<UserProfile> {
        self.profiles.read().unwrap().get(&user).cloned()
    }
}

#[derive(Default)]
pub struct InMemoryGraph {
    edges: RwLock<HashSet<(UserId, UserId)>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(&self, follower: UserId, followee: UserId) {
        self.edges.write().unwrap().insert((follower, followee));
    }

    #[allow(dead_code)]
    pub fn unfollow(&self, follower: UserId, followee: UserId) {
        self.edges.write().unwrap().remove(&(follower, followee));
    }
}

#[async_trait]
impl SocialGraph for InMemoryGraph {
    async fn follows(&self, follower: UserId, followee: UserId) -> bool {
        self.edges.read().unwrap().contains(&(follower, followee))
    }
}

#[derive(Default)]
pub struct InMemoryBlocks {
    edges: RwLock<HashSet<(UserId, UserId)>>,
}

impl InMemoryBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, blocker: UserId, blocked: UserId) {
        self.edges.write().unwrap().insert((blocker, blocked));
    }

    #[allow(dead_code)]
    pub fn unblock(&self, blocker: UserId, blocked: UserId) {
        self.edges.write().unwrap().remove(&(blocker, blocked));
    }
}

#[async_trait]
impl BlockRegistry for InMemoryBlocks {
    async fn blocks(&self, blocker: UserId, blocked: UserId) -> bool {
        self.edges.read().unwrap().contains(&(blocker, blocked))
    }
}

/// Push dispatcher that only logs.  Standalone default.
#[derive(Default)]
pub struct NullPush;

#[async_trait]
impl PushNotifier for NullPush {
    async fn notify(&self, recipient: UserId, summary: &str) -> anyhow::Result<()> {
        tracing::debug!(recipient = %recipient, summary, "push notification (null sink)");
        Ok(())
    }
}

/// Push dispatcher that records every notification.  Test double.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPush {
    sent: std::sync::Mutex<Vec<(UserId, String)>>,
}

#[cfg(test)]
impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl PushNotifier for RecordingPush {
    async fn notify(&self, recipient: UserId, summary: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient, summary.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// JSON seed for standalone deployments:
/// `{"users": [{"id": 1, "name": "ada", "public": true}],
///   "follows": [[1, 2]], "blocks": [[3, 4]]}`
#[derive(Debug, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub follows: Vec<(i64, i64)>,
    #[serde(default)]
    pub blocks: Vec<(i64, i64)>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

impl DirectorySeed {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn apply(
        &self,
        directory: &InMemoryDirectory,
        graph: &InMemoryGraph,
        blocks: &InMemoryBlocks,
    ) {
        for user in &self.users {
            directory.add_user(UserId(user.id), &user.name, user.public);
        }
        for (follower, followee) in &self.follows {
            graph.follow(UserId(*follower), UserId(*followee));
        }
        for (blocker, blocked) in &self.blocks {
            blocks.block(UserId(*blocker), UserId(*blocked));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_directory_round_trip() {
        let directory = InMemoryDirectory::new();
        directory.add_user(UserId(1), "ada", true);

        assert!(directory.user_exists(UserId(1)).await);
        assert!(!directory.user_exists(UserId(2)).await);
        let profile = directory.profile(UserId(1)).await.unwrap();
        assert_eq!(profile.display_name, "ada");
        assert!(profile.is_public);
    }

    #[tokio::test]
    async fn follow_edges_are_directed() {
        let graph = InMemoryGraph::new();
        graph.follow(UserId(1), UserId(2));

        assert!(graph.follows(UserId(1), UserId(2)).await);
        assert!(!graph.follows(UserId(2), UserId(1)).await);

        graph.unfollow(UserId(1), UserId(2));
        assert!(!graph.follows(UserId(1), UserId(2)).await);
    }

    #[test]
    fn seed_parses_minimal_json() {
        let seed: DirectorySeed = serde_json::from_str(
            r#"{"users": [{"id": 1, "name": "ada", "public": true}], "follows": [[1, 2]]}"#,
        )
        .unwrap();
        assert_eq!(seed.users.len(), 1);
        assert_eq!(seed.follows, vec![(1, 2)]);
        assert!(seed.blocks.is_empty());
    }
}
