//! # causerie-server
//!
//! Real-time 1:1 chat core.
//!
//! This binary provides:
//! - **WebSocket transport** with one logical session across many
//!   physical connections per user (multi-device)
//! - **Presence tracking** with durable online/offline state
//! - **Permission-gated messaging** over an asymmetric
//!   public/private/follow policy, including the one-free-message rule
//! - **Thread lifecycle** with per-side soft delete, resurrection on a
//!   new inbound message, and both-sides hard delete
//! - **Message pipeline** for send/edit/unsend/read-receipt with
//!   at-least-once fan-out to every live connection and a
//!   push-notification fallback for offline recipients
//! - **REST surface** for paginated history and thread deletion

mod api;
mod collaborators;
mod config;
mod error;
mod fanout;
mod lifecycle;
mod limiter;
mod permissions;
mod pipeline;
mod presence;
mod registry;
mod ws;

use std::sync::Arc;

use causerie_shared::auth::IntegrityKey;
use causerie_store::Database;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::collaborators::{
    DirectorySeed, InMemoryBlocks, InMemoryDirectory, InMemoryGraph, NullPush, PushNotifier,
};
use crate::config::ServerConfig;
use crate::fanout::FanoutDispatcher;
use crate::lifecycle::ChatLifecycle;
use crate::limiter::FrameLimiter;
use crate::permissions::PermissionEngine;
use crate::pipeline::MessagePipeline;
use crate::presence::PresencePublisher;
use crate::registry::ConnectionRegistry;

/// The durable store behind one async handle.  SQLite access is
/// serialized; every component clones this.
pub type SharedStore = Arc<Mutex<Database>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,causerie_server=debug")),
        )
        .init();

    info!("Starting Causerie chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        db_path = %config.db_path.display(),
        seeded = config.seed_path.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    let store: SharedStore = Arc::new(Mutex::new(Database::open_at(&config.db_path)?));

    // The connection registry is constructed here and handed to every
    // component that needs it; it is never a hidden global.
    let registry = Arc::new(ConnectionRegistry::new());
    let presence = Arc::new(PresencePublisher::new(store.clone(), registry.clone()));

    // Collaborators.  The in-memory implementations back standalone
    // deployments; production swaps in networked clients behind the same
    // traits.
    let directory = Arc::new(InMemoryDirectory::new());
    let graph = Arc::new(InMemoryGraph::new());
    let blocks = Arc::new(InMemoryBlocks::new());
    if let Some(path) = &config.seed_path {
        match DirectorySeed::load(path) {
            Ok(seed) => {
                info!(
                    users = seed.users.len(),
                    follows = seed.follows.len(),
                    blocks = seed.blocks.len(),
                    "Seeding directory"
                );
                seed.apply(&directory, &graph, &blocks);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load seed file"),
        }
    }
    let push: Arc<dyn PushNotifier> = Arc::new(NullPush);

    let permissions = Arc::new(PermissionEngine::new(
        directory.clone(),
        graph.clone(),
        blocks.clone(),
        store.clone(),
    ));
    let lifecycle = Arc::new(ChatLifecycle::new(store.clone()));
    let fanout = Arc::new(FanoutDispatcher::new(registry.clone(), push));
    let pipeline = Arc::new(MessagePipeline::new(
        store.clone(),
        lifecycle,
        permissions,
        directory.clone(),
        fanout,
    ));

    let limiter = FrameLimiter::new(config.frame_rate, config.frame_burst);
    let integrity = Arc::new(IntegrityKey::derive(&config.integrity_secret));

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let purge_limiter = limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            purge_limiter.purge_stale(600.0);
        }
    });

    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
        registry,
        presence,
        directory,
        limiter,
        integrity,
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
