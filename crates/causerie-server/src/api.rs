use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    routing::{delete, get},
    Json, Router,
};
use causerie_shared::auth::IntegrityKey;
use causerie_shared::protocol::MessageView;
use causerie_shared::types::{ChatId, UserId};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::UserDirectory;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::limiter::FrameLimiter;
use crate::pipeline::MessagePipeline;
use crate::presence::PresencePublisher;
use crate::registry::ConnectionRegistry;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub pipeline: Arc<MessagePipeline>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresencePublisher>,
    pub directory: Arc<dyn UserDirectory>,
    pub limiter: FrameLimiter,
    pub integrity: Arc<IntegrityKey>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        .route("/chats/{chat_id}/messages", get(fetch_messages))
        .route("/chats/{chat_id}", delete(delete_chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    live_connections: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.registry.online_users().len(),
        live_connections: state.registry.connection_count(),
    })
}

#[derive(Deserialize)]
struct HistoryQuery {
    user_id: i64,
    token: String,
    #[serde(default)]
    page: u32,
    page_size: Option<u32>,
}

/// Paginated history.  Same connection credential as the WebSocket
/// upgrade, and the exact same visibility filter as the hub fetch.
async fn fetch_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let user = UserId(query.user_id);
    if !state
        .integrity
        .verify(&["connect", &query.user_id.to_string()], &query.token)
    {
        return Err(ServerError::Auth("invalid token".to_string()));
    }

    let messages = state
        .pipeline
        .history(user, ChatId(chat_id), query.page, query.page_size)
        .await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct DeleteQuery {
    user_id: i64,
    token: String,
}

/// Soft-delete the caller's side of a thread.  The second side's delete
/// purges the thread outright.
async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = UserId(query.user_id);
    if !state.integrity.verify(
        &["delete", &query.user_id.to_string(), &chat_id.to_string()],
        &query.token,
    ) {
        return Err(ServerError::Auth("invalid token".to_string()));
    }

    state.pipeline.delete_chat(user, ChatId(chat_id)).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP/WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
