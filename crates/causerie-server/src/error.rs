use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use causerie_shared::protocol::ServerEvent;
use causerie_store::StoreError;
use thiserror::Error;

/// Failure taxonomy for chat-core operations.
///
/// Rejections produce a single `Error` event to the caller and no side
/// effect; transient dependency failures (push, presence write) are not
/// represented here because they never fail the foreground operation --
/// they are logged warnings at the call site.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad or missing integrity token.  No side effect.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Permission engine said no (NotAllowed or MustMutualFollow).
    #[error("{0}")]
    PermissionDenied(String),

    /// Thread, message, or user missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Empty content with no attachments, oversize payloads, malformed ids.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("record".to_string()),
            other => ServerError::Store(other),
        }
    }
}

impl ServerError {
    /// The single `error` event surfaced to the calling connection.
    pub fn event(&self) -> ServerEvent {
        ServerEvent::Error {
            reason: self.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Auth(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::PermissionDenied(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage error".to_string(),
            ),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
