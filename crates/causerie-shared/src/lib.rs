//! # causerie-shared
//!
//! Types shared between the Causerie chat server and its clients: typed
//! identifiers, the JSON WebSocket protocol, protocol-wide constants, and
//! the integrity-token scheme that authenticates state-mutating calls.

pub mod auth;
pub mod constants;
pub mod protocol;
pub mod types;

pub use auth::IntegrityKey;
pub use protocol::{ClientFrame, ServerEvent};
pub use types::{AttachmentId, ChatId, ConnectionId, MessageId, PairKey, UserId};
