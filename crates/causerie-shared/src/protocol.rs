//! JSON WebSocket protocol between clients and the chat server.
//!
//! Frames are internally tagged with a `type` field.  Inbound frames that
//! mutate state carry an integrity token computed over a canonical
//! `:`-joined representation of their significant arguments (see
//! [`crate::auth`]); read-only frames ride on the already-authenticated
//! connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttachmentId, ChatId, MessageId, UserId};

/// Message payload kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            "audio" => Some(MessageKind::Audio),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

/// Media kind of an attachment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            "file" => Some(MediaKind::File),
            _ => None,
        }
    }
}

/// An attachment reference supplied alongside a new message.  The media
/// itself is uploaded out of band; the chat core only stores the URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub url: String,
    pub kind: MediaKind,
}

/// Frames a client sends over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        recipient_id: UserId,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        attachments: Vec<AttachmentUpload>,
        token: String,
    },
    Typing {
        recipient_id: UserId,
        token: String,
    },
    MarkRead {
        chat_id: ChatId,
        token: String,
    },
    CreateChat {
        recipient_id: UserId,
        token: String,
    },
    EditMessage {
        message_id: MessageId,
        new_content: String,
        token: String,
    },
    UnsendMessage {
        message_id: MessageId,
        token: String,
    },
    /// Hub-based history fetch; read-only, replied to with
    /// [`ServerEvent::MessageHistory`] on the requesting connection only.
    FetchMessages {
        chat_id: ChatId,
        #[serde(default)]
        page: u32,
        #[serde(default)]
        page_size: Option<u32>,
    },
}

/// Client-visible view of a message.  Unsent messages never appear in any
/// view, so the flag is not part of the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub attachments: Vec<AttachmentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentView {
    pub id: AttachmentId,
    pub url: String,
    pub kind: MediaKind,
}

/// Client-visible view of a thread.  Per-side delete flags are server
/// state and never leave the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatView {
    pub id: ChatId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub created_at: DateTime<Utc>,
}

/// Events the server pushes to live connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PresenceChanged {
        user_id: UserId,
        is_online: bool,
    },
    MessageReceived {
        message: MessageView,
    },
    /// Echo of a successful send, delivered to the sender's devices.
    MessageSent {
        message: MessageView,
    },
    MessageEdited {
        message: MessageView,
    },
    MessageUnsent {
        message_id: MessageId,
    },
    MessagesRead {
        chat_id: ChatId,
        reader_id: UserId,
    },
    TypingIndicator {
        sender_id: UserId,
    },
    ChatCreated {
        chat: ChatView,
    },
    ChatRestored {
        chat: ChatView,
    },
    MessageHistory {
        chat_id: ChatId,
        page: u32,
        messages: Vec<MessageView>,
    },
    Error {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_json_shape() {
        let json = r#"{
            "type": "send_message",
            "recipient_id": 9,
            "content": "hello",
            "token": "deadbeef"
        }"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::SendMessage {
                recipient_id,
                content,
                kind,
                attachments,
                ..
            } => {
                assert_eq!(recipient_id, UserId(9));
                assert_eq!(content, "hello");
                assert_eq!(kind, MessageKind::Text);
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn server_event_round_trip() {
        let event = ServerEvent::MessagesRead {
            chat_id: ChatId::new(),
            reader_id: UserId(4),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"messages_read\""));
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn attachment_kind_strings() {
        assert_eq!(MediaKind::parse("image"), Some(MediaKind::Image));
        assert_eq!(MediaKind::parse("gif"), None);
        assert_eq!(MediaKind::Video.as_str(), "video");
    }
}
