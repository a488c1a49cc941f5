//! The message pipeline: validate, persist, fan out.
//!
//! Every mutating operation follows the same contract: rejections happen
//! before any side effect and surface as a single error to the caller;
//! once the durable write lands, the event is broadcast to every relevant
//! live connection, and transient dependency failures (push, presence) can
//! no longer roll it back.

use std::collections::BTreeSet;
use std::sync::Arc;

use causerie_shared::constants::{
    DEFAULT_PAGE_SIZE, MAX_ATTACHMENTS, MAX_CONTENT_LEN, MAX_PAGE_SIZE, PUSH_PREVIEW_LEN,
};
use causerie_shared::protocol::{
    AttachmentUpload, AttachmentView, ChatView, MessageKind, MessageView, ServerEvent,
};
use causerie_shared::types::{ChatId, ConnectionId, MessageId, UserId};
use causerie_store::{ChatThread, MediaAttachment, Message, StoreError};
use chrono::Utc;
use tracing::info;

use crate::collaborators::UserDirectory;
use crate::error::ServerError;
use crate::fanout::FanoutDispatcher;
use crate::lifecycle::ChatLifecycle;
use crate::permissions::PermissionEngine;
use crate::SharedStore;

pub struct MessagePipeline {
    store: SharedStore,
    lifecycle: Arc<ChatLifecycle>,
    permissions: Arc<PermissionEngine>,
    directory: Arc<dyn UserDirectory>,
    fanout: Arc<FanoutDispatcher>,
}

impl MessagePipeline {
    pub fn new(
        store: SharedStore,
        lifecycle: Arc<ChatLifecycle>,
        permissions: Arc<PermissionEngine>,
        directory: Arc<dyn UserDirectory>,
        fanout: Arc<FanoutDispatcher>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            permissions,
            directory,
            fanout,
        }
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Validate, persist, and deliver a new message.
    ///
    /// The returned view is the reply for the originating connection; the
    /// sender's other devices receive the same view as a `MessageSent`
    /// echo, the recipient's devices as `MessageReceived` (or one push
    /// notification if none are live).
    pub async fn send(
        &self,
        sender: UserId,
        origin: ConnectionId,
        recipient: UserId,
        content: String,
        kind: MessageKind,
        attachments: Vec<AttachmentUpload>,
    ) -> Result<MessageView, ServerError> {
        self.validate_send(sender, recipient, &content, &attachments)?;
        self.require_users(sender, recipient).await?;
        self.require_permission(sender, recipient).await?;

        let thread = self.resolve_thread(sender, recipient).await?;

        let message = Message {
            id: MessageId::new(),
            thread_id: thread.id,
            sender_id: sender,
            kind,
            content,
            created_at: Utc::now(),
            read_at: None,
            is_edited: false,
            is_unsent: false,
        };
        let records: Vec<MediaAttachment> = attachments
            .into_iter()
            .map(|upload| MediaAttachment {
                id: causerie_shared::types::AttachmentId::new(),
                message_id: message.id,
                url: upload.url,
                kind: upload.kind,
            })
            .collect();

        {
            let db = self.store.lock().await;
            db.insert_message(&message)?;
            // Attachments land in a follow-up write keyed by the new id.
            db.insert_attachments(&records)?;
        }

        let view = view_of(&message, &records);
        let summary = self.push_summary(sender, &view).await;
        self.fanout.deliver_or_push(
            &ServerEvent::MessageReceived {
                message: view.clone(),
            },
            recipient,
            summary,
        );
        self.fanout.deliver_excluding(
            &ServerEvent::MessageSent {
                message: view.clone(),
            },
            sender,
            origin,
        );

        Ok(view)
    }

    fn validate_send(
        &self,
        sender: UserId,
        recipient: UserId,
        content: &str,
        attachments: &[AttachmentUpload],
    ) -> Result<(), ServerError> {
        if sender == recipient {
            return Err(ServerError::Validation(
                "cannot message yourself".to_string(),
            ));
        }
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ServerError::Validation(
                "message needs content or at least one attachment".to_string(),
            ));
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(ServerError::Validation("message content too long".to_string()));
        }
        if attachments.len() > MAX_ATTACHMENTS {
            return Err(ServerError::Validation("too many attachments".to_string()));
        }
        if attachments.iter().any(|a| a.url.trim().is_empty()) {
            return Err(ServerError::Validation("attachment url is empty".to_string()));
        }
        Ok(())
    }

    /// Find or create the thread, emitting `ChatCreated` / `ChatRestored`
    /// to both parties as appropriate.  The restore runs before the
    /// message write so the new message is never caught by the
    /// recipient's stale delete-timestamp bound.
    async fn resolve_thread(
        &self,
        sender: UserId,
        recipient: UserId,
    ) -> Result<ChatThread, ServerError> {
        let (thread, created) = self.lifecycle.find_or_create(sender, recipient).await?;
        if created {
            self.fanout.deliver(
                &ServerEvent::ChatCreated {
                    chat: chat_view(&thread),
                },
                &[thread.user_a, thread.user_b],
            );
            return Ok(thread);
        }

        let (thread, restored) = self.lifecycle.restore_if_needed(&thread, recipient).await?;
        if restored {
            self.fanout.deliver(
                &ServerEvent::ChatRestored {
                    chat: chat_view(&thread),
                },
                &[thread.user_a, thread.user_b],
            );
        }
        Ok(thread)
    }

    // ------------------------------------------------------------------
    // Edit / unsend
    // ------------------------------------------------------------------

    /// Replace a message's content.  Sender-only; unsent messages cannot
    /// be edited.  Both parties receive the full updated message.
    pub async fn edit(
        &self,
        sender: UserId,
        message_id: MessageId,
        new_content: String,
    ) -> Result<MessageView, ServerError> {
        if new_content.trim().is_empty() {
            return Err(ServerError::Validation(
                "edited content cannot be empty".to_string(),
            ));
        }
        if new_content.len() > MAX_CONTENT_LEN {
            return Err(ServerError::Validation("message content too long".to_string()));
        }

        let (view, thread) = {
            let db = self.store.lock().await;
            let message = get_message(&db, message_id)?;
            if message.sender_id != sender {
                return Err(ServerError::PermissionDenied(
                    "only the sender may edit a message".to_string(),
                ));
            }
            if message.is_unsent {
                return Err(ServerError::Validation(
                    "message was unsent".to_string(),
                ));
            }

            db.set_message_content(message_id, &new_content)?;
            let updated = get_message(&db, message_id)?;
            let records = db.attachments_of(message_id)?;
            let thread = db.get_thread(updated.thread_id)?;
            (view_of(&updated, &records), thread)
        };

        self.fanout.deliver(
            &ServerEvent::MessageEdited {
                message: view.clone(),
            },
            &[thread.user_a, thread.user_b],
        );
        Ok(view)
    }

    /// Retract a message.  Sender-only and idempotent; the row is kept
    /// server-side but leaves every history, preview, and unread count.
    /// Clients only learn the id.
    pub async fn unsend(&self, sender: UserId, message_id: MessageId) -> Result<(), ServerError> {
        let thread = {
            let db = self.store.lock().await;
            let message = get_message(&db, message_id)?;
            if message.sender_id != sender {
                return Err(ServerError::PermissionDenied(
                    "only the sender may unsend a message".to_string(),
                ));
            }
            if message.is_unsent {
                return Ok(());
            }
            db.set_message_unsent(message_id)?;
            db.get_thread(message.thread_id)?
        };

        self.fanout.deliver(
            &ServerEvent::MessageUnsent { message_id },
            &[thread.user_a, thread.user_b],
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read receipts
    // ------------------------------------------------------------------

    /// Batch-mark everything unread in the thread that the caller did not
    /// send.  The read event goes to the distinct senders of the rows
    /// actually transitioned -- never to the caller, and not at all when
    /// the call marked nothing (idempotence).
    pub async fn mark_read(&self, caller: UserId, chat_id: ChatId) -> Result<usize, ServerError> {
        let marked = {
            let db = self.store.lock().await;
            let thread = get_thread(&db, chat_id)?;
            if !thread.is_participant(caller) {
                return Err(ServerError::NotFound("chat".to_string()));
            }
            db.mark_thread_read(chat_id, caller, Utc::now())?
        };

        if marked.is_empty() {
            return Ok(0);
        }

        let senders: BTreeSet<UserId> = marked.iter().map(|m| m.sender_id).collect();
        let event = ServerEvent::MessagesRead {
            chat_id,
            reader_id: caller,
        };
        for sender in senders {
            self.fanout.deliver(&event, &[sender]);
        }
        Ok(marked.len())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// The caller's view of a thread page.  The lower bound is the
    /// caller's delete timestamp; unsent messages never appear.  Both the
    /// REST page and the hub fetch come through here, so the filter
    /// cannot diverge between them.
    pub async fn history(
        &self,
        caller: UserId,
        chat_id: ChatId,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Vec<MessageView>, ServerError> {
        let size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let db = self.store.lock().await;
        let thread = get_thread(&db, chat_id)?;
        if !thread.is_participant(caller) {
            return Err(ServerError::NotFound("chat".to_string()));
        }

        let bound = thread.history_bound_for(caller);
        let rows = db.visible_messages(chat_id, bound, page, size)?;
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let records = db.attachments_of(row.id)?;
            views.push(view_of(&row, &records));
        }
        Ok(views)
    }

    // ------------------------------------------------------------------
    // Typing / chat creation
    // ------------------------------------------------------------------

    /// Forward a typing indicator to the recipient's live connections.
    /// No durable state and no push fallback.
    pub async fn typing(&self, sender: UserId, recipient: UserId) -> Result<(), ServerError> {
        if !self.directory.user_exists(recipient).await {
            return Err(ServerError::NotFound("user".to_string()));
        }
        self.fanout.deliver(
            &ServerEvent::TypingIndicator { sender_id: sender },
            &[recipient],
        );
        Ok(())
    }

    /// Explicit thread creation ahead of the first message.
    pub async fn create_chat(
        &self,
        caller: UserId,
        recipient: UserId,
    ) -> Result<(ChatView, bool), ServerError> {
        if caller == recipient {
            return Err(ServerError::Validation(
                "cannot open a chat with yourself".to_string(),
            ));
        }
        self.require_users(caller, recipient).await?;
        self.require_permission(caller, recipient).await?;

        let (thread, created) = self.lifecycle.find_or_create(caller, recipient).await?;
        let chat = chat_view(&thread);
        if created {
            self.fanout.deliver(
                &ServerEvent::ChatCreated { chat: chat.clone() },
                &[thread.user_a, thread.user_b],
            );
        }
        Ok((chat, created))
    }

    /// Soft-delete the caller's side of a thread; see
    /// [`ChatLifecycle::soft_delete`] for the both-sides purge.
    pub async fn delete_chat(&self, caller: UserId, chat_id: ChatId) -> Result<(), ServerError> {
        self.lifecycle.soft_delete(chat_id, caller).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require_users(&self, a: UserId, b: UserId) -> Result<(), ServerError> {
        if !self.directory.user_exists(a).await || !self.directory.user_exists(b).await {
            return Err(ServerError::NotFound("user".to_string()));
        }
        Ok(())
    }

    async fn require_permission(
        &self,
        sender: UserId,
        recipient: UserId,
    ) -> Result<(), ServerError> {
        let decision = self.permissions.check(sender, recipient).await?;
        if !decision.is_allowed() {
            let reason = decision
                .denial_reason()
                .unwrap_or_else(|| "not allowed".to_string());
            return Err(ServerError::PermissionDenied(reason));
        }
        if let crate::permissions::PermissionDecision::Allowed { note: Some(note) } = &decision {
            info!(sender = %sender, recipient = %recipient, note, "send allowed with caveat");
        }
        Ok(())
    }

    /// "{sender}: {truncated content}" for the push collaborator.
    async fn push_summary(&self, sender: UserId, view: &MessageView) -> String {
        let name = self
            .directory
            .profile(sender)
            .await
            .map(|p| p.display_name)
            .unwrap_or_else(|| "Someone".to_string());

        let preview = if view.content.trim().is_empty() {
            "sent an attachment".to_string()
        } else if view.content.chars().count() > PUSH_PREVIEW_LEN {
            let truncated: String = view.content.chars().take(PUSH_PREVIEW_LEN).collect();
            format!("{truncated}…")
        } else {
            view.content.clone()
        };

        format!("{name}: {preview}")
    }
}

fn get_message(db: &causerie_store::Database, id: MessageId) -> Result<Message, ServerError> {
    db.get_message(id).map_err(|e| match e {
        StoreError::NotFound => ServerError::NotFound("message".to_string()),
        other => other.into(),
    })
}

fn get_thread(db: &causerie_store::Database, id: ChatId) -> Result<ChatThread, ServerError> {
    db.get_thread(id).map_err(|e| match e {
        StoreError::NotFound => ServerError::NotFound("chat".to_string()),
        other => other.into(),
    })
}

fn view_of(message: &Message, attachments: &[MediaAttachment]) -> MessageView {
    MessageView {
        id: message.id,
        chat_id: message.thread_id,
        sender_id: message.sender_id,
        kind: message.kind,
        content: message.content.clone(),
        created_at: message.created_at,
        read_at: message.read_at,
        is_edited: message.is_edited,
        attachments: attachments
            .iter()
            .map(|a| AttachmentView {
                id: a.id,
                url: a.url.clone(),
                kind: a.kind,
            })
            .collect(),
    }
}

fn chat_view(thread: &ChatThread) -> ChatView {
    ChatView {
        id: thread.id,
        user_a: thread.user_a,
        user_b: thread.user_b,
        created_at: thread.created_at,
    }
}
