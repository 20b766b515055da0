//! Operations behind the chat HTTP surface.
//!
//! Every caller-scoped operation first checks that the caller is still an
//! active, unblocked user, then that they are an active member of the chat
//! they address. A chat the caller cannot see is reported exactly like a chat
//! that doesn't exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use courier_db::Database;
use courier_db::badge::total_badge;
use courier_db::models::{ImageRow, MessageFilter};
use courier_gateway::registry::Outbound;
use courier_gateway::{ConnectionRegistry, SocketId};
use courier_types::api::{
    ChatMessageResponse, ChatResponse, CreateChatRequest, CreateImageRequest, MessagesQuery, Page,
    Pagination, ReadMessagesRequest, ReadMessagesResponse, SendMessageRequest, UserStatusResponse,
};
use courier_types::error::ChatError;
use courier_types::events::{ChatEvent, MessageReadPayload};
use courier_types::models::{ChatId, ImageRef, MessageId, UserConnectionStatus, UserId};

use crate::dispatch::{Dispatched, MessageDispatcher};
use crate::push::PushSender;
use crate::views::{chat_view, message_view};
use crate::with_db;

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    registry: ConnectionRegistry,
    dispatcher: MessageDispatcher,
}

impl ChatService {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry, push: Arc<dyn PushSender>) -> Self {
        let dispatcher = MessageDispatcher::new(db.clone(), registry.clone(), push);
        Self {
            db,
            registry,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    /// Create a chat between the caller and the requested opponents and
    /// subscribe every online member's sockets to it.
    pub async fn create_chat(
        &self,
        caller: UserId,
        req: CreateChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        self.require_active_user(caller).await?;

        let chat = with_db(&self.db, move |db| db.create_chat(caller, &req.chat_opponents_ids)).await?;
        for member in chat.active_members() {
            self.registry.join_group(member.user_id, chat.id).await;
        }

        info!("User {} created chat {} with {} members", caller, chat.id, chat.members.len());
        Ok(chat_view(&chat, None))
    }

    pub async fn get_chat(&self, caller: UserId, chat_id: ChatId) -> Result<ChatResponse, ChatError> {
        self.require_active_user(caller).await?;

        let (chat, last) = with_db(&self.db, move |db| {
            let chat = db.get_chat_for_member(chat_id, caller)?;
            let last = match chat.last_message_id {
                Some(id) => db.get_message(id)?,
                None => None,
            };
            Ok((chat, last))
        })
        .await
        .map_err(hide_membership)?;

        let cursor = chat
            .active_member(caller)
            .map(|m| m.last_read_message_id)
            .unwrap_or_default();
        let last_item = last.as_ref().map(|m| message_view(m, caller, cursor));
        Ok(chat_view(&chat, last_item))
    }

    /// Send a message as `caller`. The response is scoped to the author;
    /// per-recipient delivery outcomes are only logged.
    pub async fn send_message(
        &self,
        caller: UserId,
        chat_id: ChatId,
        req: SendMessageRequest,
    ) -> Result<ChatMessageResponse, ChatError> {
        self.send_message_traced(caller, chat_id, req)
            .await
            .map(|dispatched| dispatched.message)
    }

    /// Like [`send_message`](Self::send_message), also returning what
    /// happened for each recipient.
    pub async fn send_message_traced(
        &self,
        caller: UserId,
        chat_id: ChatId,
        req: SendMessageRequest,
    ) -> Result<Dispatched, ChatError> {
        self.require_active_user(caller).await?;

        let chat = with_db(&self.db, move |db| db.get_chat_for_member(chat_id, caller))
            .await
            .map_err(hide_membership)?;

        let dispatched = self
            .dispatcher
            .dispatch(&chat, caller, &req)
            .await
            .map_err(hide_membership)?;

        debug!(
            "Message {} in chat {}: {} recipients, {} live",
            dispatched.message.id,
            chat_id,
            dispatched.deliveries.len(),
            dispatched.deliveries.iter().filter(|d| d.live).count()
        );
        Ok(dispatched)
    }

    /// The caller's chats, most recent activity first.
    pub async fn get_chat_list(
        &self,
        caller: UserId,
        pagination: Pagination,
    ) -> Result<Page<ChatResponse>, ChatError> {
        self.require_active_user(caller).await?;

        let Pagination { limit, offset } = pagination.clamped();
        let (rows, total) =
            with_db(&self.db, move |db| db.list_chats_for_user(caller, offset, limit)).await?;

        let data = rows
            .iter()
            .map(|row| {
                let cursor = row
                    .chat
                    .active_member(caller)
                    .map(|m| m.last_read_message_id)
                    .unwrap_or_default();
                let last_item = row.last_message.as_ref().map(|m| message_view(m, caller, cursor));
                chat_view(&row.chat, last_item)
            })
            .collect();

        Ok(Page {
            data,
            next_offset: offset.saturating_add(limit),
            total_count: total,
        })
    }

    /// One page of a chat's history. Unread flags are computed against the
    /// caller's cursor as it was when the page was loaded.
    pub async fn get_messages(
        &self,
        caller: UserId,
        chat_id: ChatId,
        query: MessagesQuery,
    ) -> Result<Page<ChatMessageResponse>, ChatError> {
        self.require_active_user(caller).await?;

        let Pagination { limit, offset } = query.pagination();
        let filter = MessageFilter {
            offset,
            limit,
            start_date: query.start_date,
            last_id: query.last_id,
        };

        let (cursor, rows, total) = with_db(&self.db, move |db| {
            let chat = db.get_chat_for_member(chat_id, caller)?;
            let cursor = chat
                .active_member(caller)
                .map(|m| m.last_read_message_id)
                .unwrap_or_default();
            let (rows, total) = db.list_messages(chat_id, &filter)?;
            Ok((cursor, rows, total))
        })
        .await
        .map_err(hide_membership)?;

        Ok(Page {
            data: rows.iter().map(|m| message_view(m, caller, cursor)).collect(),
            next_offset: offset.saturating_add(limit),
            total_count: total,
        })
    }

    /// Advance the caller's read cursor and notify the authors of the
    /// messages that became read, one event per author.
    pub async fn read_messages(
        &self,
        caller: UserId,
        chat_id: ChatId,
        req: ReadMessagesRequest,
    ) -> Result<ReadMessagesResponse, ChatError> {
        self.require_active_user(caller).await?;

        let selector = req.selector();
        let (outcome, chat_badge, total) = with_db(&self.db, move |db| {
            let outcome = match selector {
                Some(selector) => Some(db.advance_read_cursor(chat_id, caller, &selector)?),
                None => {
                    db.get_chat_for_member(chat_id, caller)?;
                    None
                }
            };
            let chat_badge = db.chat_snapshot(chat_id)?.badge(caller);
            let total = total_badge(&db.user_snapshots(caller)?, caller);
            Ok((outcome, chat_badge, total))
        })
        .await
        .map_err(hide_membership)?;

        let mut newly_read: Vec<MessageId> = Vec::new();
        let mut cursor = None;
        if let Some(outcome) = outcome {
            if outcome.cursor > 0 {
                cursor = Some(outcome.cursor);
            }

            let mut by_author: BTreeMap<UserId, Vec<MessageId>> = BTreeMap::new();
            for meta in &outcome.newly_read {
                by_author.entry(meta.creator_id).or_default().push(meta.id);
                newly_read.push(meta.id);
            }
            for (author, message_ids) in by_author {
                let event = ChatEvent::MessageRead(MessageReadPayload { chat_id, message_ids });
                if !self.registry.send_to_user(author, &event).await {
                    debug!("Read receipt for user {} not delivered (offline)", author);
                }
            }
        }

        Ok(ReadMessagesResponse {
            unread_messages_in_chat: chat_badge,
            all_unread_messages: total,
            messages: newly_read,
            read_till_message_id: cursor,
        })
    }

    /// The caller's badge summed over every chat they are an active member of.
    pub async fn get_all_unread_messages_count(&self, caller: UserId) -> Result<u64, ChatError> {
        self.require_active_user(caller).await?;

        let snapshots = with_db(&self.db, move |db| db.user_snapshots(caller)).await?;
        Ok(total_badge(&snapshots, caller))
    }

    pub async fn get_user_status(&self, user_id: UserId) -> Result<UserStatusResponse, ChatError> {
        with_db(&self.db, move |db| db.get_user_by_id(user_id))
            .await?
            .ok_or(ChatError::UserNotFound(user_id))?;

        let online = self.registry.is_online(user_id).await;
        Ok(UserStatusResponse {
            user_id,
            status: UserConnectionStatus::from(online),
        })
    }

    /// Register a live socket for `user_id` and subscribe it to every chat the
    /// user is an active member of.
    ///
    /// Registration happens before the chat lookup, so a chat created in
    /// between is still joined through `create_chat`'s `join_group`.
    pub async fn connect(
        &self,
        user_id: UserId,
    ) -> Result<(SocketId, UnboundedReceiver<Outbound>), ChatError> {
        let (socket_id, rx) = self.registry.register(user_id, []).await;

        let chat_ids = match with_db(&self.db, move |db| db.active_chat_ids_for_user(user_id)).await {
            Ok(chat_ids) => chat_ids,
            Err(e) => {
                self.registry.unregister(socket_id).await;
                return Err(e);
            }
        };
        for chat_id in &chat_ids {
            self.registry.join_group(user_id, *chat_id).await;
        }

        debug!("Socket {} of user {} seeded with {} chats", socket_id, user_id, chat_ids.len());
        Ok((socket_id, rx))
    }

    /// Record an uploaded image so messages can reference it.
    pub async fn create_image(
        &self,
        caller: UserId,
        req: CreateImageRequest,
    ) -> Result<ImageRef, ChatError> {
        self.require_active_user(caller).await?;

        let path = req.path.trim().to_string();
        if path.is_empty() {
            return Err(ChatError::InvalidRequest("image path must not be empty".into()));
        }
        let image: ImageRow = with_db(&self.db, move |db| {
            db.create_image(caller, &path, req.compact_path.as_deref())
        })
        .await?;
        Ok(image.to_ref())
    }

    pub async fn register_device(&self, caller: UserId, device_token: String) -> Result<(), ChatError> {
        self.require_active_user(caller).await?;

        let token = device_token.trim().to_string();
        if token.is_empty() {
            return Err(ChatError::InvalidRequest("device token must not be empty".into()));
        }
        with_db(&self.db, move |db| db.register_device(caller, &token)).await
    }

    /// A deactivated or blocked account keeps a valid token until it expires;
    /// reject it here.
    pub async fn require_active_user(&self, user_id: UserId) -> Result<(), ChatError> {
        let user = with_db(&self.db, move |db| db.get_user_by_id(user_id)).await?;
        match user {
            Some(user) if user.can_chat() => Ok(()),
            _ => Err(ChatError::Unauthorized),
        }
    }
}

/// Outsiders get the same answer as for a missing chat.
fn hide_membership(err: ChatError) -> ChatError {
    match err {
        ChatError::NotAMember { chat_id, .. } => ChatError::ChatNotFound(chat_id),
        other => other,
    }
}
