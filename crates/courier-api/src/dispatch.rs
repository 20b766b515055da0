//! Persist-then-fan-out pipeline for new messages.
//!
//! The message is committed first; everything after that is best effort.
//! A failed live send or push is logged against the recipient and never
//! turns the sender's request into an error.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use courier_db::Database;
use courier_db::badge::{ChatSnapshot, total_badge};
use courier_db::models::{ChatRow, MessageRow};
use courier_gateway::ConnectionRegistry;
use courier_types::api::{ChatMessageResponse, SendMessageRequest};
use courier_types::error::ChatError;
use courier_types::events::ChatEvent;
use courier_types::models::{NewMessageContent, UserId};

use crate::push::{PushNotification, PushSender};
use crate::views::message_view;
use crate::with_db;

/// What happened for one recipient of a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientDelivery {
    pub user_id: UserId,
    /// At least one live socket accepted the event.
    pub live: bool,
    pub push_attempted: usize,
    pub push_delivered: usize,
    /// Recipient's badge in this chat, as carried in the event.
    pub chat_badge: u64,
    /// Recipient's badge across all chats, as carried in the event and push.
    pub total_badge: u64,
}

#[derive(Debug)]
pub struct Dispatched {
    /// The stored message as the author sees it.
    pub message: ChatMessageResponse,
    pub deliveries: Vec<RecipientDelivery>,
}

#[derive(Clone)]
pub struct MessageDispatcher {
    db: Arc<Database>,
    registry: ConnectionRegistry,
    push: Arc<dyn PushSender>,
}

impl MessageDispatcher {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry, push: Arc<dyn PushSender>) -> Self {
        Self { db, registry, push }
    }

    /// Validate, persist and fan out a message from `author_id` into `chat`.
    ///
    /// `chat` must already have been checked for the author's membership;
    /// the store re-checks it inside the write transaction.
    ///
    /// Persisting and fan-out run on their own task: dropping the returned
    /// future (the sender disconnecting) does not cancel either of them.
    pub async fn dispatch(
        &self,
        chat: &ChatRow,
        author_id: UserId,
        req: &SendMessageRequest,
    ) -> Result<Dispatched, ChatError> {
        let content = NewMessageContent::classify(req.text.as_deref(), req.image_id)?;

        let chat_id = chat.id;
        let this = self.clone();
        let chat = chat.clone();
        tokio::spawn(async move { this.persist_and_fan_out(&chat, author_id, content).await })
            .await
            .map_err(|e| {
                error!("Dispatch task for chat {} failed: {}", chat_id, e);
                ChatError::Storage(e.to_string())
            })?
    }

    async fn persist_and_fan_out(
        &self,
        chat: &ChatRow,
        author_id: UserId,
        content: NewMessageContent,
    ) -> Result<Dispatched, ChatError> {
        let chat_id = chat.id;
        let message = with_db(&self.db, move |db| db.append_message(chat_id, author_id, &content)).await?;
        debug!("Stored message {} in chat {} from user {}", message.id, chat_id, author_id);

        let author_cursor = chat
            .active_member(author_id)
            .map(|m| m.last_read_message_id)
            .unwrap_or_default();
        let own = message_view(&message, author_id, author_cursor);

        // Snapshot after the append so every badge already counts this message
        let snapshot = match with_db(&self.db, move |db| db.chat_snapshot(chat_id)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Message {} stored but fan-out skipped: {}", message.id, e);
                return Ok(Dispatched {
                    message: own,
                    deliveries: Vec::new(),
                });
            }
        };

        let sender_name = chat
            .members
            .iter()
            .find(|m| m.user_id == author_id)
            .map(|m| m.username.clone())
            .unwrap_or_default();

        let deliveries = self
            .fan_out(Arc::new(message), Arc::new(snapshot), author_id, sender_name)
            .await;

        Ok(Dispatched {
            message: own,
            deliveries,
        })
    }

    /// Deliver to every active member except the author, one task per
    /// recipient. Waits for all of them.
    async fn fan_out(
        &self,
        message: Arc<MessageRow>,
        snapshot: Arc<ChatSnapshot>,
        author_id: UserId,
        sender_name: String,
    ) -> Vec<RecipientDelivery> {
        let notification = Arc::new(PushNotification::new_message(&sender_name, &message));
        let mut recipients: Vec<UserId> = snapshot
            .cursors
            .keys()
            .copied()
            .filter(|id| *id != author_id)
            .collect();
        recipients.sort_unstable();

        let mut tasks = JoinSet::new();
        for recipient in recipients {
            let this = self.clone();
            let message = message.clone();
            let snapshot = snapshot.clone();
            let notification = notification.clone();
            tasks.spawn(async move {
                this.deliver_to(recipient, &message, &snapshot, &notification).await
            });
        }

        let mut deliveries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => error!("Fan-out task for message {} failed: {}", message.id, e),
            }
        }
        deliveries.sort_by_key(|d| d.user_id);
        deliveries
    }

    async fn deliver_to(
        &self,
        recipient: UserId,
        message: &MessageRow,
        snapshot: &ChatSnapshot,
        notification: &PushNotification,
    ) -> RecipientDelivery {
        let chat_badge = snapshot.badge(recipient);
        let total = match with_db(&self.db, move |db| db.user_snapshots(recipient)).await {
            Ok(snapshots) => total_badge(&snapshots, recipient),
            Err(e) => {
                warn!(
                    "Total badge for user {} unavailable in chat {}, using chat badge: {}",
                    recipient, message.chat_id, e
                );
                chat_badge
            }
        };

        let cursor = snapshot.cursor(recipient).unwrap_or_default();
        let mut payload = message_view(message, recipient, cursor);
        payload.unread_messages_in_chat = Some(chat_badge);
        payload.all_unread_messages = Some(total);
        let event = ChatEvent::NewMessage(payload);

        let (live, (push_attempted, push_delivered)) = tokio::join!(
            self.registry.send_to_user(recipient, &event),
            self.push_to(recipient, message, notification, total),
        );

        if !live {
            debug!(
                "User {} offline for message {} in chat {}",
                recipient, message.id, message.chat_id
            );
        }

        RecipientDelivery {
            user_id: recipient,
            live,
            push_attempted,
            push_delivered,
            chat_badge,
            total_badge: total,
        }
    }

    /// Push to every active device of the recipient. Returns
    /// `(attempted, delivered)`.
    async fn push_to(
        &self,
        recipient: UserId,
        message: &MessageRow,
        notification: &PushNotification,
        badge: u64,
    ) -> (usize, usize) {
        let tokens = match with_db(&self.db, move |db| db.active_device_tokens(recipient)).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    "Device lookup for user {} failed, no push for message {} in chat {}: {}",
                    recipient, message.id, message.chat_id, e
                );
                return (0, 0);
            }
        };

        let results = join_all(
            tokens
                .iter()
                .map(|token| self.push.send(token, notification, badge)),
        )
        .await;

        let delivered = results.iter().filter(|ok| **ok).count();
        if delivered < results.len() {
            warn!(
                "Push of message {} in chat {} to user {}: {} of {} devices failed",
                message.id,
                message.chat_id,
                recipient,
                results.len() - delivered,
                results.len()
            );
        }
        (results.len(), delivered)
    }
}
