use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    ChatId, ImageId, MessageContent, MessageId, MessageStatus, ReadSelector, UserConnectionStatus,
    UserId,
};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
}

// -- Pagination --

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: default_limit(), offset: 0 }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 100;

    pub fn clamped(self) -> Self {
        Self { limit: self.limit.clamp(1, Self::MAX_LIMIT), offset: self.offset }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next_offset: u32,
    pub total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    /// Incremental sync: only messages created strictly after this instant,
    /// oldest first.
    pub start_date: Option<DateTime<Utc>>,
    /// Keyset pagination for backward scroll: only messages older than this id.
    pub last_id: Option<MessageId>,
}

impl MessagesQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination { limit: self.limit, offset: self.offset }.clamped()
    }
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChatRequest {
    pub chat_opponents_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUserResponse {
    pub id: UserId,
    pub username: String,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub chat_id: ChatId,
    pub chat_users: Vec<ChatUserResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_item: Option<ChatMessageResponse>,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub image_id: Option<ImageId>,
}

/// A message as seen by one particular user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageResponse {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub content: MessageContent,
    pub status: MessageStatus,
    pub is_my_message: bool,
    pub is_unread_for_me: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_messages_in_chat: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_unread_messages: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadMessagesRequest {
    #[serde(default)]
    pub message_ids: Vec<MessageId>,
    pub read_till_message_id: Option<MessageId>,
}

impl ReadMessagesRequest {
    /// Explicit ids win over the upper bound; a non-positive bound selects nothing.
    pub fn selector(&self) -> Option<ReadSelector> {
        if !self.message_ids.is_empty() {
            return Some(ReadSelector::Ids(self.message_ids.clone()));
        }
        match self.read_till_message_id {
            Some(bound) if bound > 0 => Some(ReadSelector::UpTo(bound)),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessagesResponse {
    pub unread_messages_in_chat: u64,
    pub all_unread_messages: u64,
    /// Ids newly covered by the caller's read cursor.
    pub messages: Vec<MessageId>,
    pub read_till_message_id: Option<MessageId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub all_unread_messages: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusResponse {
    pub user_id: UserId,
    pub status: UserConnectionStatus,
}

// -- Media / devices --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateImageRequest {
    pub path: String,
    pub compact_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterDeviceRequest {
    pub device_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageRef;

    #[test]
    fn read_request_prefers_explicit_ids() {
        let req = ReadMessagesRequest { message_ids: vec![3, 4], read_till_message_id: Some(10) };
        assert_eq!(req.selector(), Some(ReadSelector::Ids(vec![3, 4])));

        let req = ReadMessagesRequest { message_ids: vec![], read_till_message_id: Some(10) };
        assert_eq!(req.selector(), Some(ReadSelector::UpTo(10)));

        let req = ReadMessagesRequest { message_ids: vec![], read_till_message_id: Some(0) };
        assert_eq!(req.selector(), None);
    }

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination { limit: 0, offset: 4 }.clamped();
        assert_eq!((p.limit, p.offset), (1, 4));
        let p = Pagination { limit: 5000, offset: 0 }.clamped();
        assert_eq!(p.limit, Pagination::MAX_LIMIT);
    }

    #[test]
    fn message_content_is_flattened() {
        let msg = ChatMessageResponse {
            id: 101,
            chat_id: 1,
            creator_id: 1,
            created_at: Utc::now(),
            content: MessageContent::Image {
                image: ImageRef { id: 3, path: "img/3.png".into(), compact_path: None },
            },
            status: MessageStatus::Sent,
            is_my_message: true,
            is_unread_for_me: false,
            unread_messages_in_chat: None,
            all_unread_messages: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["messageType"], "image");
        assert_eq!(json["image"]["path"], "img/3.png");
        assert!(json.get("unreadMessagesInChat").is_none());
    }
}
