//! Database row types. Distinct from courier-types API models so the storage
//! layer can evolve independently of the wire format.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use courier_types::models::{
    ChatId, ImageId, ImageRef, MessageContent, MessageId, MessageStatus, UserId,
};

pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub password: String,
    pub is_active: bool,
    pub is_blocked: bool,
    pub created_at: String,
}

impl UserRow {
    /// Blocked users are treated as inactive for chat purposes.
    pub fn can_chat(&self) -> bool {
        self.is_active && !self.is_blocked
    }
}

pub struct ImageRow {
    pub id: ImageId,
    pub owner_id: UserId,
    pub path: String,
    pub compact_path: Option<String>,
    pub is_active: bool,
}

impl ImageRow {
    pub fn to_ref(&self) -> ImageRef {
        ImageRef {
            id: self.id,
            path: self.path.clone(),
            compact_path: self.compact_path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatUserRow {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
    pub is_active: bool,
    pub last_read_message_id: MessageId,
}

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: ChatId,
    pub last_message_id: Option<MessageId>,
    pub created_at: String,
    /// Creator first, then opponents in the order they were added.
    pub members: Vec<ChatUserRow>,
}

impl ChatRow {
    pub fn active_member(&self, user_id: UserId) -> Option<&ChatUserRow> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id && m.is_active)
    }

    pub fn active_members(&self) -> impl Iterator<Item = &ChatUserRow> {
        self.members.iter().filter(|m| m.is_active)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub content: MessageContent,
    pub status: MessageStatus,
    pub is_active: bool,
}

impl MessageRow {
    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            id: self.id,
            creator_id: self.creator_id,
        }
    }
}

/// The two fields unread accounting needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    pub id: MessageId,
    pub creator_id: UserId,
}

pub struct ChatListRow {
    pub chat: ChatRow,
    pub last_message: Option<MessageRow>,
}

/// Result of advancing a member's read cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub previous_cursor: MessageId,
    pub cursor: MessageId,
    /// Messages by other members newly covered by the cursor, ascending by id.
    pub newly_read: Vec<MessageMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub offset: u32,
    pub limit: u32,
    pub start_date: Option<DateTime<Utc>>,
    pub last_id: Option<MessageId>,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC so that string order
/// matches chronological order.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // SQLite's datetime('now') format, no timezone
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}
