//! Unread-message ("badge") accounting.
//!
//! Badges are always derived from the loaded chat state and each member's read
//! cursor; nothing here is cached or incrementally maintained, so concurrent
//! appends and cursor advances can never drive a counter out of sync.

use std::collections::HashMap;

use courier_types::models::{ChatId, MessageId, UserId};

use crate::models::MessageMeta;

/// Loaded state of one chat, sufficient to compute badges.
///
/// `messages` may be a suffix of the chat's history: it must contain every
/// message newer than the smallest cursor in `cursors`.
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub chat_id: ChatId,
    /// Read cursor per active member.
    pub cursors: HashMap<UserId, MessageId>,
    pub messages: Vec<MessageMeta>,
}

impl ChatSnapshot {
    pub fn cursor(&self, user_id: UserId) -> Option<MessageId> {
        self.cursors.get(&user_id).copied()
    }

    pub fn badge(&self, user_id: UserId) -> u64 {
        match self.cursor(user_id) {
            Some(cursor) => badge(&self.messages, user_id, cursor),
            None => 0,
        }
    }
}

/// Messages authored by someone else with an id past the cursor.
pub fn badge(messages: &[MessageMeta], user_id: UserId, cursor: MessageId) -> u64 {
    messages
        .iter()
        .filter(|m| m.creator_id != user_id && m.id > cursor)
        .count() as u64
}

/// Sum of per-chat badges over chats where the user is an active member.
pub fn total_badge(snapshots: &[ChatSnapshot], user_id: UserId) -> u64 {
    snapshots.iter().map(|s| s.badge(user_id)).sum()
}

/// Whether a message counts as unread for the viewer given their cursor.
pub fn is_unread_for(meta: MessageMeta, viewer: UserId, cursor: MessageId) -> bool {
    meta.creator_id != viewer && meta.id > cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: MessageId, creator_id: UserId) -> MessageMeta {
        MessageMeta { id, creator_id }
    }

    fn snapshot(chat_id: ChatId, cursors: &[(UserId, MessageId)], messages: &[MessageMeta]) -> ChatSnapshot {
        ChatSnapshot {
            chat_id,
            cursors: cursors.iter().copied().collect(),
            messages: messages.to_vec(),
        }
    }

    #[test]
    fn own_messages_never_count() {
        let messages = [meta(101, 1), meta(102, 1), meta(103, 2)];
        assert_eq!(badge(&messages, 1, 0), 1);
        assert_eq!(badge(&messages, 2, 0), 2);
    }

    #[test]
    fn cursor_hides_older_messages() {
        let messages = [meta(101, 2), meta(102, 2), meta(103, 2)];
        assert_eq!(badge(&messages, 1, 102), 1);
        assert_eq!(badge(&messages, 1, 103), 0);
    }

    #[test]
    fn non_members_have_no_badge() {
        let s = snapshot(1, &[(1, 0)], &[meta(10, 1)]);
        assert_eq!(s.badge(3), 0);
    }

    #[test]
    fn total_sums_across_chats() {
        let a = snapshot(1, &[(1, 0), (2, 0)], &[meta(10, 2), meta(11, 2)]);
        let b = snapshot(2, &[(1, 12), (3, 0)], &[meta(12, 3), meta(13, 3)]);
        assert_eq!(total_badge(&[a, b], 1), 3);
    }

    #[test]
    fn unread_flag_matches_badge_rule() {
        assert!(is_unread_for(meta(5, 2), 1, 4));
        assert!(!is_unread_for(meta(5, 2), 1, 5));
        assert!(!is_unread_for(meta(5, 1), 1, 0));
    }
}
