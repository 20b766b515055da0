use courier_db::badge::is_unread_for;
use courier_db::models::{ChatRow, MessageRow};
use courier_types::api::{ChatMessageResponse, ChatResponse, ChatUserResponse};
use courier_types::models::{MessageId, UserId};

/// Render a message for `viewer`, whose read cursor in the chat is `cursor`.
pub(crate) fn message_view(row: &MessageRow, viewer: UserId, cursor: MessageId) -> ChatMessageResponse {
    ChatMessageResponse {
        id: row.id,
        chat_id: row.chat_id,
        creator_id: row.creator_id,
        created_at: row.created_at,
        content: row.content.clone(),
        status: row.status,
        is_my_message: row.creator_id == viewer,
        is_unread_for_me: is_unread_for(row.meta(), viewer, cursor),
        unread_messages_in_chat: None,
        all_unread_messages: None,
    }
}

pub(crate) fn chat_view(chat: &ChatRow, last_item: Option<ChatMessageResponse>) -> ChatResponse {
    ChatResponse {
        chat_id: chat.id,
        chat_users: chat
            .members
            .iter()
            .map(|m| ChatUserResponse {
                id: m.user_id,
                username: m.username.clone(),
                is_active: m.is_active,
            })
            .collect(),
        last_item,
    }
}
