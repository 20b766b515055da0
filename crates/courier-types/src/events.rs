use serde::{Deserialize, Serialize};

use crate::api::ChatMessageResponse;
use crate::models::{ChatId, MessageId};

/// Events pushed to clients over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum ChatEvent {
    /// A message was posted; the payload is scoped to the receiving user.
    NewMessage(ChatMessageResponse),

    /// Another member read some of the receiving user's messages.
    MessageRead(MessageReadPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub chat_id: ChatId,
    pub message_ids: Vec<MessageId>,
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "NewMessage",
            Self::MessageRead(_) => "MessageRead",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_read_wire_shape() {
        let event = ChatEvent::MessageRead(MessageReadPayload { chat_id: 4, message_ids: vec![101] });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "eventType": "MessageRead",
                "data": { "chatId": 4, "messageIds": [101] }
            })
        );
    }
}
