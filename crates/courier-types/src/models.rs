use serde::{Deserialize, Serialize};

use crate::error::ChatError;

pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;
pub type ImageId = i64;

/// An image record resolved from the media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub id: ImageId,
    pub path: String,
    pub compact_path: Option<String>,
}

/// Persisted message body. Exactly one kind of content exists per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "camelCase")]
pub enum MessageContent {
    Text { text: String },
    Image { image: ImageRef },
}

impl MessageContent {
    /// Short human-readable rendering used for push notification bodies.
    pub fn summary(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Image { .. } => "Image",
        }
    }
}

/// Content of a message that has been classified but not yet persisted.
/// Image references still have to be resolved against the media store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewMessageContent {
    Text(String),
    Image(ImageId),
}

impl NewMessageContent {
    /// Classify raw request fields. Exactly one of `text` / `image_id` must be
    /// present; whitespace-only text counts as absent.
    pub fn classify(text: Option<&str>, image_id: Option<ImageId>) -> Result<Self, ChatError> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        match (text, image_id) {
            (Some(text), None) => Ok(Self::Text(text.to_string())),
            (None, Some(image_id)) => Ok(Self::Image(image_id)),
            _ => Err(ChatError::InvalidMessageContent),
        }
    }
}

/// Legacy per-message delivery status. Informational only: unread counts are
/// always derived from read cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "Sent",
            Self::Read => "Read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Sent" => Some(Self::Sent),
            "Read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// Which messages a read-cursor advance should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSelector {
    /// Only these message ids.
    Ids(Vec<MessageId>),
    /// Every message with id <= the bound.
    UpTo(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserConnectionStatus {
    Online,
    Offline,
}

impl From<bool> for UserConnectionStatus {
    fn from(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_requires_exactly_one_kind() {
        assert_eq!(
            NewMessageContent::classify(Some("  hi "), None).unwrap(),
            NewMessageContent::Text("hi".into())
        );
        assert_eq!(
            NewMessageContent::classify(None, Some(7)).unwrap(),
            NewMessageContent::Image(7)
        );
        assert!(matches!(
            NewMessageContent::classify(Some("hi"), Some(7)),
            Err(ChatError::InvalidMessageContent)
        ));
        assert!(matches!(
            NewMessageContent::classify(None, None),
            Err(ChatError::InvalidMessageContent)
        ));
        assert!(matches!(
            NewMessageContent::classify(Some("   "), None),
            Err(ChatError::InvalidMessageContent)
        ));
    }

    #[test]
    fn image_summary_is_short() {
        let content = MessageContent::Image {
            image: ImageRef { id: 1, path: "a/b.png".into(), compact_path: None },
        };
        assert_eq!(content.summary(), "Image");
    }
}
