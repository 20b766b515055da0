use thiserror::Error;

use crate::models::{ChatId, ImageId, UserId};

/// Coarse classification used to decide how an error surfaces to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before anything was persisted.
    Validation,
    /// Absent, or present but not visible to the caller. The two are
    /// indistinguishable to callers.
    NotFoundOrForbidden,
    /// A collaborator the operation depends on could not satisfy it.
    DependencyFailure,
    Unauthorized,
    Internal,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("message must carry exactly one of text or image")]
    InvalidMessageContent,

    #[error("Can't find chat with such id {0}")]
    ChatNotFound(ChatId),

    #[error("user {user_id} is not an active member of chat {chat_id}")]
    NotAMember { chat_id: ChatId, user_id: UserId },

    #[error("Can't find user with given id {0}")]
    UserNotFound(UserId),

    #[error("Can't find image with given id {0}")]
    ImageNotFound(ImageId),

    #[error("unauthorized")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidParticipants(_)
            | Self::InvalidMessageContent => ErrorKind::Validation,
            Self::ChatNotFound(_) | Self::NotAMember { .. } | Self::UserNotFound(_) => {
                ErrorKind::NotFoundOrForbidden
            }
            Self::ImageNotFound(_) => ErrorKind::DependencyFailure,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code. `NotAMember` shares the chat-not-found
    /// code so responses never reveal that a chat exists.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidParticipants(_) => "invalid_participants",
            Self::InvalidMessageContent => "invalid_message_content",
            Self::ChatNotFound(_) | Self::NotAMember { .. } => "chat_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::ImageNotFound(_) => "image_not_found",
            Self::Unauthorized => "unauthorized",
            Self::Storage(_) => "internal",
        }
    }

    /// Message safe to show the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotAMember { chat_id, .. } => Self::ChatNotFound(*chat_id).to_string(),
            Self::Storage(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_errors_do_not_leak_existence() {
        let missing = ChatError::ChatNotFound(5);
        let hidden = ChatError::NotAMember { chat_id: 5, user_id: 9 };

        assert_eq!(missing.code(), hidden.code());
        assert_eq!(missing.public_message(), hidden.public_message());
        assert_eq!(missing.kind(), hidden.kind());
    }

    #[test]
    fn storage_details_stay_internal() {
        let err = ChatError::Storage("disk I/O error at /var/lib/courier.db".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("/var/lib"));
    }
}
