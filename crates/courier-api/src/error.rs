use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use courier_types::error::{ChatError, ErrorKind};

/// HTTP rendering of a [`ChatError`].
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFoundOrForbidden => StatusCode::NOT_FOUND,
            // The client referenced something that doesn't exist
            ErrorKind::DependencyFailure => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body = json!({
            "error": self.0.code(),
            "message": self.0.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

/// Reject non-positive path/body ids before they reach the store.
pub fn positive_id(id: i64, what: &str) -> Result<i64, ApiError> {
    if id <= 0 {
        return Err(ChatError::InvalidRequest(format!("{} must be a positive id", what)).into());
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_membership_renders_as_not_found() {
        let hidden = ApiError(ChatError::NotAMember { chat_id: 3, user_id: 4 });
        let missing = ApiError(ChatError::ChatNotFound(3));
        assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
        assert_eq!(hidden.status(), missing.status());
    }

    #[test]
    fn status_per_kind() {
        assert_eq!(ApiError(ChatError::InvalidMessageContent).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(ChatError::ImageNotFound(1)).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(ChatError::Unauthorized).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError(ChatError::Storage("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rejects_non_positive_ids() {
        assert!(positive_id(0, "chat id").is_err());
        assert!(positive_id(-4, "chat id").is_err());
        assert_eq!(positive_id(7, "chat id").unwrap(), 7);
    }
}
