use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use courier_types::api::{Claims, MessagesQuery, ReadMessagesRequest, SendMessageRequest};
use courier_types::models::ChatId;

use crate::auth::AppState;
use crate::error::{ApiError, positive_id};

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat_id = positive_id(chat_id, "chat id")?;
    if let Some(image_id) = req.image_id {
        positive_id(image_id, "image id")?;
    }
    let message = state.chats.send_message(claims.sub, chat_id, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let chat_id = positive_id(chat_id, "chat id")?;
    let page = state.chats.get_messages(claims.sub, chat_id, query).await?;
    Ok(Json(page))
}

pub async fn read_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<ReadMessagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat_id = positive_id(chat_id, "chat id")?;
    let read = state.chats.read_messages(claims.sub, chat_id, req).await?;
    Ok(Json(read))
}
