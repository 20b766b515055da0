use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use courier_types::api::{Claims, CreateChatRequest, Pagination, UnreadCountResponse};
use courier_types::models::{ChatId, UserId};

use crate::auth::AppState;
use crate::error::{ApiError, positive_id};

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for id in &req.chat_opponents_ids {
        positive_id(*id, "opponent id")?;
    }
    let chat = state.chats.create_chat(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.chats.get_chat_list(claims.sub, pagination).await?;
    Ok(Json(page))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
) -> Result<impl IntoResponse, ApiError> {
    let chat_id = positive_id(chat_id, "chat id")?;
    let chat = state.chats.get_chat(claims.sub, chat_id).await?;
    Ok(Json(chat))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let all_unread_messages = state.chats.get_all_unread_messages_count(claims.sub).await?;
    Ok(Json(UnreadCountResponse { all_unread_messages }))
}

pub async fn user_status(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = positive_id(user_id, "user id")?;
    let status = state.chats.get_user_status(user_id).await?;
    Ok(Json(status))
}
