use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use courier_types::api::{Claims, CreateImageRequest, RegisterDeviceRequest};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn create_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateImageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let image = state.chats.create_image(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn register_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.chats.register_device(claims.sub, req.device_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
