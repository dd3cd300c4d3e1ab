use crate::dto::UploadUrlResponse;
use crate::errors::ApiError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

pub async fn request_upload(State(state): State<AppState>) -> Json<UploadUrlResponse> {
    Json(UploadUrlResponse {
        upload_url: state.objects.new_upload_url(),
    })
}

pub async fn upload(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let stored = state.objects.put(&path, &body).await?;
    tracing::info!(object = %stored, bytes = body.len(), "object stored");
    Ok(StatusCode::OK)
}

pub async fn download(State(state): State<AppState>, Path(path): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.objects.get(&path).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
