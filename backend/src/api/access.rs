use crate::dto::{privacy_level, required, AccessRequestBody};
use crate::errors::ApiError;
use crate::models::{AccessRequest, AccessStatus, NewAccessRequest};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

pub async fn list_requests(State(state): State<AppState>) -> Result<Json<Vec<AccessRequest>>, ApiError> {
    Ok(Json(state.storage.get_access_requests(state.user_id()).await?))
}

/// A third party asks for access. The request starts pending.
pub async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<AccessRequestBody>,
) -> Result<(StatusCode, Json<AccessRequest>), ApiError> {
    let new = validate(&state, body, AccessStatus::Pending)?;
    let request = state.storage.create_access_request(new).await?;

    state.storage.create_audit_log(request.status_audit()).await?;
    tracing::info!(request_id = %request.id, requester = %request.requester_name, "access requested");
    Ok((StatusCode::CREATED, Json(request)))
}

/// The owner shares data directly; the request is created already approved.
pub async fn grant(
    State(state): State<AppState>,
    Json(body): Json<AccessRequestBody>,
) -> Result<(StatusCode, Json<AccessRequest>), ApiError> {
    let mut new = validate(&state, body, AccessStatus::Approved)?;
    new.user_id = state.user_id().to_string();
    let request = state.storage.create_access_request(new).await?;

    state.storage.create_audit_log(request.status_audit()).await?;
    tracing::info!(request_id = %request.id, requester = %request.requester_name, "access granted directly");
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn approve(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<AccessRequest>, ApiError> {
    transition(&state, &id, AccessStatus::Approved).await
}

pub async fn deny(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<AccessRequest>, ApiError> {
    transition(&state, &id, AccessStatus::Denied).await
}

pub async fn revoke(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<AccessRequest>, ApiError> {
    transition(&state, &id, AccessStatus::Revoked).await
}

async fn transition(state: &AppState, id: &str, next: AccessStatus) -> Result<Json<AccessRequest>, ApiError> {
    let user_id = state.user_id();
    match state.storage.get_access_request(id).await? {
        Some(request) if request.user_id == user_id => {}
        _ => return Err(ApiError::NotFound("Access request not found".to_string())),
    }

    let (request, _) = state.storage.respond_to_access_request(id, next).await.map_err(|e| {
        tracing::warn!(request_id = %id, to = next.as_str(), error = %e, "access transition rejected");
        ApiError::from(e)
    })?;
    tracing::info!(request_id = %request.id, status = request.status.as_str(), "access request updated");
    Ok(Json(request))
}

fn validate(state: &AppState, body: AccessRequestBody, status: AccessStatus) -> Result<NewAccessRequest, ApiError> {
    let requester_email = required("requesterEmail", &body.requester_email)?;
    if !requester_email.contains('@') {
        return Err(ApiError::BadRequest("Invalid requester email".to_string()));
    }

    Ok(NewAccessRequest {
        user_id: body.user_id.unwrap_or_else(|| state.user_id().to_string()),
        requester_name: required("requesterName", &body.requester_name)?,
        requester_email,
        data_requested: required("dataRequested", &body.data_requested)?,
        purpose: required("purpose", &body.purpose)?,
        status,
        privacy_level: privacy_level(body.privacy_level)?,
    })
}
