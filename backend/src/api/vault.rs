use crate::dto::{privacy_level, required, VaultItemRequest, VaultItemsQuery};
use crate::errors::ApiError;
use crate::models::{AuditAction, NewVaultItem, VaultItem, VaultItemData};
use crate::objects::URL_PREFIX;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

pub async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<VaultItemsQuery>,
) -> Result<Json<Vec<VaultItem>>, ApiError> {
    let user_id = state.user_id();
    let items = match params.category {
        Some(category) => state.storage.get_vault_items_by_category(user_id, category).await?,
        None => state.storage.get_vault_items(user_id).await?,
    };
    Ok(Json(items))
}

/// Record an uploaded document. Medical appointment items are only written by doctors through
/// a medical form link.
pub async fn create_item(
    State(state): State<AppState>,
    Json(req): Json<VaultItemRequest>,
) -> Result<(StatusCode, Json<VaultItem>), ApiError> {
    let name = required("name", &req.name)?;
    let level = privacy_level(req.privacy_level)?;

    let data = req.data.unwrap_or_default();
    match &data {
        VaultItemData::Document { object_path: Some(path), .. } if !path.starts_with(URL_PREFIX) => {
            return Err(ApiError::BadRequest(format!("objectPath must start with {URL_PREFIX}")));
        }
        VaultItemData::MedicalAppointment { .. } => {
            return Err(ApiError::BadRequest(
                "Medical appointments can only be added through a medical form".to_string(),
            ));
        }
        VaultItemData::Document { .. } => {}
    }

    let user_id = state.user_id();
    let item = state
        .storage
        .create_vault_item(NewVaultItem {
            user_id: user_id.to_string(),
            category: req.category,
            name,
            privacy_level: level,
            data,
        })
        .await?;
    state
        .audit(
            user_id,
            AuditAction::DocumentAdded,
            format!("Document added to {} vault", item.category.as_str()),
            Some(item.name.clone()),
            Some(level),
        )
        .await?;
    tracing::info!(%user_id, item_id = %item.id, category = item.category.as_str(), "vault item added");
    Ok((StatusCode::CREATED, Json(item)))
}
