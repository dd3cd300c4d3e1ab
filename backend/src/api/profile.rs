use crate::dto::{
    optional, privacy_level, required, AuditLogQuery, DashboardResponse, LoginRequest,
    PrivacyLevelRequest, ProfileUpdateRequest, SettingsRequest, SettingsResponse,
};
use crate::errors::ApiError;
use crate::models::{AuditAction, AuditLog, NewUser, PrivacyLevel, User, UserPatch};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};

const DASHBOARD_AUDIT_LOGS: usize = 5;
const DEFAULT_AUDIT_LOGS: usize = 20;
const MAX_AUDIT_LOGS: usize = 200;
const MIN_FULL_NAME: usize = 2;

/// Wallet login. The first login creates the account; later ones mark the wallet connected.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<User>, ApiError> {
    let wallet = required("walletAddress", &req.wallet_address)?;
    let user_id = state.user_id();

    if state.storage.get_user(user_id).await?.is_some() {
        let user = state
            .storage
            .update_user(user_id, UserPatch { wallet_connected: Some(true), ..Default::default() })
            .await?;
        state
            .audit(
                user_id,
                AuditAction::WalletLogin,
                "Wallet connected".to_string(),
                Some(short_wallet(&wallet)),
                Some(PrivacyLevel::ACCOUNT_ACTIVITY),
            )
            .await?;
        tracing::info!(%user_id, "wallet login");
        return Ok(Json(user));
    }

    let username = optional(req.username).unwrap_or_else(|| format!("user_{}", short_wallet(&wallet)));
    let user = state
        .storage
        .create_user_with_id(
            user_id,
            NewUser {
                email: optional(req.email).unwrap_or_else(|| format!("{username}@idshield.local")),
                username,
                full_name: optional(req.full_name).unwrap_or_else(|| "IDShield User".to_string()),
                phone: None,
                location: None,
                bio: None,
                profile_picture: None,
                did_address: format!("did:midnight:{wallet}"),
                wallet_connected: true,
                user_type: req.user_type.unwrap_or_default(),
                privacy_level: PrivacyLevel::DEFAULT_USER,
            },
        )
        .await?;
    state
        .audit(
            user_id,
            AuditAction::AccountCreated,
            "Account created with wallet login".to_string(),
            Some(short_wallet(&wallet)),
            Some(PrivacyLevel::ACCOUNT_ACTIVITY),
        )
        .await?;
    tracing::info!(%user_id, "account created");
    Ok(Json(user))
}

fn short_wallet(wallet: &str) -> String {
    wallet.chars().take(8).collect()
}

pub async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, ApiError> {
    let user_id = state.user_id();
    let Some(user) = state.storage.get_user(user_id).await? else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    Ok(Json(DashboardResponse {
        user,
        vault_items: state.storage.get_vault_items(user_id).await?,
        access_requests: state.storage.get_access_requests(user_id).await?,
        audit_logs: state.storage.get_audit_logs(user_id, DASHBOARD_AUDIT_LOGS).await?,
        zk_proofs: state.storage.get_zk_proofs(user_id).await?,
    }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<User>, ApiError> {
    let full_name = req.full_name.trim().to_string();
    if full_name.chars().count() < MIN_FULL_NAME {
        return Err(ApiError::BadRequest(format!(
            "Full name must be at least {MIN_FULL_NAME} characters"
        )));
    }

    let user_id = state.user_id();
    let email = optional(req.email);
    if let Some(email) = &email {
        if !email.contains('@') {
            return Err(ApiError::BadRequest("Invalid email address".to_string()));
        }
        if let Some(other) = state.storage.get_user_by_email(email).await? {
            if other.id != user_id {
                return Err(ApiError::Conflict("Email is already in use".to_string()));
            }
        }
    }

    let patch = UserPatch {
        full_name: Some(full_name.clone()),
        email,
        phone: Some(optional(req.phone)),
        location: Some(optional(req.location)),
        bio: Some(optional(req.bio)),
        user_type: req.user_type,
        ..Default::default()
    };
    let user = state.storage.update_user(user_id, patch).await?;
    state
        .audit(
            user_id,
            AuditAction::ProfileUpdated,
            "Profile information updated".to_string(),
            Some(full_name),
            Some(PrivacyLevel::ACCOUNT_ACTIVITY),
        )
        .await?;
    tracing::info!(%user_id, "profile updated");
    Ok(Json(user))
}

pub async fn update_privacy_level(
    State(state): State<AppState>,
    Json(req): Json<PrivacyLevelRequest>,
) -> Result<Json<User>, ApiError> {
    let level = privacy_level(req.privacy_level)?;
    let user_id = state.user_id();

    let user = state
        .storage
        .update_user(user_id, UserPatch { privacy_level: Some(level), ..Default::default() })
        .await?;
    state
        .audit(
            user_id,
            AuditAction::PrivacyLevelUpdated,
            format!("Privacy level changed to {}", level.value()),
            None,
            Some(level),
        )
        .await?;
    tracing::info!(%user_id, level = level.value(), "privacy level updated");
    Ok(Json(user))
}

/// Merge preferences and optionally the privacy level. Writes a single audit entry.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let level = req.privacy_level.map(privacy_level).transpose()?;
    let user_id = state.user_id();
    let user = state
        .storage
        .update_user(
            user_id,
            UserPatch {
                settings: Some(req.settings_patch()),
                privacy_level: level,
                ..Default::default()
            },
        )
        .await?;

    let description = match level {
        Some(level) => format!("Account settings updated (privacy level {})", level.value()),
        None => "Account settings updated".to_string(),
    };
    state
        .audit(
            user_id,
            AuditAction::SettingsUpdated,
            description,
            None,
            Some(level.unwrap_or(PrivacyLevel::ACCOUNT_ACTIVITY)),
        )
        .await?;
    tracing::info!(%user_id, "settings updated");

    Ok(Json(SettingsResponse {
        success: true,
        message: "Settings updated successfully".to_string(),
        settings: user.settings,
        privacy_level: user.privacy_level,
    }))
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLog>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_AUDIT_LOGS).min(MAX_AUDIT_LOGS);
    Ok(Json(state.storage.get_audit_logs(state.user_id(), limit).await?))
}
