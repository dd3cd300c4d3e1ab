//! Doctor-facing medical form links.
//!
//! The vault owner mints a single-use token for a patient appointment. Whoever holds the link can
//! read the appointment header and submit one clinical record before the token expires. The
//! record lands in the owner's health vault at the most restrictive privacy level.

use crate::dto::{
    optional, required, CompleteFormRequest, CompleteFormResponse, MedicalFormTokenCreated,
    MedicalFormTokenRequest,
};
use crate::errors::ApiError;
use crate::models::{
    AuditAction, MedicalFormToken, NewMedicalFormToken, PrivacyLevel, TokenCompletion, TokenState,
};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use rand::RngCore;

const DEFAULT_EXPIRY_HOURS: u32 = 24;
const MAX_EXPIRY_HOURS: u32 = 24 * 30;
const MAX_TOKEN_LEN: usize = 128;

const FORM_NOT_FOUND: &str = "Form not found";
const FORM_USED: &str = "Form has already been completed";
const FORM_EXPIRED: &str = "Form has expired";

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn check_token(raw: &str) -> Result<String, ApiError> {
    let token = raw.trim();
    let valid = !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::BadRequest("Invalid form token".to_string()));
    }
    Ok(token.to_string())
}

/// An explicit `expiresAt` wins, even if already past; otherwise `expiresInHours` from now.
pub async fn create_token(
    State(state): State<AppState>,
    Json(req): Json<MedicalFormTokenRequest>,
) -> Result<(StatusCode, Json<MedicalFormTokenCreated>), ApiError> {
    let patient_name = required("patientName", &req.patient_name)?;
    let appointment_type = required("appointmentType", &req.appointment_type)?;
    let token = match optional(req.token) {
        Some(raw) => check_token(&raw)?,
        None => generate_token(),
    };

    let expires_at = match (req.expires_at, req.expires_in_hours) {
        (Some(at), _) => at,
        (None, hours) => {
            let hours = hours.unwrap_or(DEFAULT_EXPIRY_HOURS);
            if hours == 0 || hours > MAX_EXPIRY_HOURS {
                return Err(ApiError::BadRequest(format!(
                    "expiresInHours must be between 1 and {MAX_EXPIRY_HOURS}"
                )));
            }
            Utc::now() + Duration::hours(i64::from(hours))
        }
    };

    let user_id = optional(req.user_id).unwrap_or_else(|| state.user_id().to_string());
    let created = state
        .storage
        .create_medical_form_token(NewMedicalFormToken {
            token,
            user_id,
            patient_name,
            appointment_type,
            expires_at,
        })
        .await?;

    state
        .audit(
            &created.user_id,
            AuditAction::MedicalFormCreated,
            format!("Medical form link created for {}", created.appointment_type),
            Some(created.patient_name.clone()),
            Some(PrivacyLevel::MOST_RESTRICTIVE),
        )
        .await?;
    tracing::info!(token_id = %created.id, user_id = %created.user_id, %expires_at, "medical form token created");

    Ok((
        StatusCode::CREATED,
        Json(MedicalFormTokenCreated {
            success: true,
            token: created.token,
            id: created.id,
            expires_at: created.expires_at,
        }),
    ))
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<MedicalFormToken>>, ApiError> {
    Ok(Json(state.storage.get_medical_form_tokens(&user_id).await?))
}

async fn load_open(state: &AppState, token: &str) -> Result<MedicalFormToken, ApiError> {
    let Some(form) = state.storage.get_medical_form_token_by_token(token).await? else {
        return Err(ApiError::NotFound(FORM_NOT_FOUND.to_string()));
    };
    match form.state(Utc::now()) {
        TokenState::Open => Ok(form),
        TokenState::Used => Err(ApiError::Gone(FORM_USED.to_string())),
        TokenState::Expired => Err(ApiError::Gone(FORM_EXPIRED.to_string())),
    }
}

pub async fn get_form(State(state): State<AppState>, Path(token): Path<String>) -> Result<Json<MedicalFormToken>, ApiError> {
    Ok(Json(load_open(&state, &token).await?))
}

/// Complete the form once. Storage re-checks the guards and writes the token, the health record
/// and the audit entry in one step, so of two racing submissions exactly one lands.
pub async fn complete_form(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<CompleteFormRequest>,
) -> Result<Json<CompleteFormResponse>, ApiError> {
    let form = load_open(&state, &token).await?;
    let doctor_name = required("doctorName", &req.doctor_name)?;

    let done = state
        .storage
        .complete_medical_form(
            &form.id,
            TokenCompletion {
                doctor_name,
                doctor_wallet_address: optional(req.doctor_wallet_address),
                form_data: req.form_data,
            },
            Utc::now(),
        )
        .await
        .map_err(|e| {
            tracing::warn!(token_id = %form.id, error = %e, "medical form completion rejected");
            ApiError::from(e)
        })?;
    tracing::info!(token_id = %done.token.id, item_id = %done.vault_item.id, "medical form completed");

    Ok(Json(CompleteFormResponse {
        success: true,
        vault_item: done.vault_item,
        token: done.token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_valid_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(check_token(&a).unwrap(), a);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(check_token("has space").is_err());
        assert!(check_token("../x").is_err());
        assert!(check_token(&"a".repeat(MAX_TOKEN_LEN + 1)).is_err());
        assert!(check_token("abc-123_XYZ").is_ok());
    }
}
