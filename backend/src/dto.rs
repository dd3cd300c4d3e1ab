//! Request and response bodies of the HTTP API.

use crate::errors::ApiError;
use crate::models::{
    AccessRequest, AuditLog, MedicalFormData, MedicalFormToken, PrivacyLevel, SettingsPatch, User,
    UserSettings, UserType, VaultCategory, VaultItem, VaultItemData, ZkProof,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zk_claims::ProofAttributes;

/// Trimmed value of a required text field.
pub fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(v.to_string())
}

/// Trimmed value of an optional text field; blank counts as absent.
pub fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn privacy_level(value: i64) -> Result<PrivacyLevel, ApiError> {
    PrivacyLevel::try_from(value).map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub wallet_address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub user: User,
    pub vault_items: Vec<VaultItem>,
    pub access_requests: Vec<AccessRequest>,
    pub audit_logs: Vec<AuditLog>,
    pub zk_proofs: Vec<ZkProof>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyLevelRequest {
    pub privacy_level: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsRequest {
    pub email_notifications: Option<bool>,
    pub push_notifications: Option<bool>,
    pub security_alerts: Option<bool>,
    pub two_factor_auth: Option<bool>,
    pub data_retention: Option<String>,
    pub auto_logout: Option<u32>,
    pub privacy_level: Option<i64>,
}

impl SettingsRequest {
    /// The provided settings fields. Storage merges them into the stored settings.
    pub fn settings_patch(&self) -> SettingsPatch {
        SettingsPatch {
            email_notifications: self.email_notifications,
            push_notifications: self.push_notifications,
            security_alerts: self.security_alerts,
            two_factor_auth: self.two_factor_auth,
            data_retention: self.data_retention.clone(),
            auto_logout: self.auto_logout,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub success: bool,
    pub message: String,
    pub settings: UserSettings,
    pub privacy_level: PrivacyLevel,
}

#[derive(Debug, Deserialize)]
pub struct VaultItemsQuery {
    pub category: Option<VaultCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItemRequest {
    pub category: VaultCategory,
    pub name: String,
    pub privacy_level: i64,
    #[serde(default)]
    pub data: Option<VaultItemData>,
}

/// Body shared by requester-initiated requests and owner-granted access.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestBody {
    #[serde(default)]
    pub user_id: Option<String>,
    pub requester_name: String,
    pub requester_email: String,
    pub data_requested: String,
    pub purpose: String,
    pub privacy_level: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofRequest {
    pub proof_type: String,
    #[serde(default)]
    pub attributes: ProofAttributes,
    #[serde(default)]
    pub proof_result: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedProof {
    pub id: String,
    pub proof_type: String,
    pub proof_result: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attributes: ProofAttributes,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyProofResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<VerifiedProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyProofResponse {
    pub fn invalid(reason: &str) -> Self {
        Self { valid: false, proof: None, error: Some(reason.to_string()) }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalFormTokenRequest {
    /// Opaque link token; generated server-side when omitted.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub patient_name: String,
    pub appointment_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_in_hours: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalFormTokenCreated {
    pub success: bool,
    pub token: String,
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteFormRequest {
    #[serde(default)]
    pub doctor_name: String,
    #[serde(default)]
    pub doctor_wallet_address: Option<String>,
    #[serde(default)]
    pub form_data: MedicalFormData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteFormResponse {
    pub success: bool,
    pub vault_item: VaultItem,
    pub token: MedicalFormToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_request_sends_only_provided_fields() {
        let req = SettingsRequest { push_notifications: Some(true), privacy_level: Some(2), ..Default::default() };
        assert_eq!(
            req.settings_patch(),
            SettingsPatch { push_notifications: Some(true), ..Default::default() }
        );

        let mut settings = UserSettings { auto_logout: Some(30), ..Default::default() };
        req.settings_patch().apply(&mut settings);
        assert!(settings.push_notifications);
        assert!(settings.email_notifications);
        assert_eq!(settings.auto_logout, Some(30));
    }

    #[test]
    fn text_helpers() {
        assert_eq!(required("name", "  Ann ").unwrap(), "Ann");
        assert!(required("name", "   ").is_err());
        assert_eq!(optional(Some("  ".into())), None);
        assert_eq!(optional(Some(" x ".into())), Some("x".into()));
        assert!(privacy_level(7).is_err());
    }
}
