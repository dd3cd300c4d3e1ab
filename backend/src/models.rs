use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zk_claims::ProofAttributes;

/// Identifier of any stored record.
///
/// Generated ids are UUIDv4 strings; the demo user carries a fixed, configured id.
pub type RecordId = String;

pub fn new_id() -> RecordId {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("privacy level must be between 0 and {max}, got {0}", max = PrivacyLevel::MAX)]
pub struct InvalidPrivacyLevel(pub i64);

/// How sensitive or shareable a record or claim is.
///
/// 0 is the most restrictive level, 6 the most open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct PrivacyLevel(u8);

impl PrivacyLevel {
    pub const MAX: u8 = 6;
    pub const MOST_RESTRICTIVE: PrivacyLevel = PrivacyLevel(0);
    pub const DEFAULT_USER: PrivacyLevel = PrivacyLevel(4);
    /// Level stamped on audit entries for account and settings changes.
    pub const ACCOUNT_ACTIVITY: PrivacyLevel = PrivacyLevel(1);

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Like `try_from`, but saturates at [`PrivacyLevel::MAX`].
    pub const fn saturating(v: u8) -> PrivacyLevel {
        if v > Self::MAX { PrivacyLevel(Self::MAX) } else { PrivacyLevel(v) }
    }
}

impl TryFrom<i64> for PrivacyLevel {
    type Error = InvalidPrivacyLevel;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        if (0..=i64::from(Self::MAX)).contains(&v) {
            Ok(PrivacyLevel(v as u8))
        } else {
            Err(InvalidPrivacyLevel(v))
        }
    }
}

impl TryFrom<u8> for PrivacyLevel {
    type Error = InvalidPrivacyLevel;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::try_from(i64::from(v))
    }
}

impl From<PrivacyLevel> for u8 {
    fn from(level: PrivacyLevel) -> u8 {
        level.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Citizen,
    Police,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Citizen => "citizen",
            UserType::Police => "police",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "citizen" => Some(UserType::Citizen),
            "police" => Some(UserType::Police),
            _ => None,
        }
    }
}

/// Notification, privacy and security preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub security_alerts: bool,
    pub two_factor_auth: bool,
    pub data_retention: Option<String>,
    /// Idle minutes before the dashboard logs out.
    pub auto_logout: Option<u32>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            push_notifications: false,
            security_alerts: true,
            two_factor_auth: false,
            data_retention: None,
            auto_logout: None,
        }
    }
}

/// Settings fields to overwrite; `None` keeps the stored value. Applied by storage against the
/// current row, so concurrent patches touching different fields all survive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub email_notifications: Option<bool>,
    pub push_notifications: Option<bool>,
    pub security_alerts: Option<bool>,
    pub two_factor_auth: Option<bool>,
    pub data_retention: Option<String>,
    pub auto_logout: Option<u32>,
}

impl SettingsPatch {
    pub fn apply(self, settings: &mut UserSettings) {
        if let Some(v) = self.email_notifications {
            settings.email_notifications = v;
        }
        if let Some(v) = self.push_notifications {
            settings.push_notifications = v;
        }
        if let Some(v) = self.security_alerts {
            settings.security_alerts = v;
        }
        if let Some(v) = self.two_factor_auth {
            settings.two_factor_auth = v;
        }
        if let Some(v) = self.data_retention {
            settings.data_retention = Some(v);
        }
        if let Some(v) = self.auto_logout {
            settings.auto_logout = Some(v);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: RecordId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub did_address: String,
    pub wallet_connected: bool,
    pub user_type: UserType,
    pub privacy_level: PrivacyLevel,
    pub settings: UserSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub did_address: String,
    pub wallet_connected: bool,
    pub user_type: UserType,
    pub privacy_level: PrivacyLevel,
}

impl NewUser {
    pub fn into_user(self, id: RecordId, now: DateTime<Utc>) -> User {
        User {
            id,
            username: self.username,
            email: self.email,
            full_name: self.full_name,
            phone: self.phone,
            location: self.location,
            bio: self.bio,
            profile_picture: self.profile_picture,
            did_address: self.did_address,
            wallet_connected: self.wallet_connected,
            user_type: self.user_type,
            privacy_level: self.privacy_level,
            settings: UserSettings::default(),
            created_at: now,
            updated_at: None,
        }
    }
}

/// Partial update of a user. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears it.
#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub wallet_connected: Option<bool>,
    pub user_type: Option<UserType>,
    pub privacy_level: Option<PrivacyLevel>,
    pub settings: Option<SettingsPatch>,
}

impl UserPatch {
    pub fn apply(self, user: &mut User, now: DateTime<Utc>) {
        if let Some(v) = self.full_name {
            user.full_name = v;
        }
        if let Some(v) = self.email {
            user.email = v;
        }
        if let Some(v) = self.phone {
            user.phone = v;
        }
        if let Some(v) = self.location {
            user.location = v;
        }
        if let Some(v) = self.bio {
            user.bio = v;
        }
        if let Some(v) = self.wallet_connected {
            user.wallet_connected = v;
        }
        if let Some(v) = self.user_type {
            user.user_type = v;
        }
        if let Some(v) = self.privacy_level {
            user.privacy_level = v;
        }
        if let Some(v) = self.settings {
            v.apply(&mut user.settings);
        }
        user.updated_at = Some(now);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultCategory {
    Health,
    Insurance,
    Ids,
}

impl VaultCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultCategory::Health => "health",
            VaultCategory::Insurance => "insurance",
            VaultCategory::Ids => "ids",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "health" => Some(VaultCategory::Health),
            "insurance" => Some(VaultCategory::Insurance),
            "ids" => Some(VaultCategory::Ids),
            _ => None,
        }
    }
}

/// Clinical notes a doctor submits through a medical form link.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MedicalFormData {
    pub diagnosis: String,
    pub symptoms: String,
    pub treatment: String,
    pub medications: String,
    pub follow_up_required: String,
    pub notes: String,
    pub vital_signs: VitalSigns,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VitalSigns {
    pub blood_pressure: String,
    pub heart_rate: String,
    pub temperature: String,
    pub weight: String,
}

/// Payload of a vault item, tagged by where it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum VaultItemData {
    /// A document the owner uploaded.
    Document {
        #[serde(default)]
        object_path: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        mime_type: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    /// Written by a doctor through a medical form token.
    MedicalAppointment {
        appointment_type: String,
        doctor_name: String,
        #[serde(default)]
        doctor_wallet_address: Option<String>,
        completed_at: DateTime<Utc>,
        form_data: MedicalFormData,
    },
}

impl Default for VaultItemData {
    fn default() -> Self {
        VaultItemData::Document {
            object_path: None,
            file_name: None,
            mime_type: None,
            description: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    pub id: RecordId,
    pub user_id: RecordId,
    pub category: VaultCategory,
    pub name: String,
    pub privacy_level: PrivacyLevel,
    pub data: VaultItemData,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewVaultItem {
    pub user_id: RecordId,
    pub category: VaultCategory,
    pub name: String,
    pub privacy_level: PrivacyLevel,
    pub data: VaultItemData,
}

impl NewVaultItem {
    pub fn into_item(self, id: RecordId, now: DateTime<Utc>) -> VaultItem {
        VaultItem {
            id,
            user_id: self.user_id,
            category: self.category,
            name: self.name,
            privacy_level: self.privacy_level,
            data: self.data,
            created_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Pending,
    Approved,
    Denied,
    Revoked,
}

impl AccessStatus {
    /// Allowed edges: pending -> approved, pending -> denied, approved -> revoked.
    pub fn can_transition_to(self, next: AccessStatus) -> bool {
        matches!(
            (self, next),
            (AccessStatus::Pending, AccessStatus::Approved)
                | (AccessStatus::Pending, AccessStatus::Denied)
                | (AccessStatus::Approved, AccessStatus::Revoked)
        )
    }

    /// The only status `next` can be reached from.
    pub fn predecessor(next: AccessStatus) -> Option<AccessStatus> {
        match next {
            AccessStatus::Approved | AccessStatus::Denied => Some(AccessStatus::Pending),
            AccessStatus::Revoked => Some(AccessStatus::Approved),
            AccessStatus::Pending => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Pending => "pending",
            AccessStatus::Approved => "approved",
            AccessStatus::Denied => "denied",
            AccessStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AccessStatus::Pending),
            "approved" => Some(AccessStatus::Approved),
            "denied" => Some(AccessStatus::Denied),
            "revoked" => Some(AccessStatus::Revoked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: RecordId,
    pub user_id: RecordId,
    pub requester_name: String,
    pub requester_email: String,
    pub data_requested: String,
    pub purpose: String,
    pub status: AccessStatus,
    pub privacy_level: PrivacyLevel,
    pub request_date: DateTime<Utc>,
    pub response_date: Option<DateTime<Utc>>,
}

impl AccessRequest {
    /// The audit entry recording how the request reached its current status.
    pub fn status_audit(&self) -> NewAuditLog {
        let (action, description) = match self.status {
            AccessStatus::Pending => (AuditAction::AccessRequested, format!("Access requested by {}", self.requester_name)),
            AccessStatus::Approved => (AuditAction::AccessGranted, format!("Access granted to {}", self.requester_name)),
            AccessStatus::Denied => (AuditAction::AccessDenied, format!("Access denied to {}", self.requester_name)),
            AccessStatus::Revoked => (AuditAction::AccessRevoked, format!("Access revoked from {}", self.requester_name)),
        };
        NewAuditLog {
            user_id: self.user_id.clone(),
            action,
            description,
            entity_name: Some(self.requester_name.clone()),
            privacy_level: Some(self.privacy_level),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewAccessRequest {
    pub user_id: RecordId,
    pub requester_name: String,
    pub requester_email: String,
    pub data_requested: String,
    pub purpose: String,
    pub status: AccessStatus,
    pub privacy_level: PrivacyLevel,
}

impl NewAccessRequest {
    /// A request created in a resolved state counts as answered at creation time.
    pub fn into_request(self, id: RecordId, now: DateTime<Utc>) -> AccessRequest {
        let response_date = (self.status != AccessStatus::Pending).then_some(now);
        AccessRequest {
            id,
            user_id: self.user_id,
            requester_name: self.requester_name,
            requester_email: self.requester_email,
            data_requested: self.data_requested,
            purpose: self.purpose,
            status: self.status,
            privacy_level: self.privacy_level,
            request_date: now,
            response_date,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AccountCreated,
    WalletLogin,
    ProfileUpdated,
    PrivacyLevelUpdated,
    SettingsUpdated,
    DocumentAdded,
    AccessRequested,
    AccessGranted,
    AccessDenied,
    AccessRevoked,
    ZkProofGenerated,
    MedicalFormCreated,
    MedicalFormCompleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccountCreated => "account_created",
            AuditAction::WalletLogin => "wallet_login",
            AuditAction::ProfileUpdated => "profile_updated",
            AuditAction::PrivacyLevelUpdated => "privacy_level_updated",
            AuditAction::SettingsUpdated => "settings_updated",
            AuditAction::DocumentAdded => "document_added",
            AuditAction::AccessRequested => "access_requested",
            AuditAction::AccessGranted => "access_granted",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::AccessRevoked => "access_revoked",
            AuditAction::ZkProofGenerated => "zk_proof_generated",
            AuditAction::MedicalFormCreated => "medical_form_created",
            AuditAction::MedicalFormCompleted => "medical_form_completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [AuditAction; 13] = [
            AuditAction::AccountCreated,
            AuditAction::WalletLogin,
            AuditAction::ProfileUpdated,
            AuditAction::PrivacyLevelUpdated,
            AuditAction::SettingsUpdated,
            AuditAction::DocumentAdded,
            AuditAction::AccessRequested,
            AuditAction::AccessGranted,
            AuditAction::AccessDenied,
            AuditAction::AccessRevoked,
            AuditAction::ZkProofGenerated,
            AuditAction::MedicalFormCreated,
            AuditAction::MedicalFormCompleted,
        ];
        ALL.into_iter().find(|a| a.as_str() == s)
    }
}

/// One entry of the append-only activity trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: RecordId,
    pub user_id: RecordId,
    pub action: AuditAction,
    pub description: String,
    pub entity_name: Option<String>,
    pub privacy_level: Option<PrivacyLevel>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAuditLog {
    pub user_id: RecordId,
    pub action: AuditAction,
    pub description: String,
    pub entity_name: Option<String>,
    pub privacy_level: Option<PrivacyLevel>,
}

impl NewAuditLog {
    pub fn into_log(self, id: RecordId, now: DateTime<Utc>) -> AuditLog {
        AuditLog {
            id,
            user_id: self.user_id,
            action: self.action,
            description: self.description,
            entity_name: self.entity_name,
            privacy_level: self.privacy_level,
            timestamp: now,
        }
    }
}

/// A stored claim. `proof_result` is the claim text; there is no cryptographic artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkProof {
    pub id: RecordId,
    pub user_id: RecordId,
    pub proof_type: String,
    pub attributes: ProofAttributes,
    pub proof_result: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewZkProof {
    pub user_id: RecordId,
    pub proof_type: String,
    pub attributes: ProofAttributes,
    pub proof_result: String,
}

impl NewZkProof {
    pub fn into_proof(self, id: RecordId, now: DateTime<Utc>) -> ZkProof {
        ZkProof {
            id,
            user_id: self.user_id,
            proof_type: self.proof_type,
            attributes: self.attributes,
            proof_result: self.proof_result,
            created_at: now,
        }
    }
}

/// Single-use, time-limited capability letting a doctor write one record into a user's vault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalFormToken {
    pub id: RecordId,
    pub token: String,
    pub user_id: RecordId,
    pub patient_name: String,
    pub appointment_type: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub doctor_wallet_address: Option<String>,
    pub doctor_name: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub form_data: Option<MedicalFormData>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    Open,
    Used,
    Expired,
}

impl MedicalFormToken {
    /// A token is completable only while unused and strictly before `expires_at`.
    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        if self.is_used {
            TokenState::Used
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Open
        }
    }

    /// The health vault entry a completed form produces, at the most restrictive level.
    pub fn health_record(&self, completed_at: DateTime<Utc>) -> NewVaultItem {
        let doctor_name = self.doctor_name.clone().unwrap_or_default();
        NewVaultItem {
            user_id: self.user_id.clone(),
            category: VaultCategory::Health,
            name: format!("{} - {}", self.appointment_type, doctor_name),
            privacy_level: PrivacyLevel::MOST_RESTRICTIVE,
            data: VaultItemData::MedicalAppointment {
                appointment_type: self.appointment_type.clone(),
                doctor_name,
                doctor_wallet_address: self.doctor_wallet_address.clone(),
                completed_at: self.completed_at.unwrap_or(completed_at),
                form_data: self.form_data.clone().unwrap_or_default(),
            },
        }
    }

    pub fn completion_audit(&self) -> NewAuditLog {
        NewAuditLog {
            user_id: self.user_id.clone(),
            action: AuditAction::MedicalFormCompleted,
            description: format!(
                "Medical form completed by {}",
                self.doctor_name.as_deref().unwrap_or_default()
            ),
            entity_name: Some(self.patient_name.clone()),
            privacy_level: Some(PrivacyLevel::MOST_RESTRICTIVE),
        }
    }
}

/// Everything a single form completion writes.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedForm {
    pub token: MedicalFormToken,
    pub vault_item: VaultItem,
    pub audit_log: AuditLog,
}

#[derive(Clone, Debug)]
pub struct NewMedicalFormToken {
    pub token: String,
    pub user_id: RecordId,
    pub patient_name: String,
    pub appointment_type: String,
    pub expires_at: DateTime<Utc>,
}

impl NewMedicalFormToken {
    pub fn into_token(self, id: RecordId, now: DateTime<Utc>) -> MedicalFormToken {
        MedicalFormToken {
            id,
            token: self.token,
            user_id: self.user_id,
            patient_name: self.patient_name,
            appointment_type: self.appointment_type,
            expires_at: self.expires_at,
            is_used: false,
            doctor_wallet_address: None,
            doctor_name: None,
            completed_at: None,
            form_data: None,
            created_at: now,
        }
    }
}

/// What a doctor attaches when completing a medical form token.
#[derive(Clone, Debug)]
pub struct TokenCompletion {
    pub doctor_name: String,
    pub doctor_wallet_address: Option<String>,
    pub form_data: MedicalFormData,
}

impl TokenCompletion {
    pub fn apply(self, token: &mut MedicalFormToken, now: DateTime<Utc>) {
        token.is_used = true;
        token.completed_at = Some(now);
        token.doctor_name = Some(self.doctor_name);
        token.doctor_wallet_address = self.doctor_wallet_address;
        token.form_data = Some(self.form_data);
    }
}
