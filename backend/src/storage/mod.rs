//! Repository over the six record kinds of the vault.
//!
//! Every create assigns a fresh id and timestamp and returns the stored record. Updates fail
//! with [`StorageError::NotFound`] when the target is absent. Reads return empty collections or
//! `None` instead of erroring. Foreign keys are not checked.

mod memory;
mod sqlite;

pub use memory::MemStorage;
pub use sqlite::SqliteStorage;

use crate::models::{
    AccessRequest, AccessStatus, AuditLog, CompletedForm, MedicalFormToken, NewAccessRequest,
    NewAuditLog, NewMedicalFormToken, NewUser, NewVaultItem, NewZkProof, TokenCompletion, User,
    UserPatch, VaultCategory, VaultItem, ZkProof,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot move access request from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("medical form has already been completed")]
    AlreadyUsed,

    #[error("medical form has expired")]
    Expired,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        StorageError::NotFound { kind, id: id.to_string() }
    }

    pub(crate) fn invalid_transition(from: AccessStatus, to: AccessStatus) -> Self {
        StorageError::InvalidTransition { from: from.as_str(), to: to.as_str() }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    // Users
    async fn get_user(&self, id: &str) -> StorageResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> StorageResult<User>;
    async fn create_user_with_id(&self, id: &str, user: NewUser) -> StorageResult<User>;
    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User>;

    // Vault items
    async fn get_vault_items(&self, user_id: &str) -> StorageResult<Vec<VaultItem>>;
    async fn get_vault_items_by_category(
        &self,
        user_id: &str,
        category: VaultCategory,
    ) -> StorageResult<Vec<VaultItem>>;
    async fn create_vault_item(&self, item: NewVaultItem) -> StorageResult<VaultItem>;

    // Access requests
    async fn get_access_requests(&self, user_id: &str) -> StorageResult<Vec<AccessRequest>>;
    async fn get_access_request(&self, id: &str) -> StorageResult<Option<AccessRequest>>;
    async fn create_access_request(&self, request: NewAccessRequest) -> StorageResult<AccessRequest>;

    /// Move a request along one allowed edge and stamp its response date.
    ///
    /// The check and the write happen atomically.
    async fn update_access_request_status(
        &self,
        id: &str,
        status: AccessStatus,
    ) -> StorageResult<AccessRequest>;

    /// [`Storage::update_access_request_status`] plus the request's
    /// [`AccessRequest::status_audit`] entry, written together or not at all.
    async fn respond_to_access_request(
        &self,
        id: &str,
        status: AccessStatus,
    ) -> StorageResult<(AccessRequest, AuditLog)>;

    // Audit logs
    async fn get_audit_logs(&self, user_id: &str, limit: usize) -> StorageResult<Vec<AuditLog>>;
    async fn create_audit_log(&self, log: NewAuditLog) -> StorageResult<AuditLog>;

    // Claims
    async fn get_zk_proofs(&self, user_id: &str) -> StorageResult<Vec<ZkProof>>;
    async fn create_zk_proof(&self, proof: NewZkProof) -> StorageResult<ZkProof>;
    async fn get_zk_proof(&self, id: &str) -> StorageResult<Option<ZkProof>>;

    // Medical form tokens
    async fn get_medical_form_tokens(&self, user_id: &str) -> StorageResult<Vec<MedicalFormToken>>;
    async fn get_medical_form_token_by_token(&self, token: &str) -> StorageResult<Option<MedicalFormToken>>;
    async fn create_medical_form_token(&self, token: NewMedicalFormToken) -> StorageResult<MedicalFormToken>;

    /// Complete a token: fails with `AlreadyUsed` or `Expired` unless it is unused and `now`
    /// is strictly before its expiry. The check and the write happen atomically.
    async fn update_medical_form_token(
        &self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<MedicalFormToken>;

    /// [`Storage::update_medical_form_token`] plus the token's health vault item and
    /// completion audit entry, written together or not at all.
    async fn complete_medical_form(
        &self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<CompletedForm>;
}
