use super::{Storage, StorageError, StorageResult};
use crate::models::{
    new_id, AccessRequest, AccessStatus, AuditLog, CompletedForm, MedicalFormToken,
    NewAccessRequest, NewAuditLog, NewMedicalFormToken, NewUser, NewVaultItem, NewZkProof,
    TokenCompletion, TokenState, User, UserPatch, VaultCategory, VaultItem, ZkProof,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Process-local store. Everything is lost on restart.
///
/// Records are kept in insertion order, so "newest first" is a reverse scan. Each operation
/// takes the lock exactly once, which makes guarded updates check-and-set atomic.
#[derive(Default)]
pub struct MemStorage {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    vault_items: Vec<VaultItem>,
    access_requests: Vec<AccessRequest>,
    audit_logs: Vec<AuditLog>,
    zk_proofs: Vec<ZkProof>,
    medical_form_tokens: Vec<MedicalFormToken>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let t = self.inner.read().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let t = self.inner.read().await;
        Ok(t.users.iter().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        let user = user.into_user(new_id(), Utc::now());
        self.inner.write().await.users.push(user.clone());
        Ok(user)
    }

    async fn create_user_with_id(&self, id: &str, user: NewUser) -> StorageResult<User> {
        let mut t = self.inner.write().await;
        if t.users.iter().any(|u| u.id == id) {
            return Err(StorageError::Conflict(format!("user {id} already exists")));
        }
        let user = user.into_user(id.to_string(), Utc::now());
        t.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User> {
        let mut t = self.inner.write().await;
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StorageError::not_found("user", id))?;
        patch.apply(user, Utc::now());
        Ok(user.clone())
    }

    async fn get_vault_items(&self, user_id: &str) -> StorageResult<Vec<VaultItem>> {
        let t = self.inner.read().await;
        Ok(t.vault_items.iter().rev().filter(|i| i.user_id == user_id).cloned().collect())
    }

    async fn get_vault_items_by_category(
        &self,
        user_id: &str,
        category: VaultCategory,
    ) -> StorageResult<Vec<VaultItem>> {
        let t = self.inner.read().await;
        Ok(t
            .vault_items
            .iter()
            .rev()
            .filter(|i| i.user_id == user_id && i.category == category)
            .cloned()
            .collect())
    }

    async fn create_vault_item(&self, item: NewVaultItem) -> StorageResult<VaultItem> {
        let item = item.into_item(new_id(), Utc::now());
        self.inner.write().await.vault_items.push(item.clone());
        Ok(item)
    }

    async fn get_access_requests(&self, user_id: &str) -> StorageResult<Vec<AccessRequest>> {
        let t = self.inner.read().await;
        let mut out: Vec<AccessRequest> =
            t.access_requests.iter().rev().filter(|r| r.user_id == user_id).cloned().collect();
        out.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        Ok(out)
    }

    async fn get_access_request(&self, id: &str) -> StorageResult<Option<AccessRequest>> {
        let t = self.inner.read().await;
        Ok(t.access_requests.iter().find(|r| r.id == id).cloned())
    }

    async fn create_access_request(&self, request: NewAccessRequest) -> StorageResult<AccessRequest> {
        let request = request.into_request(new_id(), Utc::now());
        self.inner.write().await.access_requests.push(request.clone());
        Ok(request)
    }

    async fn update_access_request_status(
        &self,
        id: &str,
        status: AccessStatus,
    ) -> StorageResult<AccessRequest> {
        self.inner.write().await.transition(id, status)
    }

    async fn respond_to_access_request(
        &self,
        id: &str,
        status: AccessStatus,
    ) -> StorageResult<(AccessRequest, AuditLog)> {
        let mut t = self.inner.write().await;
        let request = t.transition(id, status)?;
        let log = request.status_audit().into_log(new_id(), Utc::now());
        t.audit_logs.push(log.clone());
        Ok((request, log))
    }

    async fn get_audit_logs(&self, user_id: &str, limit: usize) -> StorageResult<Vec<AuditLog>> {
        let t = self.inner.read().await;
        Ok(t.audit_logs.iter().rev().filter(|l| l.user_id == user_id).take(limit).cloned().collect())
    }

    async fn create_audit_log(&self, log: NewAuditLog) -> StorageResult<AuditLog> {
        let log = log.into_log(new_id(), Utc::now());
        self.inner.write().await.audit_logs.push(log.clone());
        Ok(log)
    }

    async fn get_zk_proofs(&self, user_id: &str) -> StorageResult<Vec<ZkProof>> {
        let t = self.inner.read().await;
        Ok(t.zk_proofs.iter().rev().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn create_zk_proof(&self, proof: NewZkProof) -> StorageResult<ZkProof> {
        let proof = proof.into_proof(new_id(), Utc::now());
        self.inner.write().await.zk_proofs.push(proof.clone());
        Ok(proof)
    }

    async fn get_zk_proof(&self, id: &str) -> StorageResult<Option<ZkProof>> {
        let t = self.inner.read().await;
        Ok(t.zk_proofs.iter().find(|p| p.id == id).cloned())
    }

    async fn get_medical_form_tokens(&self, user_id: &str) -> StorageResult<Vec<MedicalFormToken>> {
        let t = self.inner.read().await;
        Ok(t.medical_form_tokens.iter().rev().filter(|m| m.user_id == user_id).cloned().collect())
    }

    async fn get_medical_form_token_by_token(&self, token: &str) -> StorageResult<Option<MedicalFormToken>> {
        let t = self.inner.read().await;
        Ok(t.medical_form_tokens.iter().find(|m| m.token == token).cloned())
    }

    async fn create_medical_form_token(&self, token: NewMedicalFormToken) -> StorageResult<MedicalFormToken> {
        let mut t = self.inner.write().await;
        if t.medical_form_tokens.iter().any(|m| m.token == token.token) {
            return Err(StorageError::Conflict("medical form token already exists".to_string()));
        }
        let token = token.into_token(new_id(), Utc::now());
        t.medical_form_tokens.push(token.clone());
        Ok(token)
    }

    async fn update_medical_form_token(
        &self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<MedicalFormToken> {
        self.inner.write().await.complete_token(id, completion, now)
    }

    async fn complete_medical_form(
        &self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<CompletedForm> {
        let mut t = self.inner.write().await;
        let token = t.complete_token(id, completion, now)?;
        let vault_item = token.health_record(now).into_item(new_id(), now);
        let audit_log = token.completion_audit().into_log(new_id(), now);
        t.vault_items.push(vault_item.clone());
        t.audit_logs.push(audit_log.clone());
        Ok(CompletedForm { token, vault_item, audit_log })
    }
}

impl Tables {
    fn transition(&mut self, id: &str, status: AccessStatus) -> StorageResult<AccessRequest> {
        let request = self
            .access_requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::not_found("access request", id))?;

        if !request.status.can_transition_to(status) {
            return Err(StorageError::invalid_transition(request.status, status));
        }

        request.status = status;
        request.response_date = Some(Utc::now());
        Ok(request.clone())
    }

    fn complete_token(
        &mut self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<MedicalFormToken> {
        let token = self
            .medical_form_tokens
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StorageError::not_found("medical form token", id))?;

        match token.state(now) {
            TokenState::Used => return Err(StorageError::AlreadyUsed),
            TokenState::Expired => return Err(StorageError::Expired),
            TokenState::Open => {}
        }

        completion.apply(token, now);
        Ok(token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuditAction, MedicalFormData, PrivacyLevel, SettingsPatch, UserType, VaultItemData,
    };
    use chrono::Duration;
    use std::collections::HashSet;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "alice".into(),
            email: email.into(),
            full_name: "Alice Doe".into(),
            phone: None,
            location: None,
            bio: None,
            profile_picture: None,
            did_address: "did:midnight:alice".into(),
            wallet_connected: true,
            user_type: UserType::Citizen,
            privacy_level: PrivacyLevel::DEFAULT_USER,
        }
    }

    fn new_request(user_id: &str, status: AccessStatus) -> NewAccessRequest {
        NewAccessRequest {
            user_id: user_id.into(),
            requester_name: "City Clinic".into(),
            requester_email: "front@clinic.test".into(),
            data_requested: "vaccination record".into(),
            purpose: "enrolment".into(),
            status,
            privacy_level: PrivacyLevel::try_from(3u8).unwrap(),
        }
    }

    fn new_token(user_id: &str, token: &str, expires_at: DateTime<Utc>) -> NewMedicalFormToken {
        NewMedicalFormToken {
            token: token.into(),
            user_id: user_id.into(),
            patient_name: "Alice Doe".into(),
            appointment_type: "General Checkup".into(),
            expires_at,
        }
    }

    fn completion() -> TokenCompletion {
        TokenCompletion {
            doctor_name: "Dr. Grey".into(),
            doctor_wallet_address: Some("addr_test1".into()),
            form_data: MedicalFormData::default(),
        }
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = MemStorage::new();
        let mut ids = HashSet::new();
        for i in 0..50 {
            let log = store
                .create_audit_log(NewAuditLog {
                    user_id: "u1".into(),
                    action: AuditAction::SettingsUpdated,
                    description: format!("entry {i}"),
                    entity_name: None,
                    privacy_level: None,
                })
                .await
                .unwrap();
            assert!(ids.insert(log.id));
        }
        let item = store
            .create_vault_item(NewVaultItem {
                user_id: "u1".into(),
                category: VaultCategory::Ids,
                name: "Passport".into(),
                privacy_level: PrivacyLevel::DEFAULT_USER,
                data: VaultItemData::default(),
            })
            .await
            .unwrap();
        assert!(ids.insert(item.id));
    }

    #[tokio::test]
    async fn reads_of_unknown_ids_are_empty() {
        let store = MemStorage::new();
        assert!(store.get_user("nobody").await.unwrap().is_none());
        assert!(store.get_vault_items("nobody").await.unwrap().is_empty());
        assert!(store.get_access_requests("nobody").await.unwrap().is_empty());
        assert!(store.get_audit_logs("nobody", 10).await.unwrap().is_empty());
        assert!(store.get_zk_proof("nothing").await.unwrap().is_none());
        assert!(store.get_medical_form_token_by_token("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_missing_user_fails() {
        let store = MemStorage::new();
        let err = store.update_user("ghost", UserPatch::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: "user", .. }));
    }

    #[tokio::test]
    async fn user_patch_merges_and_stamps() {
        let store = MemStorage::new();
        store.create_user_with_id("demo", new_user("a@x.test")).await.unwrap();

        let updated = store
            .update_user(
                "demo",
                UserPatch { bio: Some(Some("hi".into())), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("hi"));
        assert_eq!(updated.full_name, "Alice Doe");
        assert!(updated.updated_at.is_some());

        let again = store.create_user_with_id("demo", new_user("b@x.test")).await;
        assert!(matches!(again, Err(StorageError::Conflict(_))));
        assert_eq!(store.get_user_by_email("a@x.test").await.unwrap().map(|u| u.id), Some("demo".into()));
    }

    #[tokio::test]
    async fn access_request_follows_state_machine() {
        let store = MemStorage::new();
        let req = store.create_access_request(new_request("u1", AccessStatus::Pending)).await.unwrap();
        assert!(req.response_date.is_none());

        let approved = store.update_access_request_status(&req.id, AccessStatus::Approved).await.unwrap();
        assert_eq!(approved.status, AccessStatus::Approved);
        assert!(approved.response_date.is_some());

        let err = store.update_access_request_status(&req.id, AccessStatus::Denied).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { from: "approved", to: "denied" }));

        let revoked = store.update_access_request_status(&req.id, AccessStatus::Revoked).await.unwrap();
        assert_eq!(revoked.status, AccessStatus::Revoked);

        let err = store.update_access_request_status(&req.id, AccessStatus::Approved).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));

        let err = store.update_access_request_status("missing", AccessStatus::Approved).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn denied_request_cannot_be_approved() {
        let store = MemStorage::new();
        let req = store.create_access_request(new_request("u1", AccessStatus::Pending)).await.unwrap();
        store.update_access_request_status(&req.id, AccessStatus::Denied).await.unwrap();

        let err = store.update_access_request_status(&req.id, AccessStatus::Approved).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { from: "denied", to: "approved" }));
        let stored = store.get_access_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccessStatus::Denied);
    }

    #[tokio::test]
    async fn pre_approved_request_is_answered_at_creation() {
        let store = MemStorage::new();
        let req = store.create_access_request(new_request("u1", AccessStatus::Approved)).await.unwrap();
        assert_eq!(req.response_date, Some(req.request_date));
    }

    #[tokio::test]
    async fn audit_logs_newest_first_and_limited() {
        let store = MemStorage::new();
        for i in 0..7 {
            store
                .create_audit_log(NewAuditLog {
                    user_id: "u1".into(),
                    action: AuditAction::ProfileUpdated,
                    description: format!("entry {i}"),
                    entity_name: None,
                    privacy_level: None,
                })
                .await
                .unwrap();
        }
        let logs = store.get_audit_logs("u1", 3).await.unwrap();
        let descriptions: Vec<_> = logs.iter().map(|l| l.description.as_str()).collect();
        assert_eq!(descriptions, ["entry 6", "entry 5", "entry 4"]);
    }

    #[tokio::test]
    async fn token_completes_once() {
        let store = MemStorage::new();
        let now = Utc::now();
        let token = store
            .create_medical_form_token(new_token("u1", "tok1", now + Duration::hours(1)))
            .await
            .unwrap();
        assert!(!token.is_used);

        let done = store.update_medical_form_token(&token.id, completion(), now).await.unwrap();
        assert!(done.is_used);
        assert_eq!(done.doctor_name.as_deref(), Some("Dr. Grey"));

        let err = store.update_medical_form_token(&token.id, completion(), now).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyUsed));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let store = MemStorage::new();
        let now = Utc::now();
        let token = store
            .create_medical_form_token(new_token("u1", "tok2", now - Duration::minutes(1)))
            .await
            .unwrap();

        let err = store.update_medical_form_token(&token.id, completion(), now).await.unwrap_err();
        assert!(matches!(err, StorageError::Expired));
        let stored = store.get_medical_form_token_by_token("tok2").await.unwrap().unwrap();
        assert!(!stored.is_used);
    }

    #[tokio::test]
    async fn duplicate_token_string_conflicts() {
        let store = MemStorage::new();
        let expires = Utc::now() + Duration::hours(1);
        store.create_medical_form_token(new_token("u1", "same", expires)).await.unwrap();
        let err = store.create_medical_form_token(new_token("u2", "same", expires)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_completions_have_one_winner() {
        let store = std::sync::Arc::new(MemStorage::new());
        let now = Utc::now();
        let token = store
            .create_medical_form_token(new_token("u1", "race", now + Duration::hours(1)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = token.id.clone();
            handles.push(tokio::spawn(async move {
                store.complete_medical_form(&id, completion(), now).await.is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.get_vault_items("u1").await.unwrap().len(), 1);
        assert_eq!(store.get_audit_logs("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completed_form_writes_record_and_audit() {
        let store = MemStorage::new();
        let now = Utc::now();
        let token = store
            .create_medical_form_token(new_token("u1", "tok3", now + Duration::hours(1)))
            .await
            .unwrap();

        let done = store.complete_medical_form(&token.id, completion(), now).await.unwrap();
        assert!(done.token.is_used);
        assert_eq!(done.vault_item.category, VaultCategory::Health);
        assert_eq!(done.vault_item.privacy_level, PrivacyLevel::MOST_RESTRICTIVE);
        assert_eq!(done.vault_item.name, "General Checkup - Dr. Grey");
        assert_eq!(done.audit_log.action, AuditAction::MedicalFormCompleted);
        assert_eq!(store.get_vault_items("u1").await.unwrap(), vec![done.vault_item]);
        assert_eq!(store.get_audit_logs("u1", 10).await.unwrap(), vec![done.audit_log]);

        let err = store.complete_medical_form(&token.id, completion(), now).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyUsed));
        assert_eq!(store.get_vault_items("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_form_writes_nothing() {
        let store = MemStorage::new();
        let now = Utc::now();
        let token = store
            .create_medical_form_token(new_token("u1", "tok4", now - Duration::minutes(1)))
            .await
            .unwrap();

        let err = store.complete_medical_form(&token.id, completion(), now).await.unwrap_err();
        assert!(matches!(err, StorageError::Expired));
        assert!(store.get_vault_items("u1").await.unwrap().is_empty());
        assert!(store.get_audit_logs("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn response_is_audited_with_the_transition() {
        let store = MemStorage::new();
        let req = store.create_access_request(new_request("u1", AccessStatus::Pending)).await.unwrap();

        let (denied, log) = store.respond_to_access_request(&req.id, AccessStatus::Denied).await.unwrap();
        assert_eq!(denied.status, AccessStatus::Denied);
        assert_eq!(log.action, AuditAction::AccessDenied);
        assert_eq!(log.description, "Access denied to City Clinic");

        let err = store.respond_to_access_request(&req.id, AccessStatus::Approved).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
        assert_eq!(store.get_audit_logs("u1", 10).await.unwrap(), vec![log]);
    }

    #[tokio::test]
    async fn concurrent_settings_patches_all_apply() {
        let store = std::sync::Arc::new(MemStorage::new());
        store.create_user_with_id("demo", new_user("a@x.test")).await.unwrap();

        let patches = [
            SettingsPatch { push_notifications: Some(true), ..Default::default() },
            SettingsPatch { two_factor_auth: Some(true), ..Default::default() },
            SettingsPatch { security_alerts: Some(false), ..Default::default() },
            SettingsPatch { auto_logout: Some(15), ..Default::default() },
        ];
        let mut handles = Vec::new();
        for patch in patches {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update_user("demo", UserPatch { settings: Some(patch), ..Default::default() }).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let settings = store.get_user("demo").await.unwrap().unwrap().settings;
        assert!(settings.push_notifications);
        assert!(settings.two_factor_auth);
        assert!(!settings.security_alerts);
        assert_eq!(settings.auto_logout, Some(15));
    }
}
