use super::{Storage, StorageError, StorageResult};
use crate::models::{
    new_id, AccessRequest, AccessStatus, AuditAction, AuditLog, CompletedForm, MedicalFormData,
    MedicalFormToken, NewAccessRequest, NewAuditLog, NewMedicalFormToken, NewUser, NewVaultItem,
    NewZkProof, PrivacyLevel, TokenCompletion, User, UserPatch, UserType, VaultCategory,
    VaultItem, VaultItemData, ZkProof,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

pub type Db = Pool<Sqlite>;

/// SQLite-backed store with the same contract as [`super::MemStorage`].
///
/// Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`), so text order is
/// time order. Ties are broken by rowid.
#[derive(Clone)]
pub struct SqliteStorage {
    db: Db,
}

impl SqliteStorage {
    pub async fn connect(db_url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let storage = Self { db };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// A private in-memory database. Pinned to one connection that never expires, since every
    /// SQLite memory connection is its own database.
    #[cfg(test)]
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let storage = Self { db };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL,
  email TEXT NOT NULL,
  full_name TEXT NOT NULL,
  phone TEXT,
  location TEXT,
  bio TEXT,
  profile_picture TEXT,
  did_address TEXT NOT NULL,
  wallet_connected INTEGER NOT NULL,
  user_type TEXT NOT NULL,
  privacy_level INTEGER NOT NULL,
  settings_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT
);

CREATE TABLE IF NOT EXISTS vault_items (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  category TEXT NOT NULL,
  name TEXT NOT NULL,
  privacy_level INTEGER NOT NULL,
  data_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS access_requests (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  requester_name TEXT NOT NULL,
  requester_email TEXT NOT NULL,
  data_requested TEXT NOT NULL,
  purpose TEXT NOT NULL,
  status TEXT NOT NULL,
  privacy_level INTEGER NOT NULL,
  request_date TEXT NOT NULL,
  response_date TEXT
);

CREATE TABLE IF NOT EXISTS audit_logs (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  action TEXT NOT NULL,
  description TEXT NOT NULL,
  entity_name TEXT,
  privacy_level INTEGER,
  timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS zk_proofs (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  proof_type TEXT NOT NULL,
  attributes_json TEXT NOT NULL,
  proof_result TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS medical_form_tokens (
  id TEXT PRIMARY KEY,
  token TEXT NOT NULL UNIQUE,
  user_id TEXT NOT NULL,
  patient_name TEXT NOT NULL,
  appointment_type TEXT NOT NULL,
  expires_at TEXT NOT NULL,
  is_used INTEGER NOT NULL,
  doctor_wallet_address TEXT,
  doctor_name TEXT,
  completed_at TEXT,
  form_data_json TEXT,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vault_items_user ON vault_items(user_id);
CREATE INDEX IF NOT EXISTS idx_access_requests_user ON access_requests(user_id);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_zk_proofs_user ON zk_proofs(user_id);
CREATE INDEX IF NOT EXISTS idx_medical_form_tokens_user ON medical_form_tokens(user_id);
"#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        let settings_json = to_json(&user.settings)?;

        sqlx::query(
            r#"INSERT INTO users
               (id, username, email, full_name, phone, location, bio, profile_picture, did_address,
                wallet_connected, user_type, privacy_level, settings_json, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(&user.location)
        .bind(&user.bio)
        .bind(&user.profile_picture)
        .bind(&user.did_address)
        .bind(user.wallet_connected)
        .bind(user.user_type.as_str())
        .bind(i64::from(user.privacy_level.value()))
        .bind(settings_json)
        .bind(ts(user.created_at))
        .bind(user.updated_at.map(ts))
        .execute(&self.db)
        .await
        .map_err(|e| unique_to_conflict(e, format!("user {} already exists", user.id)))?;

        Ok(())
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn to_json<T: Serialize>(v: &T) -> StorageResult<String> {
    serde_json::to_string(v).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn from_json<T: DeserializeOwned>(s: &str) -> StorageResult<T> {
    serde_json::from_str(s).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn level(v: i64) -> StorageResult<PrivacyLevel> {
    PrivacyLevel::try_from(v).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn parse_enum<T>(s: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> StorageResult<T> {
    parse(s).ok_or_else(|| StorageError::Corrupt(format!("unknown {what} {s:?}")))
}

fn unique_to_conflict(e: sqlx::Error, msg: String) -> StorageError {
    let unique = e.as_database_error().is_some_and(|db_err| db_err.is_unique_violation());
    if unique { StorageError::Conflict(msg) } else { StorageError::Database(e) }
}

fn user_from_row(row: &SqliteRow) -> StorageResult<User> {
    let user_type: String = row.try_get("user_type")?;
    let settings_json: String = row.try_get("settings_json")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        location: row.try_get("location")?,
        bio: row.try_get("bio")?,
        profile_picture: row.try_get("profile_picture")?,
        did_address: row.try_get("did_address")?,
        wallet_connected: row.try_get("wallet_connected")?,
        user_type: parse_enum(&user_type, UserType::parse, "user type")?,
        privacy_level: level(row.try_get("privacy_level")?)?,
        settings: from_json(&settings_json)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_opt_ts(row.try_get("updated_at")?)?,
    })
}

fn vault_item_from_row(row: &SqliteRow) -> StorageResult<VaultItem> {
    let category: String = row.try_get("category")?;
    let data_json: String = row.try_get("data_json")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(VaultItem {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        category: parse_enum(&category, VaultCategory::parse, "vault category")?,
        name: row.try_get("name")?,
        privacy_level: level(row.try_get("privacy_level")?)?,
        data: from_json::<VaultItemData>(&data_json)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn access_request_from_row(row: &SqliteRow) -> StorageResult<AccessRequest> {
    let status: String = row.try_get("status")?;
    let request_date: String = row.try_get("request_date")?;

    Ok(AccessRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        requester_name: row.try_get("requester_name")?,
        requester_email: row.try_get("requester_email")?,
        data_requested: row.try_get("data_requested")?,
        purpose: row.try_get("purpose")?,
        status: parse_enum(&status, AccessStatus::parse, "access status")?,
        privacy_level: level(row.try_get("privacy_level")?)?,
        request_date: parse_ts(&request_date)?,
        response_date: parse_opt_ts(row.try_get("response_date")?)?,
    })
}

fn audit_log_from_row(row: &SqliteRow) -> StorageResult<AuditLog> {
    let action: String = row.try_get("action")?;
    let privacy_level: Option<i64> = row.try_get("privacy_level")?;
    let timestamp: String = row.try_get("timestamp")?;

    Ok(AuditLog {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        action: parse_enum(&action, AuditAction::parse, "audit action")?,
        description: row.try_get("description")?,
        entity_name: row.try_get("entity_name")?,
        privacy_level: privacy_level.map(level).transpose()?,
        timestamp: parse_ts(&timestamp)?,
    })
}

fn zk_proof_from_row(row: &SqliteRow) -> StorageResult<ZkProof> {
    let attributes_json: String = row.try_get("attributes_json")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ZkProof {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        proof_type: row.try_get("proof_type")?,
        attributes: from_json(&attributes_json)?,
        proof_result: row.try_get("proof_result")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn medical_form_token_from_row(row: &SqliteRow) -> StorageResult<MedicalFormToken> {
    let expires_at: String = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;
    let form_data_json: Option<String> = row.try_get("form_data_json")?;

    Ok(MedicalFormToken {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        user_id: row.try_get("user_id")?,
        patient_name: row.try_get("patient_name")?,
        appointment_type: row.try_get("appointment_type")?,
        expires_at: parse_ts(&expires_at)?,
        is_used: row.try_get("is_used")?,
        doctor_wallet_address: row.try_get("doctor_wallet_address")?,
        doctor_name: row.try_get("doctor_name")?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        form_data: form_data_json.as_deref().map(from_json::<MedicalFormData>).transpose()?,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query(r#"SELECT * FROM users WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query(r#"SELECT * FROM users WHERE email = ? ORDER BY rowid LIMIT 1"#)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        let user = user.into_user(new_id(), now());
        self.insert_user(&user).await?;
        Ok(user)
    }

    async fn create_user_with_id(&self, id: &str, user: NewUser) -> StorageResult<User> {
        let user = user.into_user(id.to_string(), now());
        self.insert_user(&user).await?;
        Ok(user)
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User> {
        let mut tx = self.db.begin().await?;

        // Claim the write lock before reading. Upgrading a read lock fails at once with
        // SQLITE_BUSY when another writer got there first; a fresh write waits out busy_timeout.
        let claimed = sqlx::query(r#"UPDATE users SET id = id WHERE id = ?"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            return Err(StorageError::not_found("user", id));
        }

        let row = sqlx::query(r#"SELECT * FROM users WHERE id = ?"#)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let mut user = user_from_row(&row)?;
        patch.apply(&mut user, now());

        sqlx::query(
            r#"UPDATE users SET full_name = ?, email = ?, phone = ?, location = ?, bio = ?,
               wallet_connected = ?, user_type = ?, privacy_level = ?, settings_json = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.location)
        .bind(&user.bio)
        .bind(user.wallet_connected)
        .bind(user.user_type.as_str())
        .bind(i64::from(user.privacy_level.value()))
        .bind(to_json(&user.settings)?)
        .bind(user.updated_at.map(ts))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn get_vault_items(&self, user_id: &str) -> StorageResult<Vec<VaultItem>> {
        let rows = sqlx::query(
            r#"SELECT * FROM vault_items WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(vault_item_from_row).collect()
    }

    async fn get_vault_items_by_category(
        &self,
        user_id: &str,
        category: VaultCategory,
    ) -> StorageResult<Vec<VaultItem>> {
        let rows = sqlx::query(
            r#"SELECT * FROM vault_items WHERE user_id = ? AND category = ?
               ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .bind(category.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(vault_item_from_row).collect()
    }

    async fn create_vault_item(&self, item: NewVaultItem) -> StorageResult<VaultItem> {
        let item = item.into_item(new_id(), now());
        let mut conn = self.db.acquire().await?;
        insert_vault_item(&mut conn, &item).await?;
        Ok(item)
    }

    async fn get_access_requests(&self, user_id: &str) -> StorageResult<Vec<AccessRequest>> {
        let rows = sqlx::query(
            r#"SELECT * FROM access_requests WHERE user_id = ? ORDER BY request_date DESC, rowid DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(access_request_from_row).collect()
    }

    async fn get_access_request(&self, id: &str) -> StorageResult<Option<AccessRequest>> {
        let row = sqlx::query(r#"SELECT * FROM access_requests WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(access_request_from_row).transpose()
    }

    async fn create_access_request(&self, request: NewAccessRequest) -> StorageResult<AccessRequest> {
        let request = request.into_request(new_id(), now());

        sqlx::query(
            r#"INSERT INTO access_requests
               (id, user_id, requester_name, requester_email, data_requested, purpose, status,
                privacy_level, request_date, response_date)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&request.id)
        .bind(&request.user_id)
        .bind(&request.requester_name)
        .bind(&request.requester_email)
        .bind(&request.data_requested)
        .bind(&request.purpose)
        .bind(request.status.as_str())
        .bind(i64::from(request.privacy_level.value()))
        .bind(ts(request.request_date))
        .bind(request.response_date.map(ts))
        .execute(&self.db)
        .await?;

        Ok(request)
    }

    async fn update_access_request_status(
        &self,
        id: &str,
        status: AccessStatus,
    ) -> StorageResult<AccessRequest> {
        let mut conn = self.db.acquire().await?;
        transition(&mut conn, id, status).await
    }

    async fn respond_to_access_request(
        &self,
        id: &str,
        status: AccessStatus,
    ) -> StorageResult<(AccessRequest, AuditLog)> {
        let mut tx = self.db.begin().await?;
        let request = transition(&mut tx, id, status).await?;
        let log = request.status_audit().into_log(new_id(), now());
        insert_audit_log(&mut tx, &log).await?;
        tx.commit().await?;
        Ok((request, log))
    }

    async fn get_audit_logs(&self, user_id: &str, limit: usize) -> StorageResult<Vec<AuditLog>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"SELECT * FROM audit_logs WHERE user_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT ?"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(audit_log_from_row).collect()
    }

    async fn create_audit_log(&self, log: NewAuditLog) -> StorageResult<AuditLog> {
        let log = log.into_log(new_id(), now());
        let mut conn = self.db.acquire().await?;
        insert_audit_log(&mut conn, &log).await?;
        Ok(log)
    }

    async fn get_zk_proofs(&self, user_id: &str) -> StorageResult<Vec<ZkProof>> {
        let rows = sqlx::query(
            r#"SELECT * FROM zk_proofs WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(zk_proof_from_row).collect()
    }

    async fn create_zk_proof(&self, proof: NewZkProof) -> StorageResult<ZkProof> {
        let proof = proof.into_proof(new_id(), now());

        sqlx::query(
            r#"INSERT INTO zk_proofs (id, user_id, proof_type, attributes_json, proof_result, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&proof.id)
        .bind(&proof.user_id)
        .bind(&proof.proof_type)
        .bind(to_json(&proof.attributes)?)
        .bind(&proof.proof_result)
        .bind(ts(proof.created_at))
        .execute(&self.db)
        .await?;

        Ok(proof)
    }

    async fn get_zk_proof(&self, id: &str) -> StorageResult<Option<ZkProof>> {
        let row = sqlx::query(r#"SELECT * FROM zk_proofs WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(zk_proof_from_row).transpose()
    }

    async fn get_medical_form_tokens(&self, user_id: &str) -> StorageResult<Vec<MedicalFormToken>> {
        let rows = sqlx::query(
            r#"SELECT * FROM medical_form_tokens WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(medical_form_token_from_row).collect()
    }

    async fn get_medical_form_token_by_token(&self, token: &str) -> StorageResult<Option<MedicalFormToken>> {
        let row = sqlx::query(r#"SELECT * FROM medical_form_tokens WHERE token = ?"#)
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(medical_form_token_from_row).transpose()
    }

    async fn create_medical_form_token(&self, token: NewMedicalFormToken) -> StorageResult<MedicalFormToken> {
        let token = NewMedicalFormToken { expires_at: token.expires_at.trunc_subsecs(6), ..token }
            .into_token(new_id(), now());

        sqlx::query(
            r#"INSERT INTO medical_form_tokens
               (id, token, user_id, patient_name, appointment_type, expires_at, is_used, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&token.id)
        .bind(&token.token)
        .bind(&token.user_id)
        .bind(&token.patient_name)
        .bind(&token.appointment_type)
        .bind(ts(token.expires_at))
        .bind(token.is_used)
        .bind(ts(token.created_at))
        .execute(&self.db)
        .await
        .map_err(|e| unique_to_conflict(e, "medical form token already exists".to_string()))?;

        Ok(token)
    }

    async fn update_medical_form_token(
        &self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<MedicalFormToken> {
        let mut conn = self.db.acquire().await?;
        mark_token_used(&mut conn, id, completion, now).await
    }

    async fn complete_medical_form(
        &self,
        id: &str,
        completion: TokenCompletion,
        now: DateTime<Utc>,
    ) -> StorageResult<CompletedForm> {
        let mut tx = self.db.begin().await?;
        let token = mark_token_used(&mut tx, id, completion, now).await?;

        let completed_at = token.completed_at.unwrap_or_else(|| now.trunc_subsecs(6));
        let vault_item = token.health_record(completed_at).into_item(new_id(), completed_at);
        insert_vault_item(&mut tx, &vault_item).await?;
        let audit_log = token.completion_audit().into_log(new_id(), completed_at);
        insert_audit_log(&mut tx, &audit_log).await?;

        tx.commit().await?;
        Ok(CompletedForm { token, vault_item, audit_log })
    }
}

async fn insert_vault_item(conn: &mut SqliteConnection, item: &VaultItem) -> StorageResult<()> {
    sqlx::query(
        r#"INSERT INTO vault_items (id, user_id, category, name, privacy_level, data_json, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&item.id)
    .bind(&item.user_id)
    .bind(item.category.as_str())
    .bind(&item.name)
    .bind(i64::from(item.privacy_level.value()))
    .bind(to_json(&item.data)?)
    .bind(ts(item.created_at))
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_audit_log(conn: &mut SqliteConnection, log: &AuditLog) -> StorageResult<()> {
    sqlx::query(
        r#"INSERT INTO audit_logs (id, user_id, action, description, entity_name, privacy_level, timestamp)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&log.id)
    .bind(&log.user_id)
    .bind(log.action.as_str())
    .bind(&log.description)
    .bind(&log.entity_name)
    .bind(log.privacy_level.map(|l| i64::from(l.value())))
    .bind(ts(log.timestamp))
    .execute(conn)
    .await?;
    Ok(())
}

/// Move a request along its one incoming edge. The write is guarded on the predecessor status,
/// so of two racing transitions only one applies.
async fn transition(conn: &mut SqliteConnection, id: &str, status: AccessStatus) -> StorageResult<AccessRequest> {
    let applied = match AccessStatus::predecessor(status) {
        Some(from) => {
            sqlx::query(
                r#"UPDATE access_requests SET status = ?, response_date = ? WHERE id = ? AND status = ?"#,
            )
            .bind(status.as_str())
            .bind(ts(now()))
            .bind(id)
            .bind(from.as_str())
            .execute(&mut *conn)
            .await?
            .rows_affected()
                > 0
        }
        None => false,
    };

    let row = sqlx::query(r#"SELECT * FROM access_requests WHERE id = ?"#)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Err(StorageError::not_found("access request", id));
    };
    let request = access_request_from_row(&row)?;

    if !applied {
        return Err(StorageError::invalid_transition(request.status, status));
    }
    Ok(request)
}

async fn mark_token_used(
    conn: &mut SqliteConnection,
    id: &str,
    completion: TokenCompletion,
    now: DateTime<Utc>,
) -> StorageResult<MedicalFormToken> {
    let completed_at = ts(now.trunc_subsecs(6));

    // expires_at is fixed-width text, so the string comparison is chronological.
    let res = sqlx::query(
        r#"UPDATE medical_form_tokens
           SET is_used = 1, completed_at = ?, doctor_name = ?, doctor_wallet_address = ?, form_data_json = ?
           WHERE id = ? AND is_used = 0 AND expires_at > ?"#,
    )
    .bind(&completed_at)
    .bind(&completion.doctor_name)
    .bind(&completion.doctor_wallet_address)
    .bind(to_json(&completion.form_data)?)
    .bind(id)
    .bind(&completed_at)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(r#"SELECT * FROM medical_form_tokens WHERE id = ?"#)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Err(StorageError::not_found("medical form token", id));
    };
    let token = medical_form_token_from_row(&row)?;

    if res.rows_affected() == 0 {
        return Err(if token.is_used { StorageError::AlreadyUsed } else { StorageError::Expired });
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SettingsPatch;
    use chrono::Duration;
    use std::path::PathBuf;

    async fn store() -> SqliteStorage {
        SqliteStorage::in_memory().await.unwrap()
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "bob".into(),
            email: email.into(),
            full_name: "Bob Roe".into(),
            phone: Some("555-0100".into()),
            location: None,
            bio: None,
            profile_picture: None,
            did_address: "did:midnight:bob".into(),
            wallet_connected: false,
            user_type: UserType::Police,
            privacy_level: PrivacyLevel::DEFAULT_USER,
        }
    }

    #[tokio::test]
    async fn user_round_trip_and_patch() {
        let store = store().await;
        let created = store.create_user_with_id("demo", new_user("bob@x.test")).await.unwrap();
        assert_eq!(store.get_user("demo").await.unwrap(), Some(created.clone()));

        let before = created.settings.clone();
        let updated = store
            .update_user(
                "demo",
                UserPatch {
                    phone: Some(None),
                    settings: Some(SettingsPatch {
                        two_factor_auth: Some(true),
                        auto_logout: Some(15),
                        ..Default::default()
                    }),
                    wallet_connected: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.phone, None);
        assert!(updated.settings.two_factor_auth);
        assert_eq!(updated.settings.auto_logout, Some(15));
        assert_eq!(updated.settings.data_retention, before.data_retention);
        assert_eq!(updated.settings.email_notifications, before.email_notifications);

        let fetched = store.get_user_by_email("bob@x.test").await.unwrap().unwrap();
        assert_eq!(fetched, updated);

        let dup = store.create_user_with_id("demo", new_user("other@x.test")).await;
        assert!(matches!(dup, Err(StorageError::Conflict(_))));
        assert!(matches!(
            store.update_user("ghost", UserPatch::default()).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn access_transitions_are_guarded() {
        let store = store().await;
        let req = store
            .create_access_request(NewAccessRequest {
                user_id: "demo".into(),
                requester_name: "Acme Insurance".into(),
                requester_email: "claims@acme.test".into(),
                data_requested: "policy".into(),
                purpose: "claim".into(),
                status: AccessStatus::Pending,
                privacy_level: PrivacyLevel::MOST_RESTRICTIVE,
            })
            .await
            .unwrap();

        let approved = store.update_access_request_status(&req.id, AccessStatus::Approved).await.unwrap();
        assert!(approved.response_date.is_some());
        assert_eq!(store.get_access_request(&req.id).await.unwrap(), Some(approved));

        let err = store.update_access_request_status(&req.id, AccessStatus::Denied).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { from: "approved", to: "denied" }));

        store.update_access_request_status(&req.id, AccessStatus::Revoked).await.unwrap();
        assert_eq!(store.get_access_requests("demo").await.unwrap()[0].status, AccessStatus::Revoked);
    }

    #[tokio::test]
    async fn audit_log_limit_and_order() {
        let store = store().await;
        for action in [AuditAction::WalletLogin, AuditAction::ProfileUpdated, AuditAction::AccessGranted] {
            store
                .create_audit_log(NewAuditLog {
                    user_id: "demo".into(),
                    action,
                    description: action.as_str().into(),
                    entity_name: None,
                    privacy_level: Some(PrivacyLevel::MOST_RESTRICTIVE),
                })
                .await
                .unwrap();
        }
        let logs = store.get_audit_logs("demo", 2).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, AuditAction::AccessGranted);
        assert_eq!(logs[1].action, AuditAction::ProfileUpdated);
    }

    #[tokio::test]
    async fn vault_items_keep_tagged_payload() {
        let store = store().await;
        let item = store
            .create_vault_item(NewVaultItem {
                user_id: "demo".into(),
                category: VaultCategory::Insurance,
                name: "Policy card".into(),
                privacy_level: PrivacyLevel::DEFAULT_USER,
                data: VaultItemData::Document {
                    object_path: Some("/objects/uploads/abc".into()),
                    file_name: Some("card.pdf".into()),
                    mime_type: None,
                    description: None,
                },
            })
            .await
            .unwrap();

        assert_eq!(store.get_vault_items("demo").await.unwrap(), vec![item.clone()]);
        assert_eq!(
            store.get_vault_items_by_category("demo", VaultCategory::Insurance).await.unwrap(),
            vec![item]
        );
        assert!(store.get_vault_items_by_category("demo", VaultCategory::Health).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_completion_guards() {
        let store = store().await;
        let now = Utc::now();
        let token = store
            .create_medical_form_token(NewMedicalFormToken {
                token: "t-1".into(),
                user_id: "demo".into(),
                patient_name: "Bob".into(),
                appointment_type: "Cardiology".into(),
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        let completion = || TokenCompletion {
            doctor_name: "Dr. House".into(),
            doctor_wallet_address: None,
            form_data: MedicalFormData { diagnosis: "fine".into(), ..Default::default() },
        };

        let late = token.expires_at + Duration::seconds(1);
        assert!(matches!(
            store.update_medical_form_token(&token.id, completion(), late).await,
            Err(StorageError::Expired)
        ));

        let done = store.update_medical_form_token(&token.id, completion(), now).await.unwrap();
        assert!(done.is_used);
        let fetched = store.get_medical_form_token_by_token("t-1").await.unwrap().unwrap();
        assert_eq!(fetched, done);

        assert!(matches!(
            store.update_medical_form_token(&token.id, completion(), now).await,
            Err(StorageError::AlreadyUsed)
        ));
        assert_eq!(store.get_medical_form_tokens("demo").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn proofs_round_trip() {
        let store = store().await;
        let proof = store
            .create_zk_proof(NewZkProof {
                user_id: "demo".into(),
                proof_type: "age_verification".into(),
                attributes: zk_claims::ProofAttributes { min_age: Some(21), ..Default::default() },
                proof_result: "User is over 21 years old".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.get_zk_proof(&proof.id).await.unwrap(), Some(proof.clone()));
        assert_eq!(store.get_zk_proofs("demo").await.unwrap(), vec![proof]);
    }

    fn pending_request() -> NewAccessRequest {
        NewAccessRequest {
            user_id: "demo".into(),
            requester_name: "Acme Insurance".into(),
            requester_email: "claims@acme.test".into(),
            data_requested: "policy".into(),
            purpose: "claim".into(),
            status: AccessStatus::Pending,
            privacy_level: PrivacyLevel::MOST_RESTRICTIVE,
        }
    }

    async fn fail_inserts_into(store: &SqliteStorage, table: &str) {
        sqlx::query(&format!(
            "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table} BEGIN SELECT RAISE(ABORT, 'disk full'); END"
        ))
        .execute(&store.db)
        .await
        .unwrap();
    }

    async fn allow_inserts_into(store: &SqliteStorage, table: &str) {
        sqlx::query(&format!("DROP TRIGGER fail_{table}")).execute(&store.db).await.unwrap();
    }

    #[tokio::test]
    async fn failed_record_insert_leaves_form_open() {
        let store = store().await;
        let token = store
            .create_medical_form_token(NewMedicalFormToken {
                token: "t-2".into(),
                user_id: "demo".into(),
                patient_name: "Bob".into(),
                appointment_type: "Dermatology".into(),
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();
        let completion = || TokenCompletion {
            doctor_name: "Dr. Grey".into(),
            doctor_wallet_address: None,
            form_data: MedicalFormData::default(),
        };

        fail_inserts_into(&store, "vault_items").await;
        let err = store.complete_medical_form(&token.id, completion(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));

        let still_open = store.get_medical_form_token_by_token("t-2").await.unwrap().unwrap();
        assert!(!still_open.is_used);
        assert_eq!(still_open.completed_at, None);
        assert!(store.get_vault_items("demo").await.unwrap().is_empty());
        assert!(store.get_audit_logs("demo", 10).await.unwrap().is_empty());

        allow_inserts_into(&store, "vault_items").await;
        let done = store.complete_medical_form(&token.id, completion(), Utc::now()).await.unwrap();
        assert!(done.token.is_used);
        assert_eq!(done.vault_item.category, VaultCategory::Health);
        assert_eq!(done.audit_log.action, AuditAction::MedicalFormCompleted);
        assert_eq!(store.get_vault_items("demo").await.unwrap(), vec![done.vault_item]);
        assert_eq!(store.get_audit_logs("demo", 10).await.unwrap(), vec![done.audit_log]);
    }

    #[tokio::test]
    async fn failed_audit_insert_rolls_back_response() {
        let store = store().await;
        let req = store.create_access_request(pending_request()).await.unwrap();

        fail_inserts_into(&store, "audit_logs").await;
        assert!(store.respond_to_access_request(&req.id, AccessStatus::Approved).await.is_err());
        let unchanged = store.get_access_request(&req.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, AccessStatus::Pending);
        assert_eq!(unchanged.response_date, None);

        allow_inserts_into(&store, "audit_logs").await;
        let (approved, log) = store.respond_to_access_request(&req.id, AccessStatus::Approved).await.unwrap();
        assert_eq!(approved.status, AccessStatus::Approved);
        assert_eq!(log.action, AuditAction::AccessGranted);
        assert_eq!(store.get_audit_logs("demo", 10).await.unwrap(), vec![log]);

        let err = store.respond_to_access_request(&req.id, AccessStatus::Denied).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { from: "approved", to: "denied" }));
        assert_eq!(store.get_audit_logs("demo", 10).await.unwrap().len(), 1);
    }

    struct TempDb(PathBuf);

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{suffix}", self.0.display()));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_user_updates_on_file_db_all_apply() {
        let db = TempDb(std::env::temp_dir().join(format!("idshield-{}.sqlite", uuid::Uuid::new_v4())));
        let store = SqliteStorage::connect(&format!("sqlite:{}", db.0.display())).await.unwrap();
        store.create_user_with_id("demo", new_user("bob@x.test")).await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let settings = match i % 4 {
                        0 => SettingsPatch { two_factor_auth: Some(true), ..Default::default() },
                        1 => SettingsPatch { push_notifications: Some(true), ..Default::default() },
                        2 => SettingsPatch { auto_logout: Some(45), ..Default::default() },
                        _ => SettingsPatch { data_retention: Some("30days".into()), ..Default::default() },
                    };
                    store
                        .update_user(
                            "demo",
                            UserPatch {
                                full_name: Some(format!("Bob {i}")),
                                settings: Some(settings),
                                ..Default::default()
                            },
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let user = store.get_user("demo").await.unwrap().unwrap();
        assert!(user.full_name.starts_with("Bob "));
        assert!(user.settings.two_factor_auth);
        assert!(user.settings.push_notifications);
        assert_eq!(user.settings.auto_logout, Some(45));
        assert_eq!(user.settings.data_retention.as_deref(), Some("30days"));
        store.db.close().await;
    }
}
