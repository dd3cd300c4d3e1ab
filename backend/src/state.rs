use crate::config::{Config, StorageBackend};
use crate::errors::ApiError;
use crate::models::{AuditAction, NewAuditLog, NewUser, PrivacyLevel, User, UserType};
use crate::objects::ObjectStore;
use crate::storage::{MemStorage, SqliteStorage, Storage};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub objects: ObjectStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, objects: ObjectStore, config: Config) -> Self {
        Self {
            storage,
            objects,
            config: Arc::new(config),
        }
    }

    /// Open the configured backend. The SQLite file lives under the data directory.
    pub async fn from_config(config: Config) -> Result<Self, ApiError> {
        let storage: Arc<dyn Storage> = match config.storage {
            StorageBackend::Memory => Arc::new(MemStorage::new()),
            StorageBackend::Sqlite => Arc::new(SqliteStorage::connect(&config.sqlite_url()).await?),
        };
        let objects = ObjectStore::new(config.objects_dir());
        Ok(Self::new(storage, objects, config))
    }

    /// The user every dashboard request acts as.
    pub fn user_id(&self) -> &str {
        &self.config.demo_user_id
    }

    /// Create the demo user unless it already exists.
    pub async fn ensure_demo_user(&self) -> Result<User, ApiError> {
        let id = self.user_id();
        if let Some(user) = self.storage.get_user(id).await? {
            return Ok(user);
        }

        let user = self
            .storage
            .create_user_with_id(
                id,
                NewUser {
                    username: "demo".to_string(),
                    email: "demo@idshield.local".to_string(),
                    full_name: "Demo User".to_string(),
                    phone: None,
                    location: None,
                    bio: None,
                    profile_picture: None,
                    did_address: format!("did:midnight:{id}"),
                    wallet_connected: false,
                    user_type: UserType::Citizen,
                    privacy_level: PrivacyLevel::DEFAULT_USER,
                },
            )
            .await?;
        tracing::info!(user_id = %user.id, "seeded demo user");
        Ok(user)
    }

    /// Append one entry to `user_id`'s audit trail.
    pub async fn audit(
        &self,
        user_id: &str,
        action: AuditAction,
        description: String,
        entity_name: Option<String>,
        privacy_level: Option<PrivacyLevel>,
    ) -> Result<(), ApiError> {
        self.storage
            .create_audit_log(NewAuditLog {
                user_id: user_id.to_string(),
                action,
                description,
                entity_name,
                privacy_level,
            })
            .await?;
        Ok(())
    }
}
