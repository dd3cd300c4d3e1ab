use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local maps; state is lost on restart.
    Memory,
    /// SQLite file under the data directory.
    Sqlite,
}

/// Runtime settings, read once from the environment at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub addr: String,
    pub data_dir: PathBuf,
    pub storage: StorageBackend,
    /// The user every dashboard request acts as.
    pub demo_user_id: String,
    pub seed_demo_user: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("data"),
            storage: StorageBackend::Memory,
            demo_user_id: "demo-user-123".to_string(),
            seed_demo_user: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let storage = match lookup("STORAGE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StorageBackend::Memory,
            Some("sqlite") => StorageBackend::Sqlite,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_BACKEND",
                    reason: format!("expected 'memory' or 'sqlite', got '{other}'"),
                });
            }
        };

        let seed_demo_user = match lookup("SEED_DEMO_USER").as_deref().map(str::trim) {
            None | Some("") => defaults.seed_demo_user,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SEED_DEMO_USER",
                    reason: format!("expected a boolean, got '{other}'"),
                });
            }
        };

        let demo_user_id = lookup("DEMO_USER_ID").unwrap_or(defaults.demo_user_id);
        if demo_user_id.trim().is_empty() {
            return Err(ConfigError::Invalid { var: "DEMO_USER_ID", reason: "must not be empty".to_string() });
        }

        Ok(Self {
            addr: lookup("BACKEND_ADDR").unwrap_or(defaults.addr),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            storage,
            demo_user_id,
            seed_demo_user,
        })
    }

    pub fn sqlite_url(&self) -> String {
        format!("sqlite:{}", self.data_dir.join("vault.sqlite").to_string_lossy())
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }
}
