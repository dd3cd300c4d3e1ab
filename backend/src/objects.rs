//! Local blob store for uploaded vault documents.
//!
//! Objects are addressed by URL paths of the form `/objects/uploads/<uuid>` and live under
//! `<data_dir>/objects/uploads/<uuid>` on disk. Only that shape is accepted, so a path can never
//! escape the store root.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub const URL_PREFIX: &str = "/objects/";
const UPLOADS: &str = "uploads";

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("object not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A fresh upload URL. Nothing is written until the client PUTs to it.
    pub fn new_upload_url(&self) -> String {
        format!("{URL_PREFIX}{UPLOADS}/{}", Uuid::new_v4())
    }

    pub async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, ObjectError> {
        let id = parse_path(path)?;
        let dir = self.root.join(UPLOADS);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(id.to_string()), bytes).await?;
        Ok(format!("{URL_PREFIX}{UPLOADS}/{id}"))
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>, ObjectError> {
        let id = parse_path(path)?;
        match tokio::fs::read(self.root.join(UPLOADS).join(id.to_string())).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ObjectError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

/// Accepts `uploads/<uuid>` with or without the `/objects/` URL prefix.
fn parse_path(path: &str) -> Result<Uuid, ObjectError> {
    let rel = path.strip_prefix(URL_PREFIX).unwrap_or(path).trim_start_matches('/');
    rel.strip_prefix(UPLOADS)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| ObjectError::InvalidPath(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> ObjectStore {
        ObjectStore::new(std::env::temp_dir().join(format!("idshield-objects-{}", Uuid::new_v4())))
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = temp_store();
        let url = store.new_upload_url();
        assert!(url.starts_with("/objects/uploads/"));

        let stored = store.put(&url, b"scan").await.unwrap();
        assert_eq!(stored, url);
        assert_eq!(store.get(&url).await.unwrap(), b"scan");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = temp_store();
        let url = store.new_upload_url();
        assert!(matches!(store.get(&url).await, Err(ObjectError::NotFound)));
    }

    #[test]
    fn rejects_paths_outside_uploads() {
        for bad in ["../etc/passwd", "uploads/../../x", "/objects/other/1", "uploads/not-a-uuid", ""] {
            assert!(matches!(parse_path(bad), Err(ObjectError::InvalidPath(_))), "{bad}");
        }
        let id = Uuid::new_v4();
        assert_eq!(parse_path(&format!("uploads/{id}")).unwrap(), id);
        assert_eq!(parse_path(&format!("/objects/uploads/{id}")).unwrap(), id);
    }
}
