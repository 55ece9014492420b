use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// A bucket of immutable objects addressed by slash-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a new object. Existing objects are never overwritten.
    async fn upload(&self, path: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// URL under which the object can be fetched without credentials.
    fn public_url(&self, path: &str) -> String;
}

/// Reject anything that is not a plain relative key.
fn checked_key(path: &str) -> Result<PathBuf, StorageError> {
    let rel = Path::new(path);
    let plain = !path.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(rel.to_path_buf())
}

// ── Local directory ─────────────────────────────────────────────────────

/// Filesystem-backed bucket: each object is a file at `{dir}/{key}`.
pub struct LocalStore {
    dir: PathBuf,
    public_base: String,
}

impl LocalStore {
    pub async fn new(dir: PathBuf, public_base: impl Into<String>) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir).await?;
        info!("Image storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path on disk for an object key.
    pub fn file_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.dir.join(checked_key(path)?))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(&self, path: &str, data: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let file_path = self.file_path(path)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!("Refusing to overwrite {}", path);
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data).await?;
        file.flush().await?;

        info!("Stored {} ({} bytes)", path, data.len());
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), path)
    }
}

// ── Hosted storage API ──────────────────────────────────────────────────

/// Bucket on the hosted backend's storage API.
pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            bucket: bucket.into(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(&self, path: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        checked_key(path)?;

        let resp = self
            .client
            .post(self.object_url(path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!("Storage upload of {} failed: {} {}", path, status, message);
            if status == reqwest::StatusCode::CONFLICT {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}
