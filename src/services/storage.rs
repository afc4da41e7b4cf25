//! Object storage for uploaded exam papers
//!
//! Objects are addressed by a relative key such as
//! `questions/0f1c..._1718000000000.png`. The local store maps keys onto
//! files below `storage.path`; the same tree is served read-only under the
//! configured public prefix.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

use crate::config::StorageConfig;

/// Result of a successful `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredObject>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    fn public_url(&self, key: &str) -> String;
}

/// Build a fresh key for an uploaded question image
pub fn question_object_key(extension: &str) -> String {
    format!(
        "questions/{}_{}.{}",
        Uuid::new_v4(),
        chrono::Utc::now().timestamp_millis(),
        extension
    )
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        bail!("Object key is empty");
    }
    if key.contains('\\') {
        bail!("Object key contains a backslash: {}", key);
    }
    let path = Path::new(key);
    if path.is_absolute() || key.starts_with('/') {
        bail!("Object key must be relative: {}", key);
    }
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("Object key contains an invalid path segment: {}", key);
    }
    Ok(())
}

pub struct LocalObjectStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let prefix: String = public_prefix.into();
        Self {
            root: root.into(),
            public_prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.path.clone(), config.public_prefix.clone())
    }

    pub fn boxed(self) -> Arc<dyn ObjectStore> {
        Arc::new(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredObject> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create storage directory {:?}", parent))?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write object {}", key))?;

        tracing::debug!("Stored object {} ({} bytes)", key, bytes.len());
        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key),
            size: bytes.len() as u64,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .with_context(|| format!("Failed to read object {}", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Object {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete object {}", key)),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_prefix, key)
    }
}
