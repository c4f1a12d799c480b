//! Image blob storage.
//!
//! Blobs live at `{ownerId}/{base64url(uuid@filename)}`; clients only ever
//! see the public key, which is the base64url form of that path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use std::{collections::HashMap, io::ErrorKind, path::PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` for `owner` and return the blob path.
    async fn put(&self, owner: Uuid, filename: &str, bytes: Vec<u8>) -> Result<String>;
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    /// Returns `false` when nothing was stored at `path`.
    async fn delete(&self, path: &str) -> Result<bool>;
}

/// Fresh blob path for an upload.
#[must_use]
pub fn blob_path(owner: Uuid, filename: &str) -> String {
    let name = URL_SAFE_NO_PAD.encode(format!("{}@{filename}", Uuid::new_v4()));
    format!("{owner}/{name}")
}

#[must_use]
pub fn encode_key(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path)
}

/// Decode a public key back into a blob path.
///
/// Only paths of the shape produced by [`blob_path`] are accepted, so a key
/// can never address anything outside the owner directories.
#[must_use]
pub fn decode_key(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key.trim()).ok()?;
    let path = String::from_utf8(bytes).ok()?;
    let (owner, name) = path.split_once('/')?;
    Uuid::parse_str(owner).ok()?;
    if name.is_empty()
        || !name
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
    {
        return None;
    }
    Some(path)
}

/// Account that uploaded the blob at `path`.
#[must_use]
pub fn owner_of(path: &str) -> Option<Uuid> {
    let (owner, _) = path.split_once('/')?;
    Uuid::parse_str(owner).ok()
}

/// Original file name embedded in a blob path.
#[must_use]
pub fn file_name_of(path: &str) -> Option<String> {
    let (_, name) = path.split_once('/')?;
    let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(name).ok()?).ok()?;
    decoded
        .split_once('@')
        .map(|(_, filename)| filename.to_string())
}

/// Lowercased extension of `filename`, if any.
#[must_use]
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .filter(|extension| !extension.is_empty())
}

#[must_use]
pub fn content_type_for(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Filesystem-backed blobs rooted at the configured media directory.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .fold(self.root.clone(), |resolved, segment| resolved.join(segment))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, owner: Uuid, filename: &str, bytes: Vec<u8>) -> Result<String> {
        let path = blob_path(owner, filename);
        let target = self.resolve(&path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        debug!("stored blob {path}");
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read blob {path}")),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete blob {path}")),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, owner: Uuid, filename: &str, bytes: Vec<u8>) -> Result<String> {
        let path = blob_path(owner, filename);
        self.blobs.lock().await.insert(path.clone(), bytes);
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.remove(path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_decode_to_owner_scoped_paths() {
        let owner = Uuid::new_v4();
        let path = blob_path(owner, "diagram.png");
        assert!(path.starts_with(&owner.to_string()));
        assert_eq!(decode_key(&encode_key(&path)).as_deref(), Some(path.as_str()));
        assert_eq!(file_name_of(&path).as_deref(), Some("diagram.png"));
        assert_eq!(owner_of(&path), Some(owner));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert_eq!(decode_key(&encode_key("../../etc/passwd")), None);
        let owner = Uuid::new_v4();
        assert_eq!(decode_key(&encode_key(&format!("{owner}/../secret"))), None);
        assert_eq!(decode_key("%%%"), None);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a"), "application/octet-stream");
        assert_eq!(extension_of("archive.tar.GZ").as_deref(), Some("gz"));
    }

    #[tokio::test]
    async fn local_store_round_trips_and_deletes() -> Result<()> {
        let root = std::env::temp_dir().join(format!("eduresolve-blobs-{}", Uuid::new_v4()));
        let store = LocalBlobStore::new(&root);
        let path = store.put(Uuid::new_v4(), "a.png", vec![1, 2, 3]).await?;

        assert_eq!(store.get(&path).await?, Some(vec![1, 2, 3]));
        assert!(store.delete(&path).await?);
        assert!(!store.delete(&path).await?);
        assert_eq!(store.get(&path).await?, None);

        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }
}
