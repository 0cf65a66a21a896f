//! C3 Blob Store Gateway.
//!
//! Namespaced paths of the form `{user_or_anon}/{project_or_upload}/{run_id}/...`
//! (spec §4.3). Implemented against a local filesystem root for the sample
//! `indexer` binary and for tests; production deployments point
//! [`FilesystemBlobStore`]'s root at a mounted object-store volume or swap
//! in another `BlobStore` implementation — the trait is the contract, not
//! any one backend.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
    /// A time-limited URL a client can use to fetch `path` directly,
    /// expiring after `ttl_seconds`.
    async fn signed_url(&self, path: &str, ttl_seconds: u64) -> Result<String>;
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// Builds the namespaced path convention used across the pipeline: a
/// deterministic path so retried writes are safe (spec §4.3 "at-least-once
/// write; the caller must generate deterministic paths").
pub fn namespaced_path(owner: &str, project_or_upload: &str, run_id: &str, rest: &str) -> String {
    format!("{owner}/{project_or_upload}/{run_id}/{rest}")
}

pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&full).await?;
        file.write_all(bytes).await?;
        debug!(path, bytes = bytes.len(), "blob written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)).await?)
    }

    async fn signed_url(&self, path: &str, ttl_seconds: u64) -> Result<String> {
        // No real signing backend locally; encode the expiry so tests can
        // assert on it without needing an HTTP server.
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
        Ok(format!(
            "file://{}?expires={}",
            self.resolve(path).display(),
            expires_at.timestamp()
        ))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let dir = self.resolve(prefix);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// In-memory store used by unit tests across the crate that only need blob
/// semantics, not a real filesystem.
pub struct InMemoryBlobStore {
    objects: tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| crate::error::ConstructionRagError::NotFound(path.to_string()))
    }

    async fn signed_url(&self, path: &str, _ttl_seconds: u64) -> Result<String> {
        Ok(format!("memory://{path}"))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.objects.write().await.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_namespaced_path() {
        let path = namespaced_path("user-1", "project-9", "run-42", "source.pdf");
        assert_eq!(path, "user-1/project-9/run-42/source.pdf");
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryBlobStore::new();
        store.put("a/b.bin", b"hello").await.unwrap();
        assert_eq!(store.get("a/b.bin").await.unwrap(), b"hello");
        store.delete_prefix("a/").await.unwrap();
        assert!(store.get("a/b.bin").await.is_err());
    }

    #[tokio::test]
    async fn filesystem_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.put("x/y.bin", b"payload").await.unwrap();
        assert_eq!(store.get("x/y.bin").await.unwrap(), b"payload");
    }
}
