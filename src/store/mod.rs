//! Durable state, transactional mutation, content blobs, vector index.
//!
//! `Store` is the single owner of every persisted row described in the
//! data model: every other component holds read-only or write-through
//! references mediated through these methods. Blob data lives on disk,
//! content-addressed by `mirrorHash`; everything else lives in SQLite.

mod chunks;
mod documents;
mod graph;
mod jobs;
mod links;
mod tags;
mod vectors;

pub use chunks::*;
pub use documents::*;
pub use graph::*;
pub use jobs::*;
pub use links::*;
pub use tags::*;
pub use vectors::*;

use crate::error::{EngineError, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    blobs_dir: PathBuf,
}

impl Store {
    pub fn new(pool: SqlitePool, blobs_dir: PathBuf) -> Self {
        Self { pool, blobs_dir }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reports whether a vector index backend is usable. Brute-force
    /// cosine search over `chunk_vectors` is always available once the
    /// schema is migrated, so this degrades only when the table itself
    /// is missing (a corrupt or pre-migration database).
    pub async fn vector_search_available(&self) -> bool {
        sqlx::query_scalar::<_, bool>(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunk_vectors'",
        )
        .fetch_one(&self.pool)
        .await
        .unwrap_or(false)
    }

    fn blob_path(&self, mirror_hash: &str) -> PathBuf {
        let (prefix, rest) = mirror_hash.split_at(2.min(mirror_hash.len()));
        self.blobs_dir.join(prefix).join(rest)
    }

    /// Returns the canonical Markdown bytes for a `mirrorHash`, or
    /// `None` if no blob with that hash has been written.
    pub async fn get_content(&self, mirror_hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(mirror_hash);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a content-addressed blob if it doesn't already exist.
    /// Write-temp-then-rename keeps concurrent readers from observing a
    /// partial write; equal hashes always imply equal bytes, so a
    /// pre-existing blob is never rewritten.
    pub async fn put_content(&self, canonical_markdown: &str) -> Result<String> {
        let mirror_hash = hash_bytes(canonical_markdown.as_bytes());
        let path = self.blob_path(&mirror_hash);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(mirror_hash);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.blobs_dir.join(format!(".tmp.{}", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, canonical_markdown.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(EngineError::with_source(
                crate::error::ErrorKind::Runtime,
                "failed to finalize content blob write",
                e.into(),
            ));
        }

        Ok(mirror_hash)
    }

    pub fn blobs_dir(&self) -> &Path {
        &self.blobs_dir
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::migrate::run_migrations_on;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    pub async fn test_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await.unwrap();
        run_migrations_on(&pool).await.unwrap();
        let blobs_dir = dir.path().join("blobs");
        (Store::new(pool, blobs_dir), dir)
    }

    #[tokio::test]
    async fn blob_write_is_content_addressed() {
        let (store, _dir) = test_store().await;
        let h1 = store.put_content("# Hello\n\nworld").await.unwrap();
        let h2 = store.put_content("# Hello\n\nworld").await.unwrap();
        assert_eq!(h1, h2);
        let content = store.get_content(&h1).await.unwrap().unwrap();
        assert_eq!(content, b"# Hello\n\nworld");
    }

    #[tokio::test]
    async fn missing_blob_returns_none() {
        let (store, _dir) = test_store().await;
        assert!(store.get_content("deadbeef").await.unwrap().is_none());
    }
}
