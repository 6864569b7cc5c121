//! Capture: the quick-note write path.
//!
//! Resolves a safe relative path (from an explicit path, a title, or
//! the first Markdown heading, falling back to a timestamp), writes the
//! file atomically under the FileLock, then funnels it through the
//! Ingestor exactly like any other sync — Capture never duplicates the
//! Ingestor's chunk/link logic.

use crate::config::CollectionConfig;
use crate::convert::ConverterRegistry;
use crate::error::{EngineError, Result};
use crate::ingest;
use crate::lock::FileLock;
use crate::store::Store;
use crate::uri;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub struct CaptureRequest {
    pub collection: String,
    pub title: Option<String>,
    pub content: String,
    /// Explicit relative path, bypassing slug derivation. Still passes
    /// through the path guard and the `.md` extension enforcement.
    pub rel_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub docid: String,
    pub uri: String,
    pub abs_path: PathBuf,
    pub created: bool,
    pub overwritten: bool,
}

fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_dash = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn first_heading(content: &str) -> Option<String> {
    content.lines().find_map(|line| line.trim_start().strip_prefix("# ").map(|t| t.trim().to_string()))
}

fn derive_rel_path(title: Option<&str>, content: &str) -> String {
    let basis = title.map(|t| t.to_string()).or_else(|| first_heading(content));
    let slug = basis.as_deref().map(slugify).filter(|s| !s.is_empty());
    match slug {
        Some(slug) => format!("{slug}.md"),
        None => format!("capture-{}.md", Uuid::new_v4()),
    }
}

fn ensure_md_extension(rel_path: &str) -> String {
    if rel_path.to_lowercase().ends_with(".md") {
        rel_path.to_string()
    } else {
        format!("{rel_path}.md")
    }
}

fn find_collection<'a>(collections: &'a [CollectionConfig], name: &str) -> Result<&'a CollectionConfig> {
    let normalized = uri::normalize_collection(name);
    collections
        .iter()
        .find(|c| uri::normalize_collection(&c.name) == normalized)
        .ok_or_else(|| EngineError::not_found(format!("no such collection: {name}")))
}

/// Writes `req.content` into `req.collection`, acquiring the FileLock
/// for the duration of the write-then-ingest, and returns the resulting
/// document's identity.
#[allow(clippy::too_many_arguments)]
pub async fn capture(
    store: &Store,
    lock: &FileLock,
    registry: &ConverterRegistry,
    collections: &[CollectionConfig],
    max_tokens: usize,
    max_bytes: usize,
    lock_timeout: Duration,
    req: CaptureRequest,
) -> Result<CaptureOutcome> {
    let collection = find_collection(collections, &req.collection)?;

    let rel_path = match &req.rel_path {
        Some(p) => ensure_md_extension(p),
        None => derive_rel_path(req.title.as_deref(), &req.content),
    };
    uri::validate_rel_path(&rel_path)?;

    let _guard = lock.acquire("capture", lock_timeout)?;

    let abs_path = collection.root.join(&rel_path);
    let overwritten = tokio::fs::try_exists(&abs_path).await.unwrap_or(false);

    if let Some(parent) = abs_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = abs_path.with_extension(format!("tmp.{}", Uuid::new_v4()));
    tokio::fs::write(&tmp_path, req.content.as_bytes()).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &abs_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(EngineError::with_source(crate::error::ErrorKind::Runtime, "failed to finalize capture write", e.into()));
    }

    ingest::sync_one_path(store, registry, collection, &rel_path, max_tokens, max_bytes).await?;

    let normalized_collection = uri::normalize_collection(&collection.name);
    let doc = store
        .get_document(&normalized_collection, &rel_path)
        .await?
        .ok_or_else(|| EngineError::runtime("capture ingest did not produce a document row"))?;

    Ok(CaptureOutcome {
        docid: doc.docid,
        uri: doc.uri,
        abs_path,
        created: !overwritten,
        overwritten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_store;
    use tempfile::TempDir;

    fn collection(root: &std::path::Path) -> CollectionConfig {
        CollectionConfig {
            name: "Notes".to_string(),
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
            update_cmd: None,
            git_pull: false,
        }
    }

    #[test]
    fn slug_derives_from_title_and_falls_back_to_uuid() {
        assert_eq!(derive_rel_path(Some("Hello, World!"), ""), "hello-world.md");
        assert_eq!(derive_rel_path(None, "# First Heading\n\nbody"), "first-heading.md");
        assert!(derive_rel_path(None, "no heading here").starts_with("capture-"));
    }

    #[test]
    fn md_extension_is_enforced() {
        assert_eq!(ensure_md_extension("notes/today"), "notes/today.md");
        assert_eq!(ensure_md_extension("notes/today.md"), "notes/today.md");
    }

    #[tokio::test]
    async fn capture_writes_file_and_ingests_it() {
        let (store, dir) = test_store().await;
        let root = TempDir::new().unwrap();
        let collections = vec![collection(root.path())];
        let registry = ConverterRegistry::with_builtins();
        let lock = FileLock::new(dir.path().join("lock"));

        let req = CaptureRequest {
            collection: "notes".to_string(),
            title: Some("My Note".to_string()),
            content: "# My Note\n\nhello there".to_string(),
            rel_path: None,
        };
        let outcome =
            capture(&store, &lock, &registry, &collections, 700, 1024 * 1024, Duration::from_secs(1), req)
                .await
                .unwrap();
        assert!(outcome.created);
        assert!(!outcome.overwritten);
        assert!(outcome.abs_path.ends_with("my-note.md"));

        let on_disk = std::fs::read_to_string(&outcome.abs_path).unwrap();
        assert!(on_disk.contains("hello there"));

        let doc = store.get_document_by_docid(&outcome.docid).await.unwrap().unwrap();
        assert_eq!(doc.rel_path, "my-note.md");
    }

    #[tokio::test]
    async fn rejects_path_traversal_in_explicit_rel_path() {
        let (store, dir) = test_store().await;
        let root = TempDir::new().unwrap();
        let collections = vec![collection(root.path())];
        let registry = ConverterRegistry::with_builtins();
        let lock = FileLock::new(dir.path().join("lock"));

        let req = CaptureRequest {
            collection: "notes".to_string(),
            title: None,
            content: "x".to_string(),
            rel_path: Some("../escape".to_string()),
        };
        let err = capture(&store, &lock, &registry, &collections, 700, 1024, Duration::from_secs(1), req)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPath);
    }
}
