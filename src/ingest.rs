//! Ingestor: connector walk → convert → canonicalize → chunk → link.
//!
//! A sync never aborts on a single file's failure; every file gets a
//! `FileOutcome` and the run keeps going. `runUpdateCmd`/`gitPull`
//! default to skipped here — they're opt-in for human-triggered syncs,
//! never run implicitly from a background job or tool call.

use crate::config::CollectionConfig;
use crate::convert::{ConvertInput, ConverterRegistry};
use crate::error::{ErrorKind, Result};
use crate::models::{CollectionSyncResult, Document, FileOutcome, FileSyncResult};
use crate::store::Store;
use crate::uri;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Instant;
use walkdir::WalkDir;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct IngestOptions {
    /// Gated to human-triggered syncs; the Ingestor never flips this on
    /// by itself.
    pub run_update_cmd: bool,
    pub max_bytes: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { run_update_cmd: false, max_bytes: 10 * 1024 * 1024 }
    }
}

fn derive_docid(collection: &str, rel_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update(b"\0");
    hasher.update(rel_path.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| {
            crate::error::EngineError::invalid_input(format!("invalid glob '{pattern}': {e}"))
        })?);
    }
    builder.build().map_err(|e| crate::error::EngineError::invalid_input(format!("glob set error: {e}")))
}

/// Normalizes line endings to `\n`, strips trailing whitespace from
/// every line, and trims trailing blank lines. Canonicalization never
/// runs inside a Converter — it is the Ingestor's own pass over every
/// converter's output, so all documents compare equal under the same
/// content regardless of source format.
fn canonicalize(markdown: &str) -> String {
    let unified = markdown.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.lines().map(|l| l.trim_end()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn run_update_commands(collection: &CollectionConfig) {
    if collection.git_pull {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(&collection.root)
            .arg("pull")
            .arg("--ff-only")
            .status();
        if let Err(e) = status {
            tracing::warn!(collection = %collection.name, error = %e, "git pull failed, continuing with working tree as-is");
        }
    }
    if let Some(cmd) = &collection.update_cmd {
        let status = std::process::Command::new("sh").arg("-c").arg(cmd).current_dir(&collection.root).status();
        if let Err(e) = status {
            tracing::warn!(collection = %collection.name, error = %e, "update_cmd failed, continuing with working tree as-is");
        }
    }
}

fn guess_mime(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

struct WalkedFile {
    abs_path: std::path::PathBuf,
    rel_path: String,
}

fn enumerate_files(collection: &CollectionConfig) -> Result<Vec<WalkedFile>> {
    if !collection.root.exists() {
        return Err(crate::error::EngineError::invalid_input(format!(
            "collection '{}' root does not exist: {}",
            collection.name,
            collection.root.display()
        )));
    }

    let include_set = build_globset(&collection.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(collection.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&collection.root).follow_links(collection.follow_symlinks) {
        let entry = entry.map_err(|e| crate::error::EngineError::runtime(format!("walk error: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let abs_path = entry.path().to_path_buf();
        let relative = abs_path.strip_prefix(&collection.root).unwrap_or(&abs_path);
        let rel_path = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_path) || !include_set.is_match(&rel_path) {
            continue;
        }
        files.push(WalkedFile { abs_path, rel_path });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Ingests every file the collection's globs select, producing a
/// per-file outcome that never aborts the run. Runs on the full
/// configured set; callers that want a single relative path (Capture)
/// use `sync_one_path`.
pub async fn sync_collection(
    store: &Store,
    registry: &ConverterRegistry,
    collection: &CollectionConfig,
    max_tokens: usize,
    opts: &IngestOptions,
) -> Result<CollectionSyncResult> {
    let started = Instant::now();
    if opts.run_update_cmd {
        run_update_commands(collection);
    }

    let files = enumerate_files(collection)?;
    let normalized_collection = uri::normalize_collection(&collection.name);
    let mut result = CollectionSyncResult { collection: normalized_collection.clone(), ..Default::default() };

    for file in files {
        match ingest_one_file(store, registry, &normalized_collection, &file.rel_path, &file.abs_path, max_tokens, opts.max_bytes)
            .await
        {
            Ok(outcome) => {
                match outcome {
                    FileOutcome::Added => result.added += 1,
                    FileOutcome::Updated => result.updated += 1,
                    FileOutcome::Skipped => result.skipped += 1,
                    FileOutcome::Error => result.errors += 1,
                }
                result.files.push(FileSyncResult {
                    rel_path: file.rel_path,
                    outcome,
                    error_code: None,
                    error_message: None,
                });
            }
            Err(e) => {
                result.errors += 1;
                result.files.push(FileSyncResult {
                    rel_path: file.rel_path,
                    outcome: FileOutcome::Error,
                    error_code: Some(e.kind().code().to_string()),
                    error_message: Some(e.to_string()),
                });
            }
        }
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    Ok(result)
}

/// Ingests exactly one relative path within a collection, bypassing the
/// walk — the shape Capture needs after it has already written the
/// file itself.
pub async fn sync_one_path(
    store: &Store,
    registry: &ConverterRegistry,
    collection: &CollectionConfig,
    rel_path: &str,
    max_tokens: usize,
    max_bytes: usize,
) -> Result<FileSyncResult> {
    let normalized_collection = uri::normalize_collection(&collection.name);
    let abs_path = collection.root.join(rel_path);
    let outcome = ingest_one_file(store, registry, &normalized_collection, rel_path, &abs_path, max_tokens, max_bytes).await;
    match outcome {
        Ok(outcome) => {
            Ok(FileSyncResult { rel_path: rel_path.to_string(), outcome, error_code: None, error_message: None })
        }
        Err(e) => Ok(FileSyncResult {
            rel_path: rel_path.to_string(),
            outcome: FileOutcome::Error,
            error_code: Some(e.kind().code().to_string()),
            error_message: Some(e.to_string()),
        }),
    }
}

async fn ingest_one_file(
    store: &Store,
    registry: &ConverterRegistry,
    collection: &str,
    rel_path: &str,
    abs_path: &Path,
    max_tokens: usize,
    max_bytes: usize,
) -> Result<FileOutcome> {
    uri::validate_rel_path(rel_path)?;

    let bytes = tokio::fs::read(abs_path).await?;
    let source_hash = {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    };

    let existing = store.get_document(collection, rel_path).await?;
    if let Some(existing) = &existing {
        if existing.source_hash == source_hash {
            return Ok(FileOutcome::Skipped);
        }
    }

    let ext = abs_path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
    let mime = guess_mime(&ext);
    let converter = registry
        .find(mime, &ext)
        .ok_or_else(|| crate::error::EngineError::new(ErrorKind::IngestError, format!("no converter for {rel_path}")))?;

    let input = ConvertInput { bytes: &bytes, relative_path: rel_path, max_bytes };
    let converted = converter.convert(&input)?;

    let canonical = canonicalize(&converted.markdown);
    let mirror_hash = store.put_content(&canonical).await?;

    let chunks = crate::chunk::chunk_text(&mirror_hash, &canonical, max_tokens);
    store.replace_chunks_for_mirror(&mirror_hash, &chunks).await?;

    let docid = derive_docid(collection, rel_path);
    let uri_str = uri::build_uri(collection, rel_path);
    let now = chrono::Utc::now().timestamp();
    let mtime = tokio::fs::metadata(abs_path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(now);

    let doc = Document {
        docid: docid.clone(),
        uri: uri_str,
        collection: collection.to_string(),
        rel_path: rel_path.to_string(),
        title: converted.title,
        language_hint: None,
        source_mime: converted.meta.source_mime,
        source_ext: if ext.is_empty() { None } else { Some(ext) },
        source_hash,
        source_size: bytes.len() as i64,
        source_mtime: mtime,
        mirror_hash: Some(mirror_hash),
        converter_id: Some(converted.meta.converter_id),
        converter_version: Some(converted.meta.converter_version),
        active: true,
        created_at: existing.as_ref().map(|d| d.created_at).unwrap_or(now),
        updated_at: now,
    };
    store.upsert_document(&doc).await?;

    let original_source = String::from_utf8_lossy(&bytes).into_owned();
    let links = crate::links::parse_links(&docid, &original_source, rel_path, collection);
    store.replace_links_for_doc(&docid, &links).await?;

    Ok(if existing.is_some() { FileOutcome::Updated } else { FileOutcome::Added })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use crate::store::tests::test_store;
    use tempfile::TempDir;

    fn collection(root: &Path, name: &str) -> CollectionConfig {
        CollectionConfig {
            name: name.to_string(),
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
            update_cmd: None,
            git_pull: false,
        }
    }

    #[test]
    fn canonicalize_normalizes_line_endings_and_trims() {
        let out = canonicalize("line one  \r\nline two\r\n\n\n");
        assert_eq!(out, "line one\nline two\n");
    }

    #[tokio::test]
    async fn sync_adds_then_updates_then_skips_unchanged() {
        let (store, _dir) = test_store().await;
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.md"), "# A\n\nhello").unwrap();
        let coll = collection(root.path(), "Notes");
        let registry = ConverterRegistry::with_builtins();

        let first = sync_collection(&store, &registry, &coll, 700, &IngestOptions::default()).await.unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.files[0].outcome, FileOutcome::Added);

        let again = sync_collection(&store, &registry, &coll, 700, &IngestOptions::default()).await.unwrap();
        assert_eq!(again.skipped, 1);

        std::fs::write(root.path().join("a.md"), "# A\n\ngoodbye").unwrap();
        let updated = sync_collection(&store, &registry, &coll, 700, &IngestOptions::default()).await.unwrap();
        assert_eq!(updated.updated, 1);
    }

    #[tokio::test]
    async fn path_traversal_via_symlink_target_is_rejected_by_guard() {
        let (store, _dir) = test_store().await;
        let root = TempDir::new().unwrap();
        let coll = collection(root.path(), "notes");
        let registry = ConverterRegistry::with_builtins();
        let result = sync_one_path(&store, &registry, &coll, "../escape.md", 700, 1024).await.unwrap();
        assert_eq!(result.outcome, FileOutcome::Error);
        assert_eq!(result.error_code.as_deref(), Some("INVALID_PATH"));
    }

    #[tokio::test]
    async fn missing_root_is_reported_as_invalid_input() {
        let (store, _dir) = test_store().await;
        let coll = collection(Path::new("/nonexistent/definitely/not/here"), "notes");
        let registry = ConverterRegistry::with_builtins();
        let err = sync_collection(&store, &registry, &coll, 700, &IngestOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
