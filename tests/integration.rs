//! End-to-end tests driving the library surface the way `ken` does:
//! build a `Config`, spin up an `EngineContext`, sync or capture, then
//! query the store and search modules directly.

use kengine::capture::{self, CaptureRequest};
use kengine::config::{ChunkingConfig, CollectionConfig, Config, DbConfig, EmbeddingConfig, LockingConfig, RetrievalConfig};
use kengine::context::EngineContext;
use kengine::error::ErrorKind;
use kengine::ingest::{self, IngestOptions};
use kengine::jobs::JobManager;
use kengine::models::JobType;
use kengine::search::{bm25, hybrid};
use std::time::Duration;
use tempfile::TempDir;

fn collection(name: &str, root: &std::path::Path) -> CollectionConfig {
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

fn test_config(dir: &std::path::Path, collections: Vec<CollectionConfig>) -> Config {
    Config {
        db: DbConfig { path: dir.join("ken.sqlite") },
        chunking: ChunkingConfig { max_tokens: 700, overlap_tokens: 0 },
        retrieval: RetrievalConfig {
            hybrid_alpha: 0.6,
            candidate_k_keyword: 80,
            candidate_k_vector: 80,
            final_limit: 12,
            min_score: 0.0,
        },
        embedding: EmbeddingConfig::default(),
        locking: LockingConfig { timeout_secs: 1, job_ttl_secs: 3600, job_cap: 100 },
        collections,
    }
}

// Scenario 1 — capture then retrieve.
#[tokio::test]
async fn capture_then_retrieve_via_bm25() {
    let db_dir = TempDir::new().unwrap();
    let notes_root = TempDir::new().unwrap();
    let cfg = test_config(db_dir.path(), vec![collection("notes", notes_root.path())]);
    let ctx = EngineContext::init(cfg).await.unwrap();

    let outcome = capture::capture(
        &ctx.store,
        &ctx.lock,
        &ctx.registry,
        &ctx.config.collections,
        ctx.config.chunking.max_tokens,
        10 * 1024 * 1024,
        ctx.lock_timeout(),
        CaptureRequest {
            collection: "notes".to_string(),
            title: Some("Hello".to_string()),
            content: "# Hello\n\nworld".to_string(),
            rel_path: None,
        },
    )
    .await
    .unwrap();

    assert!(outcome.created);
    assert!(outcome.uri.ends_with("hello.md"));

    let doc = ctx.store.get_document_by_docid(&outcome.docid).await.unwrap().unwrap();
    assert_eq!(doc.rel_path, "hello.md");
    assert_eq!(doc.title.as_deref(), Some("Hello"));

    let hits = bm25::search(&ctx.store, "world", &bm25::Bm25Options::default()).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uri, outcome.uri);
    assert!(hits[0].score > 0.0);

    ctx.shutdown().await;
}

// Scenario 2 — wiki link resolution, forward and backward.
#[tokio::test]
async fn wiki_link_resolves_forward_and_back() {
    let db_dir = TempDir::new().unwrap();
    let notes_root = TempDir::new().unwrap();
    std::fs::write(notes_root.path().join("a.md"), "# A\n\nsee [[B]] for details\n").unwrap();
    std::fs::write(notes_root.path().join("b.md"), "# B\n\nthe target document\n").unwrap();

    let cfg = test_config(db_dir.path(), vec![collection("notes", notes_root.path())]);
    let ctx = EngineContext::init(cfg).await.unwrap();

    let result = ingest::sync_collection(&ctx.store, &ctx.registry, &ctx.config.collections[0], 700, &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(result.added, 2);

    let doc_a = ctx.store.get_document("notes", "a.md").await.unwrap().unwrap();
    let doc_b = ctx.store.get_document("notes", "b.md").await.unwrap().unwrap();

    let links = ctx.store.get_links_for_doc(&doc_a.docid).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].target_ref, "B");

    let backlinks = ctx.store.get_backlinks_for_doc(&[links[0].target_ref_norm.clone()]).await.unwrap();
    assert_eq!(backlinks.len(), 1);
    assert_eq!(backlinks[0].source_docid, doc_a.docid);
    let _ = doc_b;

    ctx.shutdown().await;
}

// Scenario 3 — links inside fenced code blocks are excluded.
#[tokio::test]
async fn fenced_code_links_are_excluded() {
    let db_dir = TempDir::new().unwrap();
    let notes_root = TempDir::new().unwrap();
    std::fs::write(
        notes_root.path().join("c.md"),
        "# C\n\n```\n[[X]]\n```\n\nno real link here\n",
    )
    .unwrap();

    let cfg = test_config(db_dir.path(), vec![collection("notes", notes_root.path())]);
    let ctx = EngineContext::init(cfg).await.unwrap();

    ingest::sync_collection(&ctx.store, &ctx.registry, &ctx.config.collections[0], 700, &IngestOptions::default())
        .await
        .unwrap();

    let doc = ctx.store.get_document("notes", "c.md").await.unwrap().unwrap();
    let links = ctx.store.get_links_for_doc(&doc.docid).await.unwrap();
    assert!(links.is_empty());

    ctx.shutdown().await;
}

// Scenario 4 — path traversal is rejected before any write happens.
#[tokio::test]
async fn path_traversal_is_rejected() {
    let db_dir = TempDir::new().unwrap();
    let notes_root = TempDir::new().unwrap();
    let cfg = test_config(db_dir.path(), vec![collection("notes", notes_root.path())]);
    let ctx = EngineContext::init(cfg).await.unwrap();

    for bad_path in ["../evil.md", ".ssh/id"] {
        let err = capture::capture(
            &ctx.store,
            &ctx.lock,
            &ctx.registry,
            &ctx.config.collections,
            700,
            1024 * 1024,
            ctx.lock_timeout(),
            CaptureRequest {
                collection: "notes".to_string(),
                title: None,
                content: "x".to_string(),
                rel_path: Some(bad_path.to_string()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath, "path {bad_path} should be rejected");
    }

    ctx.shutdown().await;
}

// Scenario 5 — lock contention: two independent `JobManager`s (standing
// in for two engine processes) contend on the same lock file, and the
// second one's sync fails with `Locked` rather than silently queuing.
#[tokio::test]
async fn concurrent_jobs_across_instances_are_serialized_with_locked() {
    let db_dir = TempDir::new().unwrap();
    let cfg = test_config(db_dir.path(), vec![]);
    let pool = kengine::db::connect(&cfg).await.unwrap();
    kengine::migrate::run_migrations_on(&pool).await.unwrap();
    let store = kengine::store::Store::new(pool, db_dir.path().join("blobs"));

    let lock_path = db_dir.path().join("ken.lock");
    let mut impatient_locking = cfg.locking.clone();
    impatient_locking.timeout_secs = 0;

    let jobs_a = JobManager::new(store.clone(), lock_path.clone(), cfg.locking.clone());
    let jobs_b = JobManager::new(store, lock_path, impatient_locking);

    let _first = jobs_a
        .start_job(JobType::Sync, || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("done".to_string())
        })
        .await
        .unwrap();

    let err = jobs_b.start_job(JobType::Sync, || async { Ok("done".to_string()) }).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);

    jobs_a.shutdown().await;
}

// Scenario 6 — hybrid search degrades to bm25_only without a usable
// embedding port, and never errors.
#[tokio::test]
async fn hybrid_degrades_without_embedding_port() {
    let db_dir = TempDir::new().unwrap();
    let notes_root = TempDir::new().unwrap();
    std::fs::write(notes_root.path().join("d.md"), "# D\n\nsome searchable prose\n").unwrap();

    let cfg = test_config(db_dir.path(), vec![collection("notes", notes_root.path())]);
    let ctx = EngineContext::init(cfg).await.unwrap();

    ingest::sync_collection(&ctx.store, &ctx.registry, &ctx.config.collections[0], 700, &IngestOptions::default())
        .await
        .unwrap();

    let result = hybrid::search(&ctx.store, "searchable", None, None, None, &hybrid::HybridOptions::default())
        .await
        .unwrap();
    assert_eq!(result.meta.mode, "bm25_only");
    assert!(!result.meta.vectors_used);
    assert_eq!(result.hits.len(), 1);

    ctx.shutdown().await;
}

// Universal invariant — a second sync with no file changes is a no-op.
#[tokio::test]
async fn repeated_sync_with_no_changes_is_a_no_op() {
    let db_dir = TempDir::new().unwrap();
    let notes_root = TempDir::new().unwrap();
    std::fs::write(notes_root.path().join("e.md"), "# E\n\nstable content\n").unwrap();

    let cfg = test_config(db_dir.path(), vec![collection("notes", notes_root.path())]);
    let ctx = EngineContext::init(cfg).await.unwrap();

    let first = ingest::sync_collection(&ctx.store, &ctx.registry, &ctx.config.collections[0], 700, &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(first.added, 1);

    let second = ingest::sync_collection(&ctx.store, &ctx.registry, &ctx.config.collections[0], 700, &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);

    ctx.shutdown().await;
}
