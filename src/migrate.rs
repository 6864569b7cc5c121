//! Database schema migrations.
//!
//! Creates all required tables (collections, documents, chunks,
//! chunks_fts, chunk_vectors, links, tags, jobs) and ensures idempotent
//! execution. Run via `ken init`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            root TEXT NOT NULL,
            include_globs TEXT NOT NULL DEFAULT '[]',
            exclude_globs TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            docid TEXT PRIMARY KEY,
            uri TEXT NOT NULL UNIQUE,
            collection TEXT NOT NULL,
            rel_path TEXT NOT NULL,
            title TEXT,
            language_hint TEXT,
            source_mime TEXT NOT NULL,
            source_ext TEXT,
            source_hash TEXT NOT NULL,
            source_size INTEGER NOT NULL,
            source_mtime INTEGER NOT NULL,
            mirror_hash TEXT,
            converter_id TEXT,
            converter_version TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // (collection, relPath) is unique only among active rows: a soft-deleted
    // document must not block a fresh one from taking its slot.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_active_path
        ON documents(collection, rel_path) WHERE active = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_mirror_hash ON documents(mirror_hash)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            mirror_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            PRIMARY KEY (mirror_hash, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let fts_exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'")
            .fetch_one(pool)
            .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                mirror_hash UNINDEXED,
                seq UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            mirror_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (mirror_hash, seq, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_docid TEXT NOT NULL,
            link_type TEXT NOT NULL,
            target_ref TEXT NOT NULL,
            target_ref_norm TEXT NOT NULL,
            target_collection TEXT,
            target_anchor TEXT,
            link_text TEXT,
            start_line INTEGER NOT NULL,
            start_col INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_col INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_docid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_target_norm ON links(target_ref_norm)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            docid TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (docid, tag)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            result TEXT,
            error TEXT,
            server_instance_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    Ok(())
}
