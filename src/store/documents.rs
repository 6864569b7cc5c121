use super::Store;
use crate::error::{EngineError, Result};
use crate::models::Document;
use sqlx::Row;

pub struct DocumentFilter {
    pub collection: Option<String>,
    pub active_only: bool,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self {
            collection: None,
            active_only: true,
        }
    }
}

pub(super) fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        docid: row.get("docid"),
        uri: row.get("uri"),
        collection: row.get("collection"),
        rel_path: row.get("rel_path"),
        title: row.get("title"),
        language_hint: row.get("language_hint"),
        source_mime: row.get("source_mime"),
        source_ext: row.get("source_ext"),
        source_hash: row.get("source_hash"),
        source_size: row.get("source_size"),
        source_mtime: row.get("source_mtime"),
        mirror_hash: row.get("mirror_hash"),
        converter_id: row.get("converter_id"),
        converter_version: row.get("converter_version"),
        active: row.get::<i64, _>("active") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Store {
    pub async fn get_document(&self, collection: &str, rel_path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE collection = ? AND rel_path = ? AND active = 1",
        )
        .bind(collection)
        .bind(rel_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn get_document_by_docid(&self, docid: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE docid = ?")
            .bind(docid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn get_document_by_uri(&self, uri: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT * FROM documents WHERE 1=1");
        if filter.active_only {
            sql.push_str(" AND active = 1");
        }
        if filter.collection.is_some() {
            sql.push_str(" AND collection = ?");
        }
        sql.push_str(" ORDER BY collection, rel_path");

        let mut query = sqlx::query(&sql);
        if let Some(c) = &filter.collection {
            query = query.bind(c);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Inserts or updates a document row inside a transaction. When
    /// `mirrorHash` changes, prior chunk rows for the old hash are left
    /// in place: other documents may still reference that blob.
    pub async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (
                docid, uri, collection, rel_path, title, language_hint,
                source_mime, source_ext, source_hash, source_size, source_mtime,
                mirror_hash, converter_id, converter_version, active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(docid) DO UPDATE SET
                uri = excluded.uri,
                title = excluded.title,
                language_hint = excluded.language_hint,
                source_mime = excluded.source_mime,
                source_ext = excluded.source_ext,
                source_hash = excluded.source_hash,
                source_size = excluded.source_size,
                source_mtime = excluded.source_mtime,
                mirror_hash = excluded.mirror_hash,
                converter_id = excluded.converter_id,
                converter_version = excluded.converter_version,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.docid)
        .bind(&doc.uri)
        .bind(&doc.collection)
        .bind(&doc.rel_path)
        .bind(&doc.title)
        .bind(&doc.language_hint)
        .bind(&doc.source_mime)
        .bind(&doc.source_ext)
        .bind(&doc.source_hash)
        .bind(doc.source_size)
        .bind(doc.source_mtime)
        .bind(&doc.mirror_hash)
        .bind(&doc.converter_id)
        .bind(&doc.converter_version)
        .bind(doc.active as i64)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft-deletes a document: the row survives with `active=0` so
    /// indexed artifacts (chunks, links, vectors keyed by its old
    /// mirrorHash) remain queryable until an explicit prune.
    pub async fn deactivate_document(&self, docid: &str) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET active = 0 WHERE docid = ?")
            .bind(docid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found(format!("document not found: {docid}")));
        }
        Ok(())
    }

    /// Reconciles the configured set of collections against the
    /// registry: unseen collections are inserted, known ones updated in
    /// place, and collections no longer configured keep their row but
    /// have their documents soft-deleted rather than being dropped
    /// outright — pruning is an explicit separate operation.
    pub async fn sync_collections(&self, collections: &[crate::config::CollectionConfig]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let configured: Vec<String> = collections.iter().map(|c| crate::uri::normalize_collection(&c.name)).collect();

        for c in collections {
            let name = crate::uri::normalize_collection(&c.name);
            let include = serde_json::to_string(&c.include_globs).unwrap_or_else(|_| "[]".into());
            let exclude = serde_json::to_string(&c.exclude_globs).unwrap_or_else(|_| "[]".into());
            sqlx::query(
                r#"
                INSERT INTO collections (name, root, include_globs, exclude_globs, active)
                VALUES (?, ?, ?, ?, 1)
                ON CONFLICT(name) DO UPDATE SET
                    root = excluded.root,
                    include_globs = excluded.include_globs,
                    exclude_globs = excluded.exclude_globs,
                    active = 1
                "#,
            )
            .bind(&name)
            .bind(c.root.to_string_lossy().to_string())
            .bind(include)
            .bind(exclude)
            .execute(&mut *tx)
            .await?;
        }

        let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM collections WHERE active = 1")
            .fetch_all(&mut *tx)
            .await?;
        for name in existing {
            if !configured.contains(&name) {
                sqlx::query("UPDATE collections SET active = 0 WHERE name = ?")
                    .bind(&name)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE documents SET active = 0 WHERE collection = ?")
                    .bind(&name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Permanently removes a deactivated collection's documents and any
    /// chunks/links/vectors/tags keyed to them. This is the explicit
    /// prune operation left open by the retention-vs-pruning question.
    pub async fn prune_collection(&self, collection: &str) -> Result<u64> {
        let docids: Vec<String> = sqlx::query_scalar("SELECT docid FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        for docid in &docids {
            sqlx::query("DELETE FROM links WHERE source_docid = ?").bind(docid).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM tags WHERE docid = ?").bind(docid).execute(&mut *tx).await?;
        }
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ? AND active = 0")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
