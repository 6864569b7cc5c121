use super::Store;
use crate::error::Result;
use crate::models::{DocLink, LinkType};
use sqlx::Row;

fn row_to_link(row: &sqlx::sqlite::SqliteRow) -> DocLink {
    DocLink {
        source_docid: row.get("source_docid"),
        link_type: LinkType::parse(row.get::<String, _>("link_type").as_str()).unwrap_or(LinkType::Markdown),
        target_ref: row.get("target_ref"),
        target_ref_norm: row.get("target_ref_norm"),
        target_collection: row.get("target_collection"),
        target_anchor: row.get("target_anchor"),
        link_text: row.get("link_text"),
        start_line: row.get("start_line"),
        start_col: row.get("start_col"),
        end_line: row.get("end_line"),
        end_col: row.get("end_col"),
    }
}

impl Store {
    /// Fully replaces a document's outgoing links atomically; the
    /// reverse (backlink) index is simply a query over `source_docid`,
    /// so it stays consistent for free.
    pub async fn replace_links_for_doc(&self, docid: &str, links: &[DocLink]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM links WHERE source_docid = ?").bind(docid).execute(&mut *tx).await?;
        for link in links {
            sqlx::query(
                r#"
                INSERT INTO links (
                    source_docid, link_type, target_ref, target_ref_norm,
                    target_collection, target_anchor, link_text,
                    start_line, start_col, end_line, end_col
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&link.source_docid)
            .bind(link.link_type.as_str())
            .bind(&link.target_ref)
            .bind(&link.target_ref_norm)
            .bind(&link.target_collection)
            .bind(&link.target_anchor)
            .bind(&link.link_text)
            .bind(link.start_line)
            .bind(link.start_col)
            .bind(link.end_line)
            .bind(link.end_col)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_links_for_doc(&self, docid: &str) -> Result<Vec<DocLink>> {
        let rows = sqlx::query("SELECT * FROM links WHERE source_docid = ? ORDER BY start_line, start_col")
            .bind(docid)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_link).collect())
    }

    /// Documents whose `targetRefNorm` resolves to `docid`'s own
    /// normalized basename — the reverse index, assembled at query time
    /// the same way forward resolution is (see `links::resolve`).
    /// Resolves a normalized wiki/markdown target to an active document
    /// by `(collection, normalizedBasename)` match, at query time — not
    /// persisted, since the matching document set can change between
    /// writes. Returns `None` (a "broken" link) when nothing matches.
    pub async fn resolve_link_target(&self, target_norm: &str, collection: Option<&str>) -> Result<Option<crate::models::Document>> {
        let sql = if collection.is_some() {
            "SELECT * FROM documents WHERE active = 1 AND collection = ?"
        } else {
            "SELECT * FROM documents WHERE active = 1"
        };
        let mut query = sqlx::query(sql);
        if let Some(c) = collection {
            query = query.bind(c);
        }
        let rows = query.fetch_all(&self.pool).await?;
        for row in rows {
            let rel_path: String = row.get("rel_path");
            let basename = std::path::Path::new(&rel_path)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&rel_path);
            if crate::links::normalize_link_target(basename) == target_norm {
                return Ok(Some(super::documents::row_to_document(&row)));
            }
        }
        Ok(None)
    }

    pub async fn get_backlinks_for_doc(&self, target_ref_norm_candidates: &[String]) -> Result<Vec<DocLink>> {
        if target_ref_norm_candidates.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = target_ref_norm_candidates.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            r#"
            SELECT l.* FROM links l
            JOIN documents d ON d.docid = l.source_docid AND d.active = 1
            WHERE l.target_ref_norm IN ({placeholders})
            ORDER BY l.source_docid
            "#
        );
        let mut query = sqlx::query(&sql);
        for c in target_ref_norm_candidates {
            query = query.bind(c);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_link).collect())
    }
}
