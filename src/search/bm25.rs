//! Full-text keyword search over `chunks_fts`.
//!
//! SQLite's `bm25()` ranking function returns lower-is-better scores;
//! they're negated and then min-max normalized so callers always see
//! `[0.0, 1.0]` regardless of corpus size or query shape.

use super::{clamp_limit, normalize_scores, SearchFilter, SearchHit};
use crate::error::Result;
use crate::store::Store;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct Bm25Options {
    pub limit: usize,
    pub min_score: f32,
    pub filter: SearchFilter,
}

impl Default for Bm25Options {
    fn default() -> Self {
        Self {
            limit: 20,
            min_score: 0.0,
            filter: SearchFilter::default(),
        }
    }
}

/// Runs `query` as an FTS5 MATCH expression and returns ranked hits
/// with `<mark>`-delimited snippets, each carrying the chunk's
/// `(startLine, endLine)` span.
pub async fn search(store: &Store, query: &str, options: &Bm25Options) -> Result<Vec<SearchHit>> {
    let limit = clamp_limit(options.limit);

    let mut sql = String::from(
        r#"
        SELECT
            d.docid AS docid, d.uri AS uri, d.title AS title, d.collection AS collection,
            d.updated_at AS updated_at,
            c.mirror_hash AS mirror_hash, c.seq AS seq, c.start_line AS start_line, c.end_line AS end_line,
            bm25(chunks_fts) AS raw_rank,
            snippet(chunks_fts, 2, '<mark>', '</mark>', '...', 12) AS snippet
        FROM chunks_fts
        JOIN chunks c ON c.mirror_hash = chunks_fts.mirror_hash AND c.seq = chunks_fts.seq
        JOIN documents d ON d.mirror_hash = c.mirror_hash AND d.active = 1
        WHERE chunks_fts MATCH ?
        "#,
    );
    if options.filter.collection.is_some() {
        sql.push_str(" AND d.collection = ?");
    }
    for _ in &options.filter.tags_all {
        sql.push_str(" AND EXISTS (SELECT 1 FROM tags t WHERE t.docid = d.docid AND t.tag = ?)");
    }
    if !options.filter.tags_any.is_empty() {
        sql.push_str(" AND EXISTS (SELECT 1 FROM tags t WHERE t.docid = d.docid AND t.tag IN (");
        sql.push_str(&vec!["?"; options.filter.tags_any.len()].join(","));
        sql.push_str("))");
    }
    sql.push_str(" ORDER BY raw_rank ASC LIMIT ?");

    let mut q = sqlx::query(&sql).bind(query);
    if let Some(c) = &options.filter.collection {
        q = q.bind(c);
    }
    for t in &options.filter.tags_all {
        q = q.bind(t);
    }
    for t in &options.filter.tags_any {
        q = q.bind(t);
    }
    // Pull a wider candidate pool than `limit` so normalization has a
    // representative range to work over before the final truncation.
    let candidate_k = (limit * 5).max(limit) as i64;
    q = q.bind(candidate_k);

    let rows = q.fetch_all(store.pool()).await?;

    let raw_scores: Vec<f32> = rows.iter().map(|row| -row.get::<f64, _>("raw_rank") as f32).collect();
    let normalized = normalize_scores(&raw_scores);

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .zip(normalized.iter())
        .map(|(row, &score)| SearchHit {
            docid: row.get("docid"),
            uri: row.get("uri"),
            title: row.get("title"),
            collection: row.get("collection"),
            mirror_hash: row.get("mirror_hash"),
            seq: row.get("seq"),
            score,
            snippet: row.get("snippet"),
            start_line: row.get("start_line"),
            end_line: row.get("end_line"),
        })
        .collect();

    hits.retain(|h| h.score >= options.min_score);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_store;

    async fn seed(store: &Store, text: &str) -> String {
        let hash = store.put_content(text).await.unwrap();
        let chunks = crate::chunk::chunk_text(&hash, text, 700);
        store.replace_chunks_for_mirror(&hash, &chunks).await.unwrap();
        hash
    }

    fn doc(docid: &str, collection: &str, mirror_hash: &str) -> crate::models::Document {
        crate::models::Document {
            docid: docid.to_string(),
            uri: format!("ctx://{collection}/{docid}.md"),
            collection: collection.to_string(),
            rel_path: format!("{docid}.md"),
            title: Some(docid.to_string()),
            language_hint: None,
            source_mime: "text/markdown".to_string(),
            source_ext: Some("md".to_string()),
            source_hash: "h".to_string(),
            source_size: 10,
            source_mtime: 0,
            mirror_hash: Some(mirror_hash.to_string()),
            converter_id: None,
            converter_version: None,
            active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn finds_matching_chunk_with_highlighted_snippet() {
        let (store, _dir) = test_store().await;
        let hash = seed(&store, "The quick brown fox jumps over the lazy dog.").await;
        store.upsert_document(&doc("doc1", "notes", &hash)).await.unwrap();

        let hits = search(&store, "fox", &Bm25Options::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("<mark>fox</mark>"));
        assert_eq!(hits[0].docid, "doc1");
    }

    #[tokio::test]
    async fn collection_filter_excludes_other_collections() {
        let (store, _dir) = test_store().await;
        let h1 = seed(&store, "alpha content about rust").await;
        let h2 = seed(&store, "alpha content about rust too").await;
        store.upsert_document(&doc("doc1", "a", &h1)).await.unwrap();
        store.upsert_document(&doc("doc2", "b", &h2)).await.unwrap();

        let options = Bm25Options {
            filter: SearchFilter {
                collection: Some("a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let hits = search(&store, "alpha", &options).await.unwrap();
        assert!(hits.iter().all(|h| h.collection == "a"));
    }

    #[tokio::test]
    async fn no_match_returns_empty() {
        let (store, _dir) = test_store().await;
        let hash = seed(&store, "nothing relevant here").await;
        store.upsert_document(&doc("doc1", "notes", &hash)).await.unwrap();
        let hits = search(&store, "zzzznomatch", &Bm25Options::default()).await.unwrap();
        assert!(hits.is_empty());
    }
}
