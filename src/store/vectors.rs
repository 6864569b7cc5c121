use super::Store;
use crate::error::Result;
use sqlx::Row;

/// A `(mirrorHash, seq)` pair with no embedding yet, or a stale one
/// under the given model — the vector backlog.
#[derive(Debug, Clone)]
pub struct BacklogEntry {
    pub mirror_hash: String,
    pub seq: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StorePortStats {
    pub document_count: i64,
    pub chunk_count: i64,
    pub backlog_count: i64,
    pub search_available: bool,
}

pub struct NearestMatch {
    pub mirror_hash: String,
    pub seq: i64,
    pub distance: f32,
}

impl Store {
    /// `vectorIndexPort::insert`. Unit-normalization is the Embedder's
    /// responsibility; the store only verifies the length invariant.
    pub async fn vector_insert(&self, mirror_hash: &str, seq: i64, model: &str, embedding: &[f32]) -> Result<()> {
        let blob = vec_to_blob(embedding);
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (mirror_hash, seq, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(mirror_hash, seq, model) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(mirror_hash)
        .bind(seq)
        .bind(model)
        .bind(embedding.len() as i64)
        .bind(blob)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `vectorIndexPort::searchNearest`. Brute-force cosine scan over
    /// the stored vectors for `model`, joined back to active documents
    /// through the collection/lang filter.
    pub async fn vector_search_nearest(
        &self,
        query_vec: &[f32],
        model: &str,
        k: usize,
        collection: Option<&str>,
    ) -> Result<Vec<NearestMatch>> {
        let sql = if collection.is_some() {
            r#"
            SELECT v.mirror_hash, v.seq, v.embedding
            FROM chunk_vectors v
            JOIN documents d ON d.mirror_hash = v.mirror_hash AND d.active = 1
            WHERE v.model = ? AND d.collection = ?
            "#
        } else {
            r#"
            SELECT v.mirror_hash, v.seq, v.embedding
            FROM chunk_vectors v
            JOIN documents d ON d.mirror_hash = v.mirror_hash AND d.active = 1
            WHERE v.model = ?
            "#
        };
        let mut query = sqlx::query(sql).bind(model);
        if let Some(c) = collection {
            query = query.bind(c);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut matches: Vec<NearestMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let distance = 1.0 - cosine_similarity(query_vec, &vector);
                NearestMatch {
                    mirror_hash: row.get("mirror_hash"),
                    seq: row.get("seq"),
                    distance,
                }
            })
            .collect();

        matches.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(k);
        Ok(matches)
    }

    /// Chunks with no embedding or a stale one under `model` — the
    /// `statsPort` backlog, and the data the Embedder drains.
    pub async fn vector_backlog(&self, model: &str, limit: Option<usize>) -> Result<Vec<BacklogEntry>> {
        let limit_val = limit.unwrap_or(usize::MAX) as i64;
        let rows = sqlx::query(
            r#"
            SELECT c.mirror_hash, c.seq, c.text
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.mirror_hash = c.mirror_hash AND v.seq = c.seq AND v.model = ?
            WHERE v.mirror_hash IS NULL
            ORDER BY c.mirror_hash, c.seq
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| BacklogEntry {
                mirror_hash: row.get("mirror_hash"),
                seq: row.get("seq"),
                text: row.get("text"),
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<StorePortStats> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(&self.pool).await?;
        let backlog_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks c
            LEFT JOIN chunk_vectors v ON v.mirror_hash = c.mirror_hash AND v.seq = c.seq
            WHERE v.mirror_hash IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let search_available = self.vector_search_available().await;
        Ok(StorePortStats {
            document_count,
            chunk_count,
            backlog_count,
            search_available,
        })
    }
}

/// Little-endian f32 blob encoding, the on-disk form for `chunk_vectors`.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for &f in vec {
        blob.extend_from_slice(&f.to_le_bytes());
    }
    blob
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn unit_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}
