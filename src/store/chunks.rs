use super::Store;
use crate::error::Result;
use crate::models::Chunk;
use sqlx::Row;

impl Store {
    /// Idempotent: invoked only when no chunks yet exist for this hash,
    /// so it never needs to delete first. Writes both the row store and
    /// the FTS5 shadow table in one transaction.
    pub async fn replace_chunks_for_mirror(&self, mirror_hash: &str, chunks: &[Chunk]) -> Result<()> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE mirror_hash = ?")
            .bind(mirror_hash)
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (mirror_hash, seq, text, start_line, end_line, token_count)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.mirror_hash)
            .bind(chunk.seq)
            .bind(&chunk.text)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .bind(chunk.token_count)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (mirror_hash, seq, text) VALUES (?, ?, ?)")
                .bind(&chunk.mirror_hash)
                .bind(chunk.seq)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_chunks_for_mirror(&self, mirror_hash: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE mirror_hash = ? ORDER BY seq")
            .bind(mirror_hash)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Chunk {
                mirror_hash: row.get("mirror_hash"),
                seq: row.get("seq"),
                text: row.get("text"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                token_count: row.get("token_count"),
            })
            .collect())
    }

    pub async fn chunks_exist_for_mirror(&self, mirror_hash: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE mirror_hash = ?")
            .bind(mirror_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_store;
    use crate::models::Chunk;

    fn chunk(mirror_hash: &str, seq: i64) -> Chunk {
        Chunk {
            mirror_hash: mirror_hash.to_string(),
            seq,
            text: format!("chunk {seq}"),
            start_line: seq * 2,
            end_line: seq * 2 + 1,
            token_count: 2,
        }
    }

    #[tokio::test]
    async fn replace_is_idempotent_once_rows_exist() {
        let (store, _dir) = test_store().await;
        let chunks = vec![chunk("h1", 0), chunk("h1", 1)];
        store.replace_chunks_for_mirror("h1", &chunks).await.unwrap();
        // second call with different content must be a no-op, per contract
        let other = vec![chunk("h1", 0)];
        store.replace_chunks_for_mirror("h1", &other).await.unwrap();
        let stored = store.get_chunks_for_mirror("h1").await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn seqs_are_contiguous_and_unique() {
        let (store, _dir) = test_store().await;
        let chunks = vec![chunk("h2", 0), chunk("h2", 1), chunk("h2", 2)];
        store.replace_chunks_for_mirror("h2", &chunks).await.unwrap();
        let stored = store.get_chunks_for_mirror("h2").await.unwrap();
        let seqs: Vec<i64> = stored.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
