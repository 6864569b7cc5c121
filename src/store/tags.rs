use super::Store;
use crate::error::Result;
use crate::uri::{normalize_tag, validate_tag};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub collection: Option<String>,
    pub prefix: Option<String>,
}

impl Store {
    /// Fully replaces the tag bag for a document: duplicates collapse
    /// because the grammar-normalized form is the primary key.
    pub async fn replace_tags_for_doc(&self, docid: &str, tags: &[String]) -> Result<()> {
        let normalized: Vec<String> = tags.iter().map(|t| normalize_tag(t)).collect();
        for t in &normalized {
            validate_tag(t)?;
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tags WHERE docid = ?").bind(docid).execute(&mut *tx).await?;
        for t in &normalized {
            sqlx::query("INSERT OR IGNORE INTO tags (docid, tag) VALUES (?, ?)")
                .bind(docid)
                .bind(t)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_tags_for_doc(&self, docid: &str) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT tag FROM tags WHERE docid = ? ORDER BY tag")
            .bind(docid)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_tag_counts(&self, filter: &TagFilter) -> Result<Vec<TagCount>> {
        let mut sql = String::from(
            r#"
            SELECT t.tag AS tag, COUNT(*) AS count
            FROM tags t
            JOIN documents d ON d.docid = t.docid AND d.active = 1
            WHERE 1=1
            "#,
        );
        if filter.collection.is_some() {
            sql.push_str(" AND d.collection = ?");
        }
        if filter.prefix.is_some() {
            sql.push_str(" AND t.tag LIKE ? ESCAPE '\\'");
        }
        sql.push_str(" GROUP BY t.tag ORDER BY count DESC, t.tag ASC");

        let mut query = sqlx::query(&sql);
        if let Some(c) = &filter.collection {
            query = query.bind(c);
        }
        let like_prefix;
        if let Some(p) = &filter.prefix {
            like_prefix = format!("{}%", p.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
            query = query.bind(like_prefix);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| TagCount {
                tag: row.get("tag"),
                count: row.get("count"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_store;

    #[tokio::test]
    async fn tags_collapse_duplicates_and_normalize() {
        let (store, _dir) = test_store().await;
        store
            .replace_tags_for_doc("doc1", &["Project/Rust".into(), "project/rust".into(), " project/rust ".into()])
            .await
            .unwrap();
        let tags = store.get_tags_for_doc("doc1").await.unwrap();
        assert_eq!(tags, vec!["project/rust".to_string()]);
    }
}
