//! Embedding-based k-NN search over `chunk_vectors`.
//!
//! The query is embedded through whichever `EmbeddingPort` the caller
//! holds, then matched against the brute-force cosine index the store
//! already exposes. `score = max(0, min(1, 1 - distance))` maps cosine
//! distance onto the same `[0, 1]` range every search mode reports.

use super::{clamp_limit, SearchFilter, SearchHit};
use crate::embed::EmbeddingPort;
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct VectorOptions {
    pub limit: usize,
    pub min_score: f32,
    pub filter: SearchFilter,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            min_score: 0.0,
            filter: SearchFilter::default(),
        }
    }
}

fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Embeds `query` with `port` and returns the nearest chunks by cosine
/// distance, filtered to `options.filter.collection` when given —
/// there is no cross-collection default, a caller that wants the whole
/// corpus simply omits the filter. Returns an empty result, never an
/// error, when no vector index is usable or the port isn't configured
/// (`dimensions() == 0`, the `NullEmbeddingPort` contract).
pub async fn search(store: &Store, port: &dyn EmbeddingPort, query: &str, options: &VectorOptions) -> Result<Vec<SearchHit>> {
    if port.dimensions() == 0 || !store.vector_search_available().await {
        return Ok(Vec::new());
    }
    let limit = clamp_limit(options.limit);
    let query_vec = port.embed(query).await?;

    let candidate_k = limit * 5;
    let matches = store
        .vector_search_nearest(&query_vec, port.model_id(), candidate_k, options.filter.collection.as_deref())
        .await?;

    let mut hits = Vec::with_capacity(matches.len());
    for m in matches {
        let score = distance_to_score(m.distance);
        if score < options.min_score {
            continue;
        }
        let Some(doc) = find_owning_document(store, &m.mirror_hash).await? else {
            continue;
        };
        if !tags_satisfy(store, &doc.docid, &options.filter).await? {
            continue;
        }
        let chunk_text = store
            .get_chunks_for_mirror(&m.mirror_hash)
            .await?
            .into_iter()
            .find(|c| c.seq == m.seq);
        let (snippet, start_line, end_line) = match chunk_text {
            Some(c) => (truncate_snippet(&c.text), c.start_line, c.end_line),
            None => (String::new(), 0, 0),
        };
        hits.push(SearchHit {
            docid: doc.docid,
            uri: doc.uri,
            title: doc.title,
            collection: doc.collection,
            mirror_hash: m.mirror_hash,
            seq: m.seq,
            score,
            snippet,
            start_line,
            end_line,
        });
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

async fn find_owning_document(store: &Store, mirror_hash: &str) -> Result<Option<crate::models::Document>> {
    let docs = store
        .list_documents(&crate::store::DocumentFilter {
            collection: None,
            active_only: true,
        })
        .await?;
    Ok(docs.into_iter().find(|d| d.mirror_hash.as_deref() == Some(mirror_hash)))
}

async fn tags_satisfy(store: &Store, docid: &str, filter: &SearchFilter) -> Result<bool> {
    if filter.tags_all.is_empty() && filter.tags_any.is_empty() {
        return Ok(true);
    }
    let tags = store.get_tags_for_doc(docid).await?;
    let all_ok = filter.tags_all.iter().all(|t| tags.contains(t));
    let any_ok = filter.tags_any.is_empty() || filter.tags_any.iter().any(|t| tags.contains(t));
    Ok(all_ok && any_ok)
}

fn truncate_snippet(text: &str) -> String {
    const MAX: usize = 280;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::DownloadPolicy;
    use async_trait::async_trait;

    struct EchoPort;

    #[async_trait]
    impl EmbeddingPort for EchoPort {
        fn model_id(&self) -> &str {
            "echo"
        }
        async fn init(&mut self, _policy: DownloadPolicy) -> Result<()> {
            Ok(())
        }
        fn dimensions(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("cat") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
        async fn dispose(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn doc(docid: &str, mirror_hash: &str) -> crate::models::Document {
        crate::models::Document {
            docid: docid.to_string(),
            uri: format!("ctx://notes/{docid}.md"),
            collection: "notes".to_string(),
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
    async fn ranks_nearest_vector_first() {
        use crate::store::tests::test_store;
        let (store, _dir) = test_store().await;

        let cat_hash = store.put_content("about cats").await.unwrap();
        let dog_hash = store.put_content("about dogs").await.unwrap();
        store
            .replace_chunks_for_mirror(&cat_hash, &crate::chunk::chunk_text(&cat_hash, "about cats", 700))
            .await
            .unwrap();
        store
            .replace_chunks_for_mirror(&dog_hash, &crate::chunk::chunk_text(&dog_hash, "about dogs", 700))
            .await
            .unwrap();
        store.upsert_document(&doc("cat-doc", &cat_hash)).await.unwrap();
        store.upsert_document(&doc("dog-doc", &dog_hash)).await.unwrap();

        store.vector_insert(&cat_hash, 0, "echo", &[1.0, 0.0]).await.unwrap();
        store.vector_insert(&dog_hash, 0, "echo", &[0.0, 1.0]).await.unwrap();

        let port = EchoPort;
        let hits = search(&store, &port, "tell me about cat", &VectorOptions::default()).await.unwrap();
        assert_eq!(hits[0].docid, "cat-doc");
        assert!(hits[0].score > hits.last().unwrap().score || hits.len() == 1);
    }

    #[tokio::test]
    async fn unconfigured_port_returns_empty_instead_of_erroring() {
        use crate::embed::NullEmbeddingPort;
        use crate::store::tests::test_store;
        let (store, _dir) = test_store().await;
        let hits = search(&store, &NullEmbeddingPort, "anything", &VectorOptions::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn distance_to_score_clamps_to_unit_range() {
        assert_eq!(distance_to_score(-1.0), 1.0);
        assert_eq!(distance_to_score(3.0), 0.0);
        assert!((distance_to_score(0.2) - 0.8).abs() < 1e-6);
    }
}
