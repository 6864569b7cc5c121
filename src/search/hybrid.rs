//! Hybrid retrieval: BM25 and vector search fused, with optional query
//! expansion and reranking.
//!
//! Degrades by capability rather than by configuration flag — if no
//! `EmbeddingPort` is supplied (or the vector index isn't usable),
//! `meta.mode` reports `bm25_only` and `alpha` is forced to zero so the
//! fusion formula collapses to pure keyword ranking without a special
//! case in the merge itself.

use super::{bm25, clamp_limit, vector, SearchFilter, SearchHit};
use crate::embed::{EmbeddingPort, GenerationPort, RerankPort};
use crate::error::Result;
use crate::store::Store;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub limit: usize,
    pub min_score: f32,
    /// Weight toward the vector score: `0.0` is pure keyword, `1.0` is
    /// pure semantic. Ignored (forced to `0.0`) when no vector index is
    /// available.
    pub alpha: f32,
    pub filter: SearchFilter,
    pub expand_query: bool,
    pub rerank: bool,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            min_score: 0.0,
            alpha: 0.5,
            filter: SearchFilter::default(),
            expand_query: false,
            rerank: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridMeta {
    pub mode: String,
    pub expanded: bool,
    pub reranked: bool,
    pub vectors_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridResult {
    pub hits: Vec<SearchHit>,
    pub meta: HybridMeta,
}

pub async fn search(
    store: &Store,
    query: &str,
    embedding_port: Option<&dyn EmbeddingPort>,
    generation_port: Option<&dyn GenerationPort>,
    rerank_port: Option<&dyn RerankPort>,
    options: &HybridOptions,
) -> Result<HybridResult> {
    let limit = clamp_limit(options.limit);
    let candidate_k = (limit * 3).max(limit);

    let mut expanded = false;
    let effective_query = if options.expand_query {
        match generation_port {
            Some(gen) => match gen.generate(&format!("Expand this search query with related terms, space separated: {query}")).await {
                Ok(extra) if !extra.trim().is_empty() => {
                    expanded = true;
                    format!("{query} {extra}")
                }
                _ => query.to_string(),
            },
            None => query.to_string(),
        }
    } else {
        query.to_string()
    };

    let vectors_used = match embedding_port {
        Some(_) => store.vector_search_available().await,
        None => false,
    };
    let effective_alpha = if vectors_used { options.alpha.clamp(0.0, 1.0) } else { 0.0 };
    let mode = if vectors_used { "hybrid" } else { "bm25_only" };

    let keyword_hits = bm25::search(
        store,
        &effective_query,
        &bm25::Bm25Options {
            limit: candidate_k,
            min_score: 0.0,
            filter: options.filter.clone(),
        },
    )
    .await?;

    let vector_hits = if vectors_used {
        vector::search(
            store,
            embedding_port.expect("vectors_used implies a port was supplied"),
            &effective_query,
            &vector::VectorOptions {
                limit: candidate_k,
                min_score: 0.0,
                filter: options.filter.clone(),
            },
        )
        .await?
    } else {
        Vec::new()
    };

    let mut combined: HashMap<(String, i64), (f32, SearchHit)> = HashMap::new();
    for h in keyword_hits {
        let score = (1.0 - effective_alpha) * h.score;
        combined.insert((h.mirror_hash.clone(), h.seq), (score, h));
    }
    for h in vector_hits {
        let key = (h.mirror_hash.clone(), h.seq);
        let contrib = effective_alpha * h.score;
        match combined.get_mut(&key) {
            Some((score, existing)) => {
                *score += contrib;
                if existing.snippet.is_empty() {
                    existing.snippet = h.snippet.clone();
                }
            }
            None => {
                combined.insert(key, (contrib, h));
            }
        }
    }

    // Group to one hit per document, keeping its highest-scoring chunk.
    let mut by_doc: HashMap<String, SearchHit> = HashMap::new();
    for (_, (score, mut hit)) in combined {
        hit.score = score;
        by_doc
            .entry(hit.docid.clone())
            .and_modify(|existing| {
                if hit.score > existing.score {
                    *existing = hit.clone();
                }
            })
            .or_insert(hit);
    }

    let mut hits: Vec<SearchHit> = by_doc.into_values().collect();

    let mut reranked = false;
    if options.rerank && !hits.is_empty() {
        if let Some(rp) = rerank_port {
            let candidates: Vec<String> = hits.iter().map(|h| h.snippet.clone()).collect();
            if let Ok(scores) = rp.score(&effective_query, &candidates).await {
                if scores.len() == hits.len() {
                    for (h, s) in hits.iter_mut().zip(scores.into_iter()) {
                        h.score = s.clamp(0.0, 1.0);
                    }
                    reranked = true;
                }
            }
        }
    }

    hits.retain(|h| h.score >= options.min_score);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.docid.cmp(&b.docid)));
    hits.truncate(limit);

    Ok(HybridResult {
        hits,
        meta: HybridMeta {
            mode: mode.to_string(),
            expanded,
            reranked,
            vectors_used,
        },
    })
}
