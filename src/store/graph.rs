use super::{blob_to_vec, cosine_similarity, Store};
use crate::error::Result;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub docid: String,
    pub uri: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphEdgeType {
    Wiki,
    Markdown,
    Similar,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub edge_type: GraphEdgeType,
    pub weight: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub collection: Option<String>,
    /// When set, `similar` edges are computed from the vector index.
    /// The model is explicit rather than guessed when given; otherwise
    /// the store picks whichever model has the most indexed vectors.
    pub include_similar: bool,
    pub similar_model: Option<String>,
    /// Per-node cap on `similar` neighbors kept after thresholding.
    pub similar_top_k: usize,
    /// Minimum cosine similarity a pair must clear to become an edge.
    pub similar_threshold: f32,
    pub limit_nodes: usize,
    pub limit_edges: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            collection: None,
            include_similar: false,
            similar_model: None,
            similar_top_k: 5,
            similar_threshold: 0.75,
            limit_nodes: 500,
            limit_edges: 2000,
        }
    }
}

impl Store {
    /// Assembles the document graph: nodes are active documents, edges
    /// are resolved wiki/markdown links plus (optionally) `similar`
    /// edges sourced from the vector index. Bounded by `limitNodes` /
    /// `limitEdges`; truncation is reported in the result, not silent.
    pub async fn get_graph(&self, options: &GraphOptions) -> Result<Graph> {
        let node_rows = if let Some(c) = &options.collection {
            sqlx::query("SELECT docid, uri, title FROM documents WHERE active = 1 AND collection = ? ORDER BY docid")
                .bind(c)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT docid, uri, title FROM documents WHERE active = 1 ORDER BY docid")
                .fetch_all(&self.pool)
                .await?
        };

        let nodes_truncated = node_rows.len() > options.limit_nodes;
        let nodes: Vec<GraphNode> = node_rows
            .iter()
            .take(options.limit_nodes)
            .map(|row| GraphNode {
                docid: row.get("docid"),
                uri: row.get("uri"),
                title: row.get("title"),
            })
            .collect();

        let node_ids: HashSet<String> = nodes.iter().map(|n| n.docid.clone()).collect();

        let link_rows = sqlx::query(
            r#"
            SELECT l.source_docid, l.target_ref_norm, l.link_type
            FROM links l
            JOIN documents d ON d.docid = l.source_docid AND d.active = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut edges = Vec::new();
        let mut edges_truncated = false;
        for (i, row) in link_rows.iter().enumerate() {
            let source: String = row.get("source_docid");
            if !node_ids.contains(&source) {
                continue;
            }
            let target_norm: String = row.get("target_ref_norm");
            // Resolution happens at query time: find an active document
            // whose basename matches the normalized target.
            if let Some(target_doc) = self.resolve_link_target(&target_norm, options.collection.as_deref()).await? {
                if !node_ids.contains(&target_doc.docid) {
                    continue;
                }
                let edge_type = match row.get::<String, _>("link_type").as_str() {
                    "wiki" => GraphEdgeType::Wiki,
                    _ => GraphEdgeType::Markdown,
                };
                edges.push(GraphEdge {
                    source,
                    target: target_doc.docid,
                    edge_type,
                    weight: None,
                });
            }
            if edges.len() >= options.limit_edges {
                // Only genuinely truncated if link rows remain unprocessed;
                // landing on the cap at the very last row isn't a cut.
                edges_truncated = i + 1 < link_rows.len();
                break;
            }
        }

        if options.include_similar && !edges_truncated {
            let mut similar = self.similar_edges(&node_ids, options).await?;
            let capacity = options.limit_edges.saturating_sub(edges.len());
            if similar.len() > capacity {
                edges_truncated = true;
            }
            similar.truncate(capacity);
            edges.extend(similar);
        }

        edges.truncate(options.limit_edges);

        Ok(Graph {
            nodes,
            edges,
            truncated: nodes_truncated || edges_truncated,
        })
    }

    /// `similar` edges: each node's representative vector (its first
    /// chunk, `seq = 0`, under the resolved model) is compared against
    /// every other node's; pairs above `similarThreshold` survive, and
    /// each node keeps only its `similarTopK` highest-scoring targets.
    /// Brute-force, same as the vector search path — there's no ANN
    /// index here, and node counts are bounded by `limitNodes`.
    async fn similar_edges(&self, node_ids: &HashSet<String>, options: &GraphOptions) -> Result<Vec<GraphEdge>> {
        let model = match &options.similar_model {
            Some(m) => Some(m.clone()),
            None => self.default_vector_model().await?,
        };
        let Some(model) = model else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT d.docid AS docid, v.embedding AS embedding
            FROM documents d
            JOIN chunk_vectors v ON v.mirror_hash = d.mirror_hash AND v.seq = 0 AND v.model = ?
            WHERE d.active = 1
            "#,
        )
        .bind(&model)
        .fetch_all(&self.pool)
        .await?;

        let vectors: Vec<(String, Vec<f32>)> = rows
            .into_iter()
            .filter_map(|row| {
                let docid: String = row.get("docid");
                if !node_ids.contains(&docid) {
                    return None;
                }
                let blob: Vec<u8> = row.get("embedding");
                Some((docid, blob_to_vec(&blob)))
            })
            .collect();

        let mut edges = Vec::new();
        for (i, (source_id, source_vec)) in vectors.iter().enumerate() {
            let mut neighbors: Vec<(f32, &str)> = vectors
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, (target_id, target_vec))| (cosine_similarity(source_vec, target_vec), target_id.as_str()))
                .filter(|(score, _)| *score >= options.similar_threshold)
                .collect();
            neighbors.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            neighbors.truncate(options.similar_top_k);

            for (score, target_id) in neighbors {
                edges.push(GraphEdge {
                    source: source_id.clone(),
                    target: target_id.to_string(),
                    edge_type: GraphEdgeType::Similar,
                    weight: Some(score),
                });
            }
        }
        Ok(edges)
    }

    /// Whichever model has the most rows in `chunk_vectors`, or `None`
    /// if nothing has been embedded yet.
    async fn default_vector_model(&self) -> Result<Option<String>> {
        let model: Option<String> =
            sqlx::query_scalar("SELECT model FROM chunk_vectors GROUP BY model ORDER BY COUNT(*) DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(model)
    }
}
