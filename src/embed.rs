//! LLM ports and the backlog-draining Embedder.
//!
//! `EmbeddingPort`, `GenerationPort`, and `RerankPort` are the seams the
//! engine calls through; no concrete model runtime lives in this crate.
//! `Embedder` drains the `chunk_vectors` backlog a fixed batch at a time,
//! holding the write lock only for the duration of a run.

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};
use crate::store::{unit_normalize, StorePortStats, Store};
use async_trait::async_trait;

/// Governs whether a port may reach the network to fetch model weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadPolicy {
    pub offline: bool,
    pub allow_download: bool,
}

/// Produces fixed-dimension embedding vectors for chunk text and queries.
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    fn model_id(&self) -> &str;
    async fn init(&mut self, policy: DownloadPolicy) -> Result<()>;
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn dispose(&mut self) -> Result<()>;
}

/// Expands or rewrites a query for hybrid retrieval. Optional: Hybrid
/// search degrades to un-expanded queries when no port is configured.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    fn model_id(&self) -> &str;
    async fn init(&mut self, policy: DownloadPolicy) -> Result<()>;
    async fn generate(&self, prompt: &str) -> Result<String>;
    async fn dispose(&mut self) -> Result<()>;
}

/// Re-scores a shortlist of candidates against a query. Optional: Hybrid
/// search is usable without a reranker.
#[async_trait]
pub trait RerankPort: Send + Sync {
    fn model_id(&self) -> &str;
    async fn init(&mut self, policy: DownloadPolicy) -> Result<()>;
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
    async fn dispose(&mut self) -> Result<()>;
}

/// No embedding model is configured. `embed` always fails, so callers
/// must check `is_configured` before scheduling work against it.
pub struct NullEmbeddingPort;

#[async_trait]
impl EmbeddingPort for NullEmbeddingPort {
    fn model_id(&self) -> &str {
        "none"
    }
    async fn init(&mut self, _policy: DownloadPolicy) -> Result<()> {
        Ok(())
    }
    fn dimensions(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EngineError::model_not_found("no embedding port is configured"))
    }
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbedRunResult {
    pub attempted: u64,
    pub embedded: u64,
    pub failed: u64,
}

/// Drains `store.vector_backlog` for `port`'s model, `batch_size` chunks
/// at a time. A single chunk's embedding failure is recorded and
/// skipped; it does not abort the run.
pub async fn drain_backlog(
    store: &Store,
    port: &dyn EmbeddingPort,
    config: &EmbeddingConfig,
) -> Result<EmbedRunResult> {
    let mut result = EmbedRunResult::default();
    let batch_size = config.batch_size.max(1);

    loop {
        let backlog = store.vector_backlog(port.model_id(), Some(batch_size)).await?;
        if backlog.is_empty() {
            break;
        }

        for entry in backlog {
            result.attempted += 1;
            match port.embed(&entry.text).await {
                Ok(mut vector) => {
                    if vector.len() != port.dimensions() {
                        result.failed += 1;
                        tracing::warn!(
                            mirror_hash = %entry.mirror_hash,
                            seq = entry.seq,
                            expected = port.dimensions(),
                            got = vector.len(),
                            "embedding dimension mismatch, skipping"
                        );
                        continue;
                    }
                    unit_normalize(&mut vector);
                    if let Err(e) = store
                        .vector_insert(&entry.mirror_hash, entry.seq, port.model_id(), &vector)
                        .await
                    {
                        result.failed += 1;
                        tracing::warn!(mirror_hash = %entry.mirror_hash, seq = entry.seq, error = %e, "failed to persist embedding");
                        continue;
                    }
                    result.embedded += 1;
                }
                Err(e) => {
                    result.failed += 1;
                    tracing::warn!(mirror_hash = %entry.mirror_hash, seq = entry.seq, error = %e, "embedding call failed");
                }
            }
        }
    }

    Ok(result)
}

pub async fn stats(store: &Store) -> Result<StorePortStats> {
    store.stats().await
}

/// Calls the OpenAI embeddings API, one text per `embed()` call.
/// Retries HTTP 429 and 5xx responses and network errors with
/// exponential backoff (1s, 2s, 4s, ... capped at 2^5); a non-429 4xx
/// fails immediately since retrying it can't succeed.
pub struct OpenAiEmbeddingPort {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiEmbeddingPort {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::invalid_input("embedding.model required for the openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| EngineError::invalid_input("embedding.dims required for the openai provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::model_not_found("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: reqwest::Client::new(),
        })
    }
}

fn parse_openai_embedding(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| EngineError::adapter_error("invalid OpenAI response: missing data[0].embedding"))?;
    embedding
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| EngineError::adapter_error("non-numeric embedding component")))
        .collect()
}

#[async_trait]
impl EmbeddingPort for OpenAiEmbeddingPort {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn init(&mut self, _policy: DownloadPolicy) -> Result<()> {
        Ok(())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "model": &self.model, "input": text });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = std::time::Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .timeout(std::time::Duration::from_secs(self.timeout_secs))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EngineError::with_source(crate::error::ErrorKind::AdapterError, "invalid JSON from OpenAI", e.into()))?;
                        return parse_openai_embedding(&json);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(EngineError::adapter_error(format!("OpenAI API error {status}")));
                        continue;
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EngineError::adapter_error(format!("OpenAI API error {status}: {body_text}")));
                }
                Err(e) => {
                    last_err = Some(EngineError::with_source(crate::error::ErrorKind::AdapterError, "OpenAI request failed", e.into()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| EngineError::adapter_error("embedding failed after retries")))
    }

    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_store;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn parses_embedding_out_of_openai_response_shape() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}],
            "model": "text-embedding-3-small",
        });
        let vec = parse_openai_embedding(&json).unwrap();
        assert_eq!(vec, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn rejects_response_missing_data() {
        let json = serde_json::json!({"error": "bad request"});
        assert!(parse_openai_embedding(&json).is_err());
    }

    struct FixedPort {
        dims: usize,
        returns: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingPort for FixedPort {
        fn model_id(&self) -> &str {
            "fixed-test-model"
        }
        async fn init(&mut self, _policy: DownloadPolicy) -> Result<()> {
            Ok(())
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32; self.returns])
        }
        async fn dispose(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn embed_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "fixed".to_string(),
            model: Some("fixed-test-model".to_string()),
            dims: Some(3),
            batch_size: 2,
            max_retries: 0,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn drains_backlog_across_batches() {
        let (store, _dir) = test_store().await;
        let hash = store.put_content("Alpha\n\nBeta\n\nGamma").await.unwrap();
        let chunks = crate::chunk::chunk_text(&hash, "Alpha\n\nBeta\n\nGamma", 1);
        store.replace_chunks_for_mirror(&hash, &chunks).await.unwrap();

        let port = FixedPort { dims: 3, returns: 3, calls: Arc::new(AtomicUsize::new(0)) };
        let result = drain_backlog(&store, &port, &embed_config()).await.unwrap();
        assert_eq!(result.attempted, chunks.len() as u64);
        assert_eq!(result.embedded, chunks.len() as u64);
        assert_eq!(result.failed, 0);

        let backlog_after = store.vector_backlog("fixed-test-model", Some(10)).await.unwrap();
        assert!(backlog_after.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_recorded_and_skipped() {
        let (store, _dir) = test_store().await;
        let hash = store.put_content("Solo paragraph.").await.unwrap();
        let chunks = crate::chunk::chunk_text(&hash, "Solo paragraph.", 700);
        store.replace_chunks_for_mirror(&hash, &chunks).await.unwrap();

        let port = FixedPort { dims: 4, returns: 2, calls: Arc::new(AtomicUsize::new(0)) };
        let result = drain_backlog(&store, &port, &embed_config()).await.unwrap();
        assert_eq!(result.embedded, 0);
        assert_eq!(result.failed, 1);
    }
}
