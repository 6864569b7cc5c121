//! Process-wide state, assembled once at startup and threaded through
//! every operation explicitly — no statics, no thread-locals.
//!
//! Construction order: config -> db pool -> migrations -> Store ->
//! FileLock -> JobManager -> ToolMutex -> embedding port. Shutdown
//! reverses it: stop admitting new mutating work, let any active job
//! finish, dispose the embedding port, close the pool.

use crate::config::Config;
use crate::convert::ConverterRegistry;
use crate::db;
use crate::embed::{DownloadPolicy, EmbeddingPort, NullEmbeddingPort, OpenAiEmbeddingPort};
use crate::jobs::JobManager;
use crate::lock::FileLock;
use crate::migrate::run_migrations_on;
use crate::store::Store;
use crate::toolmutex::ToolMutex;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

pub struct EngineContext {
    pub config: Config,
    pub store: Store,
    pub lock: FileLock,
    pub tool_mutex: ToolMutex,
    pub jobs: JobManager,
    pub registry: ConverterRegistry,
    /// `Arc`-wrapped so a `'static` job closure (Sync/Embed, run through
    /// `JobManager::start_job`) can hold its own handle to the port for
    /// the run's duration without borrowing from this context.
    pub embedding_port: Arc<AsyncMutex<Box<dyn EmbeddingPort>>>,
}

impl EngineContext {
    pub async fn init(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        run_migrations_on(&pool).await?;

        let blobs_dir = config
            .db
            .path
            .parent()
            .map(|p| p.join("blobs"))
            .unwrap_or_else(|| PathBuf::from("blobs"));
        let store = Store::new(pool, blobs_dir);
        store.sync_collections(&config.collections).await?;

        let lock_path = config.db.path.with_extension("lock");
        let lock = FileLock::new(lock_path.clone());
        let jobs = JobManager::new(store.clone(), lock_path, config.locking.clone());

        let mut embedding_port: Box<dyn EmbeddingPort> = match config.embedding.provider.as_str() {
            "openai" => match OpenAiEmbeddingPort::new(&config.embedding) {
                Ok(port) => Box::new(port),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to construct the openai embedding port; falling back to none");
                    Box::new(NullEmbeddingPort)
                }
            },
            "local" => {
                // No bundled local-model runtime ships in this crate; a
                // real deployment installs one via `install_embedding_port`.
                tracing::warn!("embedding.provider = 'local' has no bundled runtime; backlog draining will fail until a real port is installed");
                Box::new(NullEmbeddingPort)
            }
            _ => Box::new(NullEmbeddingPort),
        };
        let _ = embedding_port.init(DownloadPolicy::default()).await;

        Ok(Self {
            config,
            store,
            lock,
            tool_mutex: ToolMutex::new(),
            jobs,
            registry: ConverterRegistry::with_builtins(),
            embedding_port: Arc::new(AsyncMutex::new(embedding_port)),
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.config.locking.timeout_secs)
    }

    /// Swaps in a concrete embedding port (a real deployment's glue
    /// code, never this crate), disposing whatever was installed before.
    pub async fn install_embedding_port(&self, mut port: Box<dyn EmbeddingPort>) -> Result<()> {
        port.init(DownloadPolicy::default()).await?;
        let mut slot = self.embedding_port.lock().await;
        let _ = slot.dispose().await;
        *slot = port;
        Ok(())
    }

    /// Cooperative shutdown, reverse of construction order: admit no
    /// more mutating work, wait for the active job to finish, dispose
    /// the embedding port, close the pool.
    pub async fn shutdown(self) {
        let _guard = self.tool_mutex.acquire().await;
        self.jobs.shutdown().await;
        let mut port = self.embedding_port.lock().await;
        let _ = port.dispose().await;
        drop(port);
        self.store.pool().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, DbConfig, RetrievalConfig};
    use tempfile::TempDir;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            db: DbConfig {
                path: dir.join("ken.db"),
            },
            chunking: ChunkingConfig {
                max_tokens: 700,
                overlap_tokens: 0,
            },
            retrieval: RetrievalConfig {
                hybrid_alpha: 0.6,
                candidate_k_keyword: 80,
                candidate_k_vector: 80,
                final_limit: 12,
                min_score: 0.0,
            },
            embedding: Default::default(),
            locking: Default::default(),
            collections: vec![],
        }
    }

    #[tokio::test]
    async fn init_then_shutdown_round_trips() {
        let dir = TempDir::new().unwrap();
        let ctx = EngineContext::init(test_config(dir.path())).await.unwrap();
        let stats = ctx.store.stats().await.unwrap();
        assert_eq!(stats.document_count, 0);
        ctx.shutdown().await;
    }
}
