//! `ken` — the command-line front end for the knowledge engine library.

use clap::{Parser, Subcommand};
use kengine::capture::{self, CaptureRequest};
use kengine::config::{self, CollectionConfig};
use kengine::context::EngineContext;
use kengine::convert::ConverterRegistry;
use kengine::ingest;
use kengine::models::{JobStatus, JobType};
use kengine::search::{bm25, hybrid, vector, SearchFilter};
use kengine::store::{GraphOptions, TagFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ken", about = "A local-first knowledge engine", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./ken.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema if it doesn't already exist.
    Init,

    /// Sync one or all configured collections from disk.
    Sync {
        /// Collection name; omit to sync every configured collection.
        collection: Option<String>,
    },

    /// Write a quick note into a collection and ingest it immediately.
    Capture {
        collection: String,
        #[arg(long)]
        title: Option<String>,
        /// Inline content; mutually exclusive with `--file`.
        #[arg(long)]
        content: Option<String>,
        /// Read content from this file instead of `--content`.
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        rel_path: Option<String>,
    },

    /// Search indexed documents.
    Search {
        query: String,
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0.0)]
        min_score: f32,
        #[arg(long)]
        rerank: bool,
        #[arg(long)]
        expand: bool,
    },

    /// Fetch a document by its `ctx://` URI.
    Get { uri: String },

    /// List a document's outgoing links.
    Links { docid: String },

    /// List tags, optionally scoped to a collection or prefix.
    Tags {
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Assemble the document link graph.
    Graph {
        #[arg(long)]
        collection: Option<String>,
    },

    /// List recent background jobs.
    Jobs,

    /// Drain the embedding backlog with the currently installed port.
    Embed {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum SearchMode {
    Bm25,
    Vector,
    Hybrid,
}

fn find_collection<'a>(collections: &'a [CollectionConfig], name: &str) -> anyhow::Result<&'a CollectionConfig> {
    collections
        .iter()
        .find(|c| kengine::uri::normalize_collection(&c.name) == kengine::uri::normalize_collection(name))
        .ok_or_else(|| anyhow::anyhow!("no such collection: {name}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        let cfg = config::load_config(&cli.config)?;
        kengine::migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let ctx = EngineContext::init(cfg).await?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),

        Commands::Sync { collection } => {
            let max_tokens = ctx.config.chunking.max_tokens;
            let targets: Vec<CollectionConfig> = match &collection {
                Some(name) => vec![find_collection(&ctx.config.collections, name)?.clone()],
                None => ctx.config.collections.clone(),
            };
            let store = ctx.store.clone();
            let id = ctx
                .jobs
                .start_job(JobType::Sync, move || async move {
                    let registry = ConverterRegistry::with_builtins();
                    for c in &targets {
                        let result =
                            ingest::sync_collection(&store, &registry, c, max_tokens, &ingest::IngestOptions::default()).await?;
                        println!(
                            "{}: added {}, updated {}, skipped {}, errors {} ({} ms)",
                            result.collection, result.added, result.updated, result.skipped, result.errors, result.duration_ms
                        );
                        for f in &result.files {
                            if matches!(f.outcome, kengine::models::FileOutcome::Error) {
                                eprintln!("  {}: {}", f.rel_path, f.error_message.as_deref().unwrap_or("unknown error"));
                            }
                        }
                    }
                    Ok("sync completed".to_string())
                })
                .await?;

            let job = ctx.jobs.join(&id).await?;
            if job.status == JobStatus::Failed {
                anyhow::bail!(job.error.unwrap_or_else(|| "sync failed".to_string()));
            }
        }

        Commands::Capture {
            collection,
            title,
            content,
            file,
            rel_path,
        } => {
            let body = match (content, file) {
                (Some(c), None) => c,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
                (None, None) => anyhow::bail!("one of --content or --file is required"),
                (Some(_), Some(_)) => anyhow::bail!("--content and --file are mutually exclusive"),
            };
            let outcome = capture::capture(
                &ctx.store,
                &ctx.lock,
                &ctx.registry,
                &ctx.config.collections,
                ctx.config.chunking.max_tokens,
                10 * 1024 * 1024,
                ctx.lock_timeout(),
                CaptureRequest {
                    collection,
                    title,
                    content: body,
                    rel_path,
                },
            )
            .await?;
            println!("{} ({})", outcome.uri, if outcome.created { "created" } else { "overwritten" });
        }

        Commands::Search {
            query,
            mode,
            collection,
            limit,
            min_score,
            rerank,
            expand,
        } => {
            let filter = SearchFilter {
                collection,
                tags_all: vec![],
                tags_any: vec![],
            };
            let port_guard = ctx.embedding_port.lock().await;
            match mode {
                SearchMode::Bm25 => {
                    let hits = bm25::search(&ctx.store, &query, &bm25::Bm25Options { limit, min_score, filter }).await?;
                    print_hits(&hits);
                }
                SearchMode::Vector => {
                    let hits = vector::search(&ctx.store, port_guard.as_ref(), &query, &vector::VectorOptions { limit, min_score, filter }).await?;
                    print_hits(&hits);
                }
                SearchMode::Hybrid => {
                    let result = hybrid::search(
                        &ctx.store,
                        &query,
                        Some(port_guard.as_ref()),
                        None,
                        None,
                        &hybrid::HybridOptions {
                            limit,
                            min_score,
                            alpha: ctx.config.retrieval.hybrid_alpha as f32,
                            filter,
                            expand_query: expand,
                            rerank,
                        },
                    )
                    .await?;
                    println!("mode={} expanded={} reranked={} vectors_used={}", result.meta.mode, result.meta.expanded, result.meta.reranked, result.meta.vectors_used);
                    print_hits(&result.hits);
                }
            }
        }

        Commands::Get { uri } => match ctx.store.get_document_by_uri(&uri).await? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
            None => anyhow::bail!("not found: {uri}"),
        },

        Commands::Links { docid } => {
            let links = ctx.store.get_links_for_doc(&docid).await?;
            println!("{}", serde_json::to_string_pretty(&links)?);
        }

        Commands::Tags { collection, prefix } => {
            let counts = ctx.store.get_tag_counts(&TagFilter { collection, prefix }).await?;
            for c in counts {
                println!("{}\t{}", c.count, c.tag);
            }
        }

        Commands::Graph { collection } => {
            let graph = ctx
                .store
                .get_graph(&GraphOptions {
                    collection,
                    ..Default::default()
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }

        Commands::Jobs => {
            let jobs = ctx.jobs.list_jobs(20).await?;
            for j in jobs {
                println!("{}\t{}\t{}", j.id, j.job_type.as_str(), j.status.as_str());
            }
        }

        Commands::Embed { limit } => {
            let mut cfg = ctx.config.embedding.clone();
            if let Some(l) = limit {
                cfg.batch_size = l;
            }
            let store = ctx.store.clone();
            let port = ctx.embedding_port.clone();
            let id = ctx
                .jobs
                .start_job(JobType::Embed, move || async move {
                    let guard = port.lock().await;
                    let result = kengine::embed::drain_backlog(&store, guard.as_ref(), &cfg).await?;
                    let summary = format!("attempted={} embedded={} failed={}", result.attempted, result.embedded, result.failed);
                    println!("{summary}");
                    Ok(summary)
                })
                .await?;

            let job = ctx.jobs.join(&id).await?;
            if job.status == JobStatus::Failed {
                anyhow::bail!(job.error.unwrap_or_else(|| "embed failed".to_string()));
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

fn print_hits(hits: &[kengine::search::SearchHit]) {
    for h in hits {
        println!("{:.3}\t{}\t{}", h.score, h.uri, h.snippet.replace('\n', " "));
    }
    if hits.is_empty() {
        println!("no results");
    }
}
