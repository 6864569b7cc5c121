//! # Knowledge Engine
//!
//! A local-first knowledge engine: ingestion, content-addressed storage,
//! wiki/Markdown link resolution, and hybrid (keyword + vector)
//! retrieval over a corpus of Markdown and plain-text documents.
//!
//! ## Architecture
//!
//! ```text
//! Collections (fs) ──▶ Ingestor ──▶ Store (SQLite + content blobs)
//!                         │                    │
//!                         ▼                    ▼
//!                     LinkEngine           Chunker ──▶ Embedder (optional)
//!                                               │
//!                                               ▼
//!                                   BM25 / VectorSearch / Hybrid
//! ```
//!
//! ## Data Flow
//!
//! 1. [`ingest`] walks a collection's root, converts each file to
//!    canonical Markdown via a [`convert::Converter`], and writes it as
//!    a content-addressed blob through [`store`].
//! 2. [`chunk`] splits canonical Markdown into paragraph-bounded pieces
//!    carrying their original line span.
//! 3. [`links`] extracts wiki and Markdown links from the
//!    pre-canonicalization source; resolution against other documents
//!    happens at query time, not at ingest time.
//! 4. [`embed`] drains the resulting vector backlog through whichever
//!    [`embed::EmbeddingPort`] is installed — embedding is always
//!    optional and never blocks ingestion.
//! 5. [`search`] answers BM25, vector, and hybrid queries against the
//!    store, degrading to `bm25_only` when no embedding port is usable.
//! 6. [`capture`] is the quick-note write path: it writes a file under
//!    a collection's root and funnels it through the same ingest
//!    pipeline as any other sync.
//!
//! [`context::EngineContext`] owns every long-lived resource (the
//! connection pool, the [`lock::FileLock`], the [`jobs::JobManager`],
//! the installed embedding port) and is constructed once at startup.

pub mod capture;
pub mod chunk;
pub mod config;
pub mod context;
pub mod convert;
pub mod db;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod links;
pub mod lock;
pub mod migrate;
pub mod models;
pub mod search;
pub mod store;
pub mod toolmutex;
pub mod uri;
