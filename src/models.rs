//! Core data model: the entities described in the data model section —
//! Collection, Document, Chunk, Vector, DocLink, Tag, and Job — plus
//! the row shapes used to move them through the store.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A named root path with inclusion/exclusion globs, config-mutated only.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub root: String,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub active: bool,
}

/// Logical source file within a collection.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub docid: String,
    pub uri: String,
    pub collection: String,
    pub rel_path: String,
    pub title: Option<String>,
    pub language_hint: Option<String>,
    pub source_mime: String,
    pub source_ext: Option<String>,
    pub source_hash: String,
    pub source_size: i64,
    pub source_mtime: i64,
    pub mirror_hash: Option<String>,
    pub converter_id: Option<String>,
    pub converter_version: Option<String>,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A deterministic span of the canonical Markdown for a `mirrorHash`.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub mirror_hash: String,
    pub seq: i64,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub token_count: i64,
}

/// An embedding of a chunk under a named model.
#[derive(Debug, Clone)]
pub struct Vector {
    pub mirror_hash: String,
    pub seq: i64,
    pub model: String,
    pub dimensions: usize,
    pub embedding: Vec<f32>,
}

/// The kind of outgoing link recorded by the LinkEngine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Wiki,
    Markdown,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Wiki => "wiki",
            LinkType::Markdown => "markdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wiki" => Some(LinkType::Wiki),
            "markdown" => Some(LinkType::Markdown),
            _ => None,
        }
    }
}

/// An outgoing link from a document, positioned in the original source
/// (not the canonical Markdown).
#[derive(Debug, Clone, Serialize)]
pub struct DocLink {
    pub source_docid: String,
    pub link_type: LinkType,
    pub target_ref: String,
    pub target_ref_norm: String,
    pub target_collection: Option<String>,
    pub target_anchor: Option<String>,
    pub link_text: Option<String>,
    pub start_line: i64,
    pub start_col: i64,
    pub end_line: i64,
    pub end_col: i64,
}

/// The job kinds owned by the JobManager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Add,
    Sync,
    Index,
    Embed,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Add => "add",
            JobType::Sync => "sync",
            JobType::Index => "index",
            JobType::Embed => "embed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Opaque background task owned by the JobManager.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub server_instance_id: String,
}

/// Per-file outcome of a sync, and the aggregate result for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Added,
    Updated,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSyncResult {
    pub rel_path: String,
    pub outcome: FileOutcome,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CollectionSyncResult {
    pub collection: String,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub duration_ms: u64,
    pub files: Vec<FileSyncResult>,
}
