//! The typed error taxonomy surfaced across every component.
//!
//! Internal code returns `Result<T, EngineError>`; the CLI boundary wraps
//! these in `anyhow::Result` for display, same as the rest of the crate.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    Locked,
    JobConflict,
    NotFound,
    InvalidPath,
    InvalidInput,
    Duplicate,
    Conflict,
    HasReferences,
    TooLarge,
    Corrupt,
    AdapterError,
    ModelNotFound,
    IngestError,
    Runtime,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Locked => "LOCKED",
            ErrorKind::JobConflict => "JOB_CONFLICT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidPath => "INVALID_PATH",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::HasReferences => "HAS_REFERENCES",
            ErrorKind::TooLarge => "TOO_LARGE",
            ErrorKind::Corrupt => "CORRUPT",
            ErrorKind::AdapterError => "ADAPTER_ERROR",
            ErrorKind::ModelNotFound => "MODEL_NOT_FOUND",
            ErrorKind::IngestError => "INGEST_ERROR",
            ErrorKind::Runtime => "RUNTIME",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The crate-wide error type. Every fallible operation that crosses a
/// component boundary returns this, so the kind survives up to the CLI
/// and the (out-of-scope) tool/HTTP adapters that parse `CODE: message`.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(kind: ErrorKind, message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Parse the `CODE: message` envelope used at the tool/HTTP boundary.
    pub fn parse_envelope(s: &str) -> Option<(&str, &str)> {
        s.split_once(": ")
    }
}

macro_rules! kind_ctor {
    ($fn_name:ident, $kind:ident) => {
        impl EngineError {
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        }
    };
}

kind_ctor!(locked, Locked);
kind_ctor!(job_conflict, JobConflict);
kind_ctor!(not_found, NotFound);
kind_ctor!(invalid_path, InvalidPath);
kind_ctor!(invalid_input, InvalidInput);
kind_ctor!(duplicate, Duplicate);
kind_ctor!(conflict, Conflict);
kind_ctor!(has_references, HasReferences);
kind_ctor!(too_large, TooLarge);
kind_ctor!(corrupt, Corrupt);
kind_ctor!(adapter_error, AdapterError);
kind_ctor!(model_not_found, ModelNotFound);
kind_ctor!(ingest_error, IngestError);
kind_ctor!(runtime, Runtime);

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::with_source(ErrorKind::Runtime, "store operation failed", e.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::with_source(ErrorKind::Runtime, "I/O operation failed", e.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let e = EngineError::invalid_path("relPath escapes root");
        let rendered = e.to_string();
        let (code, msg) = EngineError::parse_envelope(&rendered).unwrap();
        assert_eq!(code, "INVALID_PATH");
        assert_eq!(msg, "relPath escapes root");
    }

    #[test]
    fn kind_codes_match_taxonomy() {
        assert_eq!(ErrorKind::Locked.code(), "LOCKED");
        assert_eq!(ErrorKind::JobConflict.code(), "JOB_CONFLICT");
        assert_eq!(ErrorKind::IngestError.code(), "INGEST_ERROR");
    }
}
