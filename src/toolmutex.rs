//! Intra-process serialization of mutating operations.
//!
//! `ToolMutex` wraps a `tokio::sync::Mutex<()>` around the shared
//! in-process resources read/write operations touch: the database
//! connection pool and the LLM port session state. Callers acquire a
//! guard and release it on every exit path (the guard's `Drop` makes
//! this automatic); acquisition order determines the total order in
//! which operations' effects become externally visible.

use tokio::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct ToolMutex {
    inner: Mutex<()>,
}

pub struct ToolMutexGuard<'a> {
    _inner: MutexGuard<'a, ()>,
}

impl ToolMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits, unbounded, for the mutex; acquisitions are served in the
    /// order they complete, so callers that finish acquiring first
    /// observe their effects first.
    pub async fn acquire(&self) -> ToolMutexGuard<'_> {
        let guard = self.inner.lock().await;
        ToolMutexGuard { _inner: guard }
    }
}
