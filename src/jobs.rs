//! Background job lifecycle: at most one running job per process.
//!
//! `JobManager` records every job in the store, but the at-most-one
//! invariant is enforced in-process (a job started moments ago may not
//! have its `status=running` row committed yet when a second start
//! request races in). `startJob` acquires the FileLock itself;
//! `startJobWithLock` is for callers — like Capture — that already
//! hold it.

use crate::config::LockingConfig;
use crate::error::{EngineError, Result};
use crate::lock::{FileLock, FileLockGuard};
use crate::models::{Job, JobStatus, JobType};
use crate::store::Store;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct JobManager {
    store: Store,
    lock: FileLock,
    config: LockingConfig,
    server_instance_id: String,
    running: Arc<AtomicBool>,
}

impl JobManager {
    pub fn new(store: Store, lock_path: impl Into<std::path::PathBuf>, config: LockingConfig) -> Self {
        Self {
            store,
            lock: FileLock::new(lock_path),
            config,
            server_instance_id: Uuid::new_v4().to_string(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquires the FileLock, registers a new running job, hands the
    /// lock to the job for its duration, and returns the job id
    /// immediately — the job itself continues running in the
    /// background.
    pub async fn start_job<F, Fut>(&self, job_type: JobType, work: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            let active = self.find_active_job_id().await?;
            return Err(EngineError::job_conflict(format!(
                "a job is already running: {}",
                active.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        let id = Uuid::new_v4().to_string();
        let guard = match self.lock.acquire(&id, Duration::from_secs(self.config.timeout_secs)) {
            Ok(g) => g,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.run_with_lock(id.clone(), job_type, guard, work).await?;
        Ok(id)
    }

    /// Variant for callers that already hold the FileLock (e.g.
    /// Capture, which needs the lock before it even knows whether it
    /// will invoke the Ingestor as a job).
    pub async fn start_job_with_lock<F, Fut>(&self, job_type: JobType, lock: FileLockGuard, work: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            let active = self.find_active_job_id().await?;
            return Err(EngineError::job_conflict(format!(
                "a job is already running: {}",
                active.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        let id = Uuid::new_v4().to_string();
        self.run_with_lock(id.clone(), job_type, lock, work).await?;
        Ok(id)
    }

    async fn run_with_lock<F, Fut>(&self, id: String, job_type: JobType, guard: FileLockGuard, work: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let job = Job {
            id: id.clone(),
            job_type,
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            server_instance_id: self.server_instance_id.clone(),
        };
        self.store.insert_job(&job).await?;

        let store = self.store.clone();
        let running = self.running.clone();
        let ttl = self.config.job_ttl_secs as i64;
        let cap = self.config.job_cap as i64;

        tokio::spawn(async move {
            let outcome = work().await;
            // The lock is released here regardless of outcome.
            drop(guard);
            match outcome {
                Ok(result) => {
                    let _ = store.finish_job(&id, JobStatus::Completed, Some(result), None).await;
                }
                Err(e) => {
                    let _ = store.finish_job(&id, JobStatus::Failed, None, Some(e.to_string())).await;
                }
            }
            running.store(false, Ordering::SeqCst);
            let _ = store.evict_stale_jobs(ttl, cap).await;
        });

        Ok(())
    }

    async fn find_active_job_id(&self) -> Result<Option<String>> {
        let jobs = self.store.list_jobs(10).await?;
        Ok(jobs.into_iter().find(|j| j.status == JobStatus::Running).map(|j| j.id))
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.store.list_jobs(limit).await
    }

    /// Best-effort: waits for the in-process running flag to clear,
    /// never cancels an in-flight job.
    pub async fn shutdown(&self) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Polls until `id`'s row leaves `running`, then returns it.
    /// Callers that need a job's outcome before moving on (the CLI,
    /// printing a sync/embed summary) use this instead of `shutdown`,
    /// which only waits for whichever job is currently in flight.
    pub async fn join(&self, id: &str) -> Result<Job> {
        loop {
            match self.store.get_job(id).await? {
                Some(job) if job.status != JobStatus::Running => return Ok(job),
                Some(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                None => return Err(EngineError::not_found(format!("no such job: {id}"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_store;

    fn config() -> LockingConfig {
        LockingConfig {
            timeout_secs: 1,
            job_ttl_secs: 3600,
            job_cap: 100,
        }
    }

    #[tokio::test]
    async fn second_concurrent_job_is_rejected() {
        let (store, dir) = test_store().await;
        let manager = JobManager::new(store, dir.path().join("lock"), config());

        let id1 = manager
            .start_job(JobType::Sync, || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("done".to_string())
            })
            .await
            .unwrap();

        let result = manager.start_job(JobType::Sync, || async { Ok("done".to_string()) }).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::JobConflict);

        manager.shutdown().await;
        let job = manager.get_job(&id1).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failed_job_releases_lock_and_records_error() {
        let (store, dir) = test_store().await;
        let manager = JobManager::new(store, dir.path().join("lock"), config());

        let id = manager
            .start_job(JobType::Embed, || async { Err(EngineError::runtime("boom")) })
            .await
            .unwrap();

        manager.shutdown().await;
        let job = manager.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("boom"));

        // a fresh job must now be startable: the lock was released.
        let id2 = manager.start_job(JobType::Embed, || async { Ok("ok".to_string()) }).await.unwrap();
        manager.shutdown().await;
        assert_ne!(id, id2);
    }
}
