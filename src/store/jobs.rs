use super::Store;
use crate::error::Result;
use crate::models::{Job, JobStatus, JobType};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Job {
    let job_type = match row.get::<String, _>("job_type").as_str() {
        "add" => JobType::Add,
        "sync" => JobType::Sync,
        "index" => JobType::Index,
        _ => JobType::Embed,
    };
    let status = match row.get::<String, _>("status").as_str() {
        "running" => JobStatus::Running,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Completed,
    };
    Job {
        id: row.get("id"),
        job_type,
        status,
        started_at: Utc.timestamp_opt(row.get("started_at"), 0).single().unwrap_or_else(Utc::now),
        completed_at: row
            .get::<Option<i64>, _>("completed_at")
            .and_then(|t| Utc.timestamp_opt(t, 0).single()),
        result: row.get("result"),
        error: row.get("error"),
        server_instance_id: row.get("server_instance_id"),
    }
}

impl Store {
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, status, started_at, completed_at, result, error, server_instance_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.started_at.timestamp())
        .bind(job.completed_at.map(|t: DateTime<Utc>| t.timestamp()))
        .bind(&job.result)
        .bind(&job.error)
        .bind(&job.server_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_job(&self, id: &str, status: JobStatus, result: Option<String>, error: Option<String>) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, completed_at = ?, result = ?, error = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(result)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(row_to_job))
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    pub async fn count_running_jobs(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Evicts completed/failed jobs older than `ttl_secs`, then trims
    /// down to `cap` (oldest first) if still over.
    pub async fn evict_stale_jobs(&self, ttl_secs: i64, cap: i64) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - ttl_secs;
        let mut evicted = sqlx::query(
            "DELETE FROM jobs WHERE status != 'running' AND COALESCE(completed_at, started_at) < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs").fetch_one(&self.pool).await?;
        if total > cap {
            let overflow = total - cap;
            let result = sqlx::query(
                r#"
                DELETE FROM jobs WHERE id IN (
                    SELECT id FROM jobs WHERE status != 'running'
                    ORDER BY started_at ASC LIMIT ?
                )
                "#,
            )
            .bind(overflow)
            .execute(&self.pool)
            .await?;
            evicted += result.rows_affected();
        }
        Ok(evicted)
    }
}
