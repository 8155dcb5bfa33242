use crate::database::DbPool;
use crate::models::IngestJob;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::debug;

/// Job name carried on the queue wire format.
pub const INGEST_JOB_NAME: &str = "ingest-pdf";

/// Payload published on the notification channel when a job is enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNotification {
    pub job_id: i64,
    pub job_name: String,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub attempts: i32,
    pub max_attempts: i32,
    pub payload: IngestJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying,
    Dead,
}

/// Durable at-least-once work queue backed by the `ingest_jobs` table.
///
/// Enqueued jobs survive process restarts; a job may be delivered more than
/// once (worker crash mid-processing brings it back via `recover_stale`), so
/// processing must be safe to repeat. No ordering guarantee across jobs.
#[derive(Clone)]
pub struct JobQueue {
    pool: DbPool,
    channel: String,
}

impl JobQueue {
    pub fn new(pool: DbPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Insert a job and wake any listening worker via pg_notify.
    pub async fn enqueue(
        &self,
        job_name: &str,
        payload: &IngestJob,
        max_attempts: i32,
    ) -> Result<i64> {
        let payload_json = serde_json::to_value(payload)?;

        let row = sqlx::query(
            r#"INSERT INTO ingest_jobs (job_name, payload, max_attempts)
               VALUES ($1, $2, $3)
               RETURNING id"#,
        )
        .bind(job_name)
        .bind(&payload_json)
        .bind(max_attempts)
        .fetch_one(self.pool.get_pool())
        .await?;

        let job_id: i64 = row.get("id");

        let notification = serde_json::to_string(&JobNotification {
            job_id,
            job_name: job_name.to_string(),
        })?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&notification)
            .execute(self.pool.get_pool())
            .await?;

        debug!("Enqueued job {} ({})", job_id, job_name);

        Ok(job_id)
    }

    /// Claim the next pending job, marking it running and counting the
    /// attempt. SKIP LOCKED keeps concurrent consumers from colliding.
    pub async fn claim(&self, job_name: &str) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            r#"UPDATE ingest_jobs
               SET status = 'running', attempts = attempts + 1, updated_at = now()
               WHERE id = (
                   SELECT id FROM ingest_jobs
                   WHERE job_name = $1 AND status = 'pending'
                   ORDER BY id
                   FOR UPDATE SKIP LOCKED
                   LIMIT 1
               )
               RETURNING id, attempts, max_attempts, payload"#,
        )
        .bind(job_name)
        .fetch_optional(self.pool.get_pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload_json: serde_json::Value = row.get("payload");
        let payload: IngestJob = serde_json::from_value(payload_json)?;

        Ok(Some(ClaimedJob {
            id: row.get("id"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            payload,
        }))
    }

    pub async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_jobs SET status = 'completed', updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Record a failure: back to pending while attempts remain, otherwise
    /// the job moves to the dead-letter state.
    pub async fn fail(&self, job_id: i64, error: &str) -> Result<FailureOutcome> {
        let row = sqlx::query(
            r#"UPDATE ingest_jobs
               SET status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'pending' END,
                   last_error = $2,
                   updated_at = now()
               WHERE id = $1
               RETURNING status"#,
        )
        .bind(job_id)
        .bind(error)
        .fetch_one(self.pool.get_pool())
        .await?;

        let status: String = row.get("status");
        Ok(if status == "dead" {
            FailureOutcome::Dead
        } else {
            FailureOutcome::Retrying
        })
    }

    /// Return jobs stuck in `running` past the staleness window to `pending`.
    /// This is the redelivery path after a worker crash.
    pub async fn recover_stale(&self, stale_after_seconds: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE ingest_jobs
               SET status = 'pending', updated_at = now()
               WHERE status = 'running'
                 AND updated_at < now() - ($1::bigint * interval '1 second')"#,
        )
        .bind(stale_after_seconds)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected())
    }
}
