use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use uuid::Uuid;

use crate::{
    document::{DocumentId, DocumentMetadata},
    extract::FileType,
    queue::{EnqueueOutcome, JobState, ModerationJob, QueueStats},
    Error, Result,
};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS moderation_jobs (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_type TEXT,
    metadata TEXT NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at INTEGER NOT NULL,
    available_at INTEGER NOT NULL,
    started_at INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_document
    ON moderation_jobs(document_id)
    WHERE state IN ('queued', 'in_progress', 'retry_wait');

CREATE INDEX IF NOT EXISTS idx_jobs_ready ON moderation_jobs(state, available_at);
CREATE INDEX IF NOT EXISTS idx_jobs_document ON moderation_jobs(document_id);
"#;

const JOB_COLUMNS: &str =
    "id, document_id, file_path, file_type, metadata, state, attempt, last_error, enqueued_at";

type JobRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    Option<String>,
    i64,
);

/// How long a claimed job may stay `in_progress` before another worker may take it.
const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Durable job table backing the moderation queue.
pub struct JobStore {
    pool: Pool<Sqlite>,
    lease: Duration,
}

impl JobStore {
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            lease: DEFAULT_LEASE,
        })
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            lease: DEFAULT_LEASE,
        })
    }

    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Insert a job unless its document already has one queued, running or waiting to retry.
    pub async fn enqueue(&self, job: &ModerationJob) -> Result<EnqueueOutcome> {
        let metadata_json = serde_json::to_string(&job.metadata)?;
        let now = Utc::now().timestamp_millis();

        loop {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO moderation_jobs
                    (id, document_id, file_path, file_type, metadata, state, attempt,
                     enqueued_at, available_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                "#,
            )
            .bind(job.id.to_string())
            .bind(job.document_id.as_str())
            .bind(job.file_path.to_string_lossy().into_owned())
            .bind(job.file_type.map(|t| t.as_str()))
            .bind(&metadata_json)
            .bind(JobState::Queued.as_str())
            .bind(job.enqueued_at.timestamp_millis())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(EnqueueOutcome::Enqueued(job.id));
            }

            // The active job may have finished between the insert and this lookup.
            if let Some(existing) = self.active_job_id(&job.document_id).await? {
                return Ok(EnqueueOutcome::Duplicate(existing));
            }
        }
    }

    async fn active_job_id(&self, document_id: &DocumentId) -> Result<Option<Uuid>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM moderation_jobs
            WHERE document_id = ? AND state IN ('queued', 'in_progress', 'retry_wait')
            "#,
        )
        .bind(document_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id,)| parse_uuid(&id)).transpose()
    }

    pub async fn get_job(&self, id: Uuid) -> Result<ModerationJob> {
        let row: JobRow = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM moderation_jobs WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::JobNotFound(id))?;

        parse_job_row(row)
    }

    /// Atomically move the oldest ready job to `in_progress` and return it.
    ///
    /// A job whose claim is older than the lease counts as ready again; its
    /// worker failed to record an outcome. Reclaiming does not use up an attempt.
    pub async fn claim_next(&self) -> Result<Option<ModerationJob>> {
        let now = Utc::now().timestamp_millis();
        let lease = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX);
        let stale_before = now.saturating_sub(lease);

        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE moderation_jobs
            SET state = 'in_progress', started_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM moderation_jobs
                WHERE (state IN ('queued', 'retry_wait') AND available_at <= ?)
                   OR (state = 'in_progress' AND started_at <= ?)
                ORDER BY available_at, enqueued_at
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        row.map(parse_job_row).transpose()
    }

    /// Remove a finished job.
    pub async fn complete(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM moderation_jobs WHERE id = ? AND state = 'in_progress'")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }

        Ok(())
    }

    pub async fn schedule_retry(
        &self,
        id: Uuid,
        attempt: u32,
        available_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_jobs
            SET state = 'retry_wait', attempt = ?, available_at = ?, last_error = ?,
                started_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'in_progress'
            "#,
        )
        .bind(i64::from(attempt))
        .bind(available_at.timestamp_millis())
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }

        Ok(())
    }

    /// Move a running job to the dead set. Returns false if it was not running.
    pub async fn mark_dead(&self, id: Uuid, attempt: u32, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_jobs
            SET state = 'dead', attempt = ?, last_error = ?, started_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'in_progress'
            "#,
        )
        .bind(i64::from(attempt))
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a job that has not started yet. Running jobs are left alone.
    pub async fn cancel(&self, document_id: &DocumentId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM moderation_jobs
            WHERE document_id = ? AND state IN ('queued', 'retry_wait')
            "#,
        )
        .bind(document_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Requeue the most recent dead job for a document with a fresh attempt budget.
    pub async fn revive(&self, document_id: &DocumentId) -> Result<Uuid> {
        let now = Utc::now().timestamp_millis();

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE moderation_jobs
            SET state = 'queued', attempt = 0, available_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM moderation_jobs
                WHERE document_id = ? AND state = 'dead'
                ORDER BY updated_at DESC
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(document_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return Error::InvalidJobState(format!(
                        "document {document_id} already has an active job"
                    ));
                }
            }
            Error::Database(e)
        })?;

        let (id,) = row.ok_or_else(|| Error::DeadJobNotFound(document_id.to_string()))?;
        parse_uuid(&id)
    }

    /// Return jobs orphaned by a previous process to the queue.
    pub async fn recover_in_progress(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_jobs
            SET state = 'queued', started_at = NULL, updated_at = ?
            WHERE state = 'in_progress'
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn dead_jobs(&self) -> Result<Vec<ModerationJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM moderation_jobs WHERE state = 'dead' ORDER BY updated_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_job_row).collect()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM moderation_jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            let count = u64::try_from(count).unwrap_or_default();
            match state.parse::<JobState>()? {
                JobState::Queued => stats.queued = count,
                JobState::InProgress => stats.in_progress = count,
                JobState::RetryWait => stats.retry_wait = count,
                JobState::Dead => stats.dead = count,
            }
        }

        Ok(stats)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_uuid(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| Error::InvalidJobState(format!("invalid job id: {id}")))
}

fn parse_job_row(row: JobRow) -> Result<ModerationJob> {
    let (id, document_id, file_path, file_type, metadata, state, attempt, last_error, enqueued_at) =
        row;

    let metadata: DocumentMetadata = serde_json::from_str(&metadata)?;
    let file_type = file_type.map(|t| t.parse::<FileType>()).transpose()?;

    Ok(ModerationJob {
        id: parse_uuid(&id)?,
        document_id: DocumentId::new(document_id),
        file_path: PathBuf::from(file_path),
        file_type,
        metadata,
        enqueued_at: DateTime::from_timestamp_millis(enqueued_at).unwrap_or_default(),
        attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
        state: state.parse()?,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn job(document: &str) -> ModerationJob {
        ModerationJob::new(
            document.into(),
            Path::new("/uploads").join(format!("{document}.pdf")),
            DocumentMetadata::new("pdf"),
        )
    }

    #[tokio::test]
    async fn test_enqueue_and_claim() {
        let store = JobStore::open_memory().await.unwrap();
        let job = job("doc-1");

        let outcome = store.enqueue(&job).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Enqueued(job.id));

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::InProgress);
        assert_eq!(claimed.file_type, Some(FileType::Pdf));
        assert_eq!(claimed.metadata.file_name.as_deref(), Some("doc-1.pdf"));

        assert!(store.claim_next().await.unwrap().is_none());

        store.complete(job.id).await.unwrap();
        assert!(matches!(store.get_job(job.id).await, Err(Error::JobNotFound(_))));
        assert_eq!(store.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_duplicate_document_is_ignored() {
        let store = JobStore::open_memory().await.unwrap();
        let first = job("doc-1");
        let second = job("doc-1");

        store.enqueue(&first).await.unwrap();
        let outcome = store.enqueue(&second).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Duplicate(first.id));

        // Still a duplicate while running
        store.claim_next().await.unwrap().unwrap();
        assert!(store.enqueue(&second).await.unwrap().is_duplicate());

        // Allowed again once the first job is done
        store.complete(first.id).await.unwrap();
        assert_eq!(
            store.enqueue(&second).await.unwrap(),
            EnqueueOutcome::Enqueued(second.id)
        );
    }

    #[tokio::test]
    async fn test_retry_respects_available_at() {
        let store = JobStore::open_memory().await.unwrap();
        let job = job("doc-1");
        store.enqueue(&job).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        store.schedule_retry(job.id, 1, later, "boom").await.unwrap();
        assert!(store.claim_next().await.unwrap().is_none());

        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.state, JobState::RetryWait);
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));

        let job2 = self::job("doc-2");
        store.enqueue(&job2).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        let earlier = Utc::now() - chrono::Duration::seconds(1);
        store.schedule_retry(job2.id, 1, earlier, "flaky").await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job2.id);
        assert_eq!(claimed.attempt, 1);
    }

    #[tokio::test]
    async fn test_dead_and_revive() {
        let store = JobStore::open_memory().await.unwrap();
        let job = job("doc-1");
        store.enqueue(&job).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        assert!(store.mark_dead(job.id, 3, "corrupt file").await.unwrap());
        assert!(!store.mark_dead(job.id, 3, "corrupt file").await.unwrap());

        let dead = store.dead_jobs().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("corrupt file"));
        assert_eq!(store.stats().await.unwrap().dead, 1);

        let revived = store.revive(&job.document_id).await.unwrap();
        assert_eq!(revived, job.id);
        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.state, JobState::Queued);
        assert_eq!(stored.attempt, 0);

        assert!(matches!(
            store.revive(&job.document_id).await,
            Err(Error::DeadJobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revive_blocked_by_active_job() {
        let store = JobStore::open_memory().await.unwrap();
        let dead = job("doc-1");
        store.enqueue(&dead).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        store.mark_dead(dead.id, 1, "bad").await.unwrap();

        store.enqueue(&job("doc-1")).await.unwrap();
        assert!(matches!(
            store.revive(&dead.document_id).await,
            Err(Error::InvalidJobState(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_only_waiting_jobs() {
        let store = JobStore::open_memory().await.unwrap();
        let running = job("doc-1");
        store.enqueue(&running).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        assert!(!store.cancel(&running.document_id).await.unwrap());

        let waiting = job("doc-2");
        store.enqueue(&waiting).await.unwrap();
        assert!(store.cancel(&waiting.document_id).await.unwrap());
        assert!(matches!(store.get_job(waiting.id).await, Err(Error::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_recover_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let path = path.to_str().unwrap();

        let job = job("doc-1");
        {
            let store = JobStore::open(path).await.unwrap();
            store.enqueue(&job).await.unwrap();
            store.claim_next().await.unwrap().unwrap();
            store.close().await;
        }

        let store = JobStore::open(path).await.unwrap();
        assert_eq!(store.stats().await.unwrap().in_progress, 1);
        assert_eq!(store.recover_in_progress().await.unwrap(), 1);

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn test_stale_claim_is_reclaimed_after_lease() {
        let store = JobStore::open_memory()
            .await
            .unwrap()
            .with_lease(Duration::from_millis(50));
        let job = job("doc-1");
        store.enqueue(&job).await.unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.id, job.id);
        assert!(store.claim_next().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;

        let reclaimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempt, 0);
        assert_eq!(store.stats().await.unwrap().in_progress, 1);

        store.complete(job.id).await.unwrap();
        assert_eq!(store.stats().await.unwrap().active(), 0);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        let store = JobStore::open(path.to_str().unwrap()).await.unwrap();
        assert!(path.exists());
        store.close().await;
    }

    #[tokio::test]
    async fn test_unsupported_type_round_trips() {
        let store = JobStore::open_memory().await.unwrap();
        let job = ModerationJob::new(
            "doc-x".into(),
            PathBuf::from("/uploads/tool.exe"),
            DocumentMetadata::new("exe"),
        );
        store.enqueue(&job).await.unwrap();

        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.file_type, None);
        assert_eq!(stored.metadata.file_type, "exe");
    }
}
