//! Job queue implementation.
//!
//! Atomic job claiming via SQL UPDATE ... WHERE for SQLite. Lower
//! priority values run earlier; ties break on creation time. All
//! timestamps are UTC and stored as RFC 3339 text.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(format!(
                "Invalid job status: '{}'. Expected: queued, running, completed, failed, or cancelled",
                s
            )),
        }
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobKind {
    Transcode,
    Move,
    PlanExecute,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcode => "transcode",
            JobKind::Move => "move",
            JobKind::PlanExecute => "plan_execute",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the job queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Uuid,
    pub kind: JobKind,
    pub source_path: String,
    pub target_path: Option<String>,
    pub policy_ref: String,
    /// Lower runs earlier.
    pub priority: i64,
    pub status: JobStatus,
    pub progress_percent: f64,
    /// Free-form structured detail, JSON text.
    pub progress_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_heartbeat_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub cancel_requested: bool,
    pub worker_id: Option<String>,
}

/// Fields a caller supplies when enqueueing.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub source_path: String,
    pub target_path: Option<String>,
    pub policy_ref: String,
    pub priority: i64,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Acknowledged,
    AlreadyTerminal,
    NotFound,
}

/// Counts per status.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vpo_jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    source_path TEXT NOT NULL,
    target_path TEXT,
    policy_ref TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'QUEUED',
    progress_percent REAL NOT NULL DEFAULT 0,
    progress_detail TEXT,
    created_at TEXT NOT NULL,
    claimed_at TEXT,
    finished_at TEXT,
    worker_heartbeat_at TEXT,
    error_message TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    worker_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_vpo_jobs_claim
    ON vpo_jobs (status, priority, created_at);
"#;

/// The job store. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

impl JobStore {
    /// Open (creating if needed) the store at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Raw pool access, for callers needing bespoke queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert a new queued job and return its record.
    pub async fn enqueue(&self, new: NewJob) -> Result<JobRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO vpo_jobs (id, kind, source_path, target_path, policy_ref, priority, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'QUEUED', ?)
            "#,
        )
        .bind(id)
        .bind(new.kind)
        .bind(&new.source_path)
        .bind(&new.target_path)
        .bind(&new.policy_ref)
        .bind(new.priority)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!("Enqueued job {}: {} {}", id, new.kind, new.source_path);
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("job {} vanished after insert", id)))
    }

    /// Atomically claim the next queued job.
    ///
    /// Order: priority ascending, then creation time. The conditional
    /// UPDATE loses cleanly when another worker claims first; we retry
    /// until a claim lands or the queue is empty.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<JobRecord>> {
        loop {
            let candidate: Option<Uuid> = sqlx::query_scalar(
                r#"
                SELECT id FROM vpo_jobs
                WHERE status = 'QUEUED'
                ORDER BY priority ASC, created_at ASC
                LIMIT 1
                "#,
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let now = Utc::now();
            let rows_affected = sqlx::query(
                r#"
                UPDATE vpo_jobs
                SET status = 'RUNNING',
                    claimed_at = ?,
                    worker_heartbeat_at = ?,
                    attempt_count = attempt_count + 1,
                    worker_id = ?
                WHERE id = ? AND status = 'QUEUED'
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(worker_id)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if rows_affected == 0 {
                // Claimed by another worker in between; try the next one.
                continue;
            }

            let job = self.get(id).await?.ok_or_else(|| {
                StoreError::not_found(format!("job {} vanished after claim", id))
            })?;
            info!("Claimed job {}: {} {}", job.id, job.kind, job.source_path);
            return Ok(Some(job));
        }
    }

    /// Heartbeat with piggybacked progress. Progress is clamped to
    /// [0, 100] and never regresses.
    pub async fn heartbeat(
        &self,
        id: Uuid,
        progress_percent: f64,
        progress_detail: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let progress = progress_percent.clamp(0.0, 100.0);
        sqlx::query(
            r#"
            UPDATE vpo_jobs
            SET worker_heartbeat_at = ?,
                progress_percent = MAX(progress_percent, ?),
                progress_detail = COALESCE(?, progress_detail)
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(now)
        .bind(progress)
        .bind(progress_detail)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a job to a terminal state. Terminal states are write-once:
    /// finalizing an already-terminal job is an invalid-state error.
    pub async fn finalize(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(StoreError::invalid_state(format!(
                "finalize requires a terminal status, got {}",
                status
            )));
        }
        let now = Utc::now();
        // A queued job may only go terminal through cancellation; every
        // other terminal transition requires RUNNING.
        let rows_affected = sqlx::query(
            r#"
            UPDATE vpo_jobs
            SET status = ?,
                finished_at = ?,
                error_message = ?,
                progress_percent = CASE WHEN ? = 'COMPLETED' THEN 100.0 ELSE progress_percent END
            WHERE id = ?
              AND (status = 'RUNNING' OR (status = 'QUEUED' AND ? = 'CANCELLED'))
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(error_message)
        .bind(status.as_str())
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::invalid_state(format!(
                "job {} is not active (already terminal or missing)",
                id
            )));
        }
        info!("Job {} finalized as {}", id, status);
        Ok(())
    }

    /// Recovery sweep: requeue RUNNING jobs with stale heartbeats, or
    /// fail them once their attempts are exhausted. Returns the number
    /// of touched rows.
    pub async fn reset_stale(
        &self,
        now: DateTime<Utc>,
        max_stale: Duration,
        max_attempts: i64,
    ) -> Result<u64> {
        let cutoff = now - max_stale;

        let failed = sqlx::query(
            r#"
            UPDATE vpo_jobs
            SET status = 'FAILED',
                finished_at = ?,
                error_message = 'recovery attempts exhausted'
            WHERE status = 'RUNNING'
              AND worker_heartbeat_at < ?
              AND attempt_count >= ?
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE vpo_jobs
            SET status = 'QUEUED',
                claimed_at = NULL,
                worker_heartbeat_at = NULL,
                worker_id = NULL
            WHERE status = 'RUNNING'
              AND worker_heartbeat_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if failed + requeued > 0 {
            info!(
                "Recovery sweep: {} requeued, {} failed (attempts exhausted)",
                requeued, failed
            );
        }
        Ok(failed + requeued)
    }

    /// List jobs, newest first, optionally restricted to one status.
    pub async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<JobRecord>> {
        let jobs = match status {
            Some(status) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM vpo_jobs
                    WHERE status = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM vpo_jobs
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(jobs)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as("SELECT * FROM vpo_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Request cancellation. Queued jobs cancel immediately; running
    /// jobs get a flag the worker observes at its next checkpoint.
    pub async fn cancel_request(&self, id: Uuid) -> Result<CancelOutcome> {
        let now = Utc::now();
        let cancelled = sqlx::query(
            r#"
            UPDATE vpo_jobs
            SET status = 'CANCELLED', finished_at = ?
            WHERE id = ? AND status = 'QUEUED'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if cancelled > 0 {
            info!("Job {} cancelled while queued", id);
            return Ok(CancelOutcome::Acknowledged);
        }

        let flagged = sqlx::query(
            r#"
            UPDATE vpo_jobs
            SET cancel_requested = 1
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if flagged > 0 {
            info!("Job {} flagged for cancellation", id);
            return Ok(CancelOutcome::Acknowledged);
        }

        match self.get(id).await? {
            Some(job) if job.status.is_terminal() => Ok(CancelOutcome::AlreadyTerminal),
            Some(_) => Ok(CancelOutcome::Acknowledged),
            None => Ok(CancelOutcome::NotFound),
        }
    }

    /// Whether a running job has been asked to stop.
    pub async fn cancel_requested(&self, id: Uuid) -> Result<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM vpo_jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    /// Delete terminal records finished before the cutoff. Returns the
    /// number of removed rows.
    pub async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<u64> {
        if statuses.is_empty() {
            return Ok(0);
        }
        if let Some(active) = statuses.iter().find(|s| !s.is_terminal()) {
            return Err(StoreError::invalid_state(format!(
                "cannot purge non-terminal status {}",
                active
            )));
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "DELETE FROM vpo_jobs WHERE finished_at < ? AND status IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(cutoff);
        for status in statuses {
            query = query.bind(*status);
        }
        let removed = query.execute(&self.pool).await?.rows_affected();
        debug!("Purged {} job record(s) older than {}", removed, cutoff);
        Ok(removed)
    }

    /// Queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        let stats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'QUEUED') as queued,
                COUNT(*) FILTER (WHERE status = 'RUNNING') as running,
                COUNT(*) FILTER (WHERE status = 'COMPLETED') as completed,
                COUNT(*) FILTER (WHERE status = 'FAILED') as failed,
                COUNT(*) FILTER (WHERE status = 'CANCELLED') as cancelled
            FROM vpo_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(priority: i64, path: &str) -> NewJob {
        NewJob {
            kind: JobKind::PlanExecute,
            source_path: path.to_string(),
            target_path: None,
            policy_ref: "default.yaml".to_string(),
            priority,
        }
    }

    #[tokio::test]
    async fn claim_empty_queue_returns_none() {
        let store = JobStore::open_in_memory().await.unwrap();
        assert!(store.claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_follows_priority_then_age() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.enqueue(job(5, "/m/low-a.mkv")).await.unwrap();
        store.enqueue(job(1, "/m/high.mkv")).await.unwrap();
        store.enqueue(job(5, "/m/low-b.mkv")).await.unwrap();

        let first = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(first.source_path, "/m/high.mkv");
        assert_eq!(first.status, JobStatus::Running);
        assert_eq!(first.attempt_count, 1);
        assert!(first.claimed_at.is_some());
        assert!(first.worker_heartbeat_at.is_some());

        let second = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(second.source_path, "/m/low-a.mkv");
    }

    #[tokio::test]
    async fn heartbeat_progress_is_monotonic() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.enqueue(job(0, "/m/x.mkv")).await.unwrap();
        let claimed = store.claim_next("w1").await.unwrap().unwrap();

        store.heartbeat(claimed.id, 40.0, Some("{\"step\":1}")).await.unwrap();
        store.heartbeat(claimed.id, 20.0, None).await.unwrap();

        let job = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.progress_percent, 40.0);
        assert_eq!(job.progress_detail.as_deref(), Some("{\"step\":1}"));
    }

    #[tokio::test]
    async fn finalize_is_write_once() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.enqueue(job(0, "/m/x.mkv")).await.unwrap();
        let claimed = store.claim_next("w1").await.unwrap().unwrap();

        store
            .finalize(claimed.id, JobStatus::Completed, None)
            .await
            .unwrap();
        let done = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress_percent, 100.0);
        assert!(done.finished_at.is_some());

        let err = store
            .finalize(claimed.id, JobStatus::Failed, Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[tokio::test]
    async fn stale_running_jobs_are_requeued() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.enqueue(job(0, "/m/x.mkv")).await.unwrap();
        let claimed = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(claimed.attempt_count, 1);

        // Pretend 10 minutes pass with no heartbeat.
        let later = Utc::now() + Duration::minutes(10);
        let touched = store
            .reset_stale(later, Duration::seconds(60), 3)
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let job = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt_count, 1);
        assert!(job.claimed_at.is_none());

        // The next claim increments the attempt count.
        let reclaimed = store.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, claimed.id);
        assert_eq!(reclaimed.attempt_count, 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_on_sweep() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.enqueue(job(0, "/m/x.mkv")).await.unwrap();
        // Burn three attempts.
        for _ in 0..3 {
            let claimed = store.claim_next("w1").await.unwrap().unwrap();
            let later = Utc::now() + Duration::minutes(10);
            store
                .reset_stale(later, Duration::seconds(60), 3)
                .await
                .unwrap();
            if store.get(claimed.id).await.unwrap().unwrap().status == JobStatus::Failed {
                break;
            }
        }
        let jobs = store.list(None, 10).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(
            jobs[0].error_message.as_deref(),
            Some("recovery attempts exhausted")
        );
    }

    #[tokio::test]
    async fn cancel_request_transitions() {
        let store = JobStore::open_in_memory().await.unwrap();
        let queued = store.enqueue(job(0, "/m/a.mkv")).await.unwrap();
        assert_eq!(
            store.cancel_request(queued.id).await.unwrap(),
            CancelOutcome::Acknowledged
        );
        assert_eq!(
            store.get(queued.id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );

        let running = store.enqueue(job(0, "/m/b.mkv")).await.unwrap();
        store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(
            store.cancel_request(running.id).await.unwrap(),
            CancelOutcome::Acknowledged
        );
        assert!(store.cancel_requested(running.id).await.unwrap());
        // Still running until the worker observes the flag.
        assert_eq!(
            store.get(running.id).await.unwrap().unwrap().status,
            JobStatus::Running
        );

        assert_eq!(
            store.cancel_request(queued.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
        assert_eq!(
            store.cancel_request(Uuid::new_v4()).await.unwrap(),
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_records() {
        let store = JobStore::open_in_memory().await.unwrap();
        let done = store.enqueue(job(0, "/m/a.mkv")).await.unwrap();
        store.claim_next("w1").await.unwrap();
        store.finalize(done.id, JobStatus::Completed, None).await.unwrap();
        store.enqueue(job(0, "/m/b.mkv")).await.unwrap();

        let future = Utc::now() + Duration::days(30);
        let removed = store
            .purge_older_than(future, &[JobStatus::Completed, JobStatus::Failed])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.completed, 0);
    }
}
