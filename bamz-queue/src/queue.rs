//! Durable job queue stored in `bamz_worker.jobs`.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, NewJob};
use async_trait::async_trait;
use bamz_db::{ConnectionProvider, CredentialSet, DbError, SqlRow};
use bamz_log::debug;
use std::sync::Arc;
use std::time::Duration;

const ENQUEUE: &str = "INSERT INTO bamz_worker.jobs (task_identifier, payload, max_attempts) \
     VALUES ($1, $2::jsonb, $3::integer) RETURNING id::text AS id";

const CLAIM: &str = "UPDATE bamz_worker.jobs SET attempts = attempts + 1, locked_at = now(), locked_by = $1 \
     WHERE id = (SELECT id FROM bamz_worker.jobs \
     WHERE (locked_at IS NULL OR locked_at < now() - make_interval(secs => $2::float8)) \
     AND run_at <= now() AND attempts < max_attempts \
     ORDER BY priority DESC, run_at, id LIMIT 1 FOR UPDATE SKIP LOCKED) \
     RETURNING id::text AS id, task_identifier, payload::text AS payload, \
     attempts::text AS attempts, max_attempts::text AS max_attempts";

const RELEASE: &str = "UPDATE bamz_worker.jobs SET locked_by = NULL, locked_at = NULL \
     WHERE starts_with(locked_by, $1)";

const COMPLETE: &str = "DELETE FROM bamz_worker.jobs WHERE id = $1::bigint";

const FAIL: &str = "UPDATE bamz_worker.jobs SET locked_at = NULL, locked_by = NULL, last_error = $2, \
     run_at = now() + make_interval(secs => $3::float8) WHERE id = $1::bigint";

/// Where workers get their jobs from.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Database the queue lives in.
    fn database(&self) -> &str;

    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId>;

    /// Claim the next ready job for `worker_id`, bumping its attempt count.
    async fn claim(&self, worker_id: &str) -> QueueResult<Option<Job>>;

    /// The job succeeded; remove it.
    async fn complete(&self, id: JobId) -> QueueResult<()>;

    /// The job failed; unlock it and retry after `retry_in`.
    async fn fail(&self, id: JobId, error: &str, retry_in: Duration) -> QueueResult<()>;

    /// Unlock every job whose lock holder starts with `worker_prefix`,
    /// without touching attempts. Returns the number of rows unlocked.
    async fn release(&self, worker_prefix: &str) -> QueueResult<u64>;
}

/// How long a claimed job may stay locked before any worker can take it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// [`JobQueue`] over one database's `bamz_worker.jobs` table.
#[derive(Clone)]
pub struct PgJobQueue {
    connections: Arc<dyn ConnectionProvider>,
    credentials: CredentialSet,
    lock_timeout: Duration,
}

impl PgJobQueue {
    pub fn new(connections: Arc<dyn ConnectionProvider>, credentials: CredentialSet) -> Self {
        Self {
            connections,
            credentials,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Locks older than `lock_timeout` belong to a dead worker and are reclaimed.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }
}

fn parse_job(row: &SqlRow) -> QueueResult<Job> {
    let number = |column: &str| -> QueueResult<i64> {
        let raw = row.require(column)?;
        raw.parse()
            .map_err(|_| DbError::query(None, format!("bad {} value {:?}", column, raw)).into())
    };

    Ok(Job {
        id: number("id")?,
        task: row.require("task_identifier")?.to_string(),
        payload: serde_json::from_str(row.require("payload")?)?,
        attempts: u32::try_from(number("attempts")?).unwrap_or_default(),
        max_attempts: u32::try_from(number("max_attempts")?).unwrap_or_default(),
    })
}

#[async_trait]
impl JobQueue for PgJobQueue {
    fn database(&self) -> &str {
        self.credentials.database()
    }

    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId> {
        let payload = serde_json::to_string(&job.payload)?;
        let max_attempts = job.max_attempts.to_string();
        let mut connection = self.connections.acquire(&self.credentials).await?;
        let row = connection
            .fetch_optional(ENQUEUE, &[job.task.as_str(), payload.as_str(), max_attempts.as_str()])
            .await?
            .ok_or_else(|| DbError::query(None, "enqueue returned no id"))?;

        let id = row
            .require("id")?
            .parse()
            .map_err(|_| QueueError::Payload("job id is not a number".to_string()))?;
        debug!(
            target: "bamz::queue",
            "Queued job {} ({}) in {}",
            id,
            job.task,
            self.database()
        );
        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        let stale_after = self.lock_timeout.as_secs_f64().to_string();
        let mut connection = self.connections.acquire(&self.credentials).await?;
        match connection
            .fetch_optional(CLAIM, &[worker_id, stale_after.as_str()])
            .await?
        {
            Some(row) => parse_job(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn complete(&self, id: JobId) -> QueueResult<()> {
        let id = id.to_string();
        let mut connection = self.connections.acquire(&self.credentials).await?;
        connection.execute(COMPLETE, &[id.as_str()]).await?;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str, retry_in: Duration) -> QueueResult<()> {
        let id = id.to_string();
        let delay = retry_in.as_secs_f64().to_string();
        let mut connection = self.connections.acquire(&self.credentials).await?;
        connection
            .execute(FAIL, &[id.as_str(), error, delay.as_str()])
            .await?;
        Ok(())
    }

    async fn release(&self, worker_prefix: &str) -> QueueResult<u64> {
        let mut connection = self.connections.acquire(&self.credentials).await?;
        let released = connection.execute(RELEASE, &[worker_prefix]).await?;
        if released > 0 {
            debug!(
                target: "bamz::queue",
                "Unlocked {} jobs held by {} in {}",
                released,
                worker_prefix,
                self.database()
            );
        }
        Ok(released)
    }
}

impl std::fmt::Debug for PgJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgJobQueue")
            .field("database", &self.credentials.database())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}
