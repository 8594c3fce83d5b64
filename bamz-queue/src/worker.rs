//! Worker implementation for processing jobs.

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::queue::{DEFAULT_LOCK_TIMEOUT, JobQueue};
use crate::task::{TaskContext, TaskRegistry};
use bamz_log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent jobs to process
    pub concurrency: usize,

    /// Poll interval for checking new jobs
    pub poll_interval: Duration,

    /// Timeout for job execution
    pub job_timeout: Duration,

    /// Age after which another worker may take over a locked job
    pub lock_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

/// What happened to a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Failed; retried later if attempts remain
    Failed,
}

/// Polls one database's queue and runs its jobs.
pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    tasks: Arc<TaskRegistry>,
    context: TaskContext,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        tasks: Arc<TaskRegistry>,
        context: TaskContext,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: format!("worker-{}", uuid::Uuid::new_v4()),
            queue,
            tasks,
            context,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Identifier written to `locked_by` of claimed jobs.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database(&self) -> &str {
        self.queue.database()
    }

    /// Spawn `concurrency` polling loops.
    pub fn start(&mut self) -> QueueResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::WorkerAlreadyRunning(self.database().to_string()));
        }

        info!(
            target: "bamz::worker",
            "Starting worker for {} with concurrency {}",
            self.database(),
            self.config.concurrency
        );

        for slot in 0..self.config.concurrency.max(1) {
            let runner = JobRunner {
                worker_id: format!("{}-{}", self.id, slot),
                queue: self.queue.clone(),
                tasks: self.tasks.clone(),
                context: self.context.clone(),
                job_timeout: self.config.job_timeout,
            };
            let running = self.running.clone();
            let poll_interval = self.config.poll_interval;

            self.handles.push(tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    match runner.run_next().await {
                        Ok(Some(_)) => {}
                        Ok(None) => tokio::time::sleep(poll_interval).await,
                        Err(e) => {
                            error!(
                                target: "bamz::worker",
                                kv: [("database", runner.queue.database()), ("error", &e)],
                                "Error claiming job"
                            );
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
                debug!(target: "bamz::worker", "{} stopped", runner.worker_id);
            }));
        }

        Ok(())
    }

    /// Stop the polling loops.
    ///
    /// Jobs in flight are abandoned and unlocked so the next worker retries
    /// them. When unlocking fails they wait out the queue's lock timeout.
    pub async fn stop(&mut self) -> QueueResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(QueueError::WorkerNotRunning(self.database().to_string()));
        }

        let handles: Vec<_> = self.handles.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            // Cancelled loops hold no job once joined
            let _ = handle.await;
        }

        if let Err(e) = self.queue.release(&self.id).await {
            warn!(
                target: "bamz::worker",
                kv: [("database", self.database()), ("error", &e)],
                "Could not unlock abandoned jobs"
            );
        }
        info!(target: "bamz::worker", "Stopped worker for {}", self.database());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim and run at most one job, outside the polling loops.
    pub async fn run_once(&self) -> QueueResult<Option<JobOutcome>> {
        JobRunner {
            worker_id: self.id.clone(),
            queue: self.queue.clone(),
            tasks: self.tasks.clone(),
            context: self.context.clone(),
            job_timeout: self.config.job_timeout,
        }
        .run_next()
        .await
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("database", &self.database())
            .field("running", &self.is_running())
            .finish()
    }
}

struct JobRunner {
    worker_id: String,
    queue: Arc<dyn JobQueue>,
    tasks: Arc<TaskRegistry>,
    context: TaskContext,
    job_timeout: Duration,
}

impl JobRunner {
    async fn run_next(&self) -> QueueResult<Option<JobOutcome>> {
        let Some(job) = self.queue.claim(&self.worker_id).await? else {
            return Ok(None);
        };

        debug!(
            target: "bamz::worker",
            "{} processing job {} ({})",
            self.worker_id,
            job.id,
            job.task
        );

        let result = match self.tasks.get(&job.task) {
            Some(handler) => {
                match tokio::time::timeout(
                    self.job_timeout,
                    handler.run(&self.context, job.payload.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(QueueError::Timeout(self.job_timeout)),
                }
            }
            None => Err(QueueError::NoHandler(job.task.clone())),
        };

        match result {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                debug!(target: "bamz::worker", "Job {} completed", job.id);
                Ok(Some(JobOutcome::Completed))
            }
            Err(e) => {
                self.report_failure(&job, &e);
                self.queue
                    .fail(job.id, &e.to_string(), job.backoff_delay())
                    .await?;
                Ok(Some(JobOutcome::Failed))
            }
        }
    }

    fn report_failure(&self, job: &Job, err: &QueueError) {
        let payload = job.payload.to_string();
        error!(
            target: "bamz::worker",
            kv: [
                ("database", self.queue.database()),
                ("task", &job.task),
                ("payload", &payload),
                ("attempts", job.attempts),
                ("error", err),
            ],
            "Job {} failed",
            job.id
        );
        if !job.can_retry() {
            warn!(
                target: "bamz::worker",
                "Job {} ({}) used all {} attempts and stays queued for inspection",
                job.id,
                job.task,
                job.max_attempts
            );
        }
    }
}
