//! Background jobs for bamz databases.
//!
//! Every database (the platform one and each tenant's) carries a
//! `bamz_worker.jobs` table. A [`WorkerSupervisor`] runs one [`Worker`] per
//! database; workers claim jobs with `FOR UPDATE SKIP LOCKED` and hand them
//! to the [`TaskHandler`] registered for the job's task name.
//!
//! - Delivery is at-least-once. Handlers must tolerate reruns.
//! - Failures are logged with the task name and payload. The job is
//!   unlocked and retried with exponential backoff until `max_attempts`,
//!   after which it stays in the table for inspection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bamz_db::{CredentialSet, PoolRegistry};
//! use bamz_queue::{JobQueue, NewJob, PgJobQueue, TaskRegistry, WorkerConfig, WorkerSupervisor};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> bamz_queue::QueueResult<()> {
//! let pools = Arc::new(PoolRegistry::default());
//! let platform = CredentialSet::new("postgres", "", "localhost", 5432, "bamz");
//!
//! let tasks = Arc::new(TaskRegistry::new());
//! tasks.register_fn("send-report", |ctx, payload| async move {
//!     ctx.logger().info(format!("report for {}", payload["month"]));
//!     Ok(())
//! });
//!
//! let supervisor = WorkerSupervisor::new(pools.clone(), platform.clone(), tasks, WorkerConfig::default());
//! supervisor.start(&platform).await?;
//!
//! PgJobQueue::new(pools, platform)
//!     .enqueue(NewJob::new("send-report", json!({"month": 5})))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod job;
pub mod queue;
pub mod supervisor;
pub mod task;
pub mod tasks;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use job::{DEFAULT_MAX_ATTEMPTS, Job, JobData, JobId, MAX_BACKOFF, NewJob};
pub use queue::{DEFAULT_LOCK_TIMEOUT, JobQueue, PgJobQueue};
pub use supervisor::{WorkerControl, WorkerSupervisor};
pub use task::{FnTask, TaskContext, TaskHandler, TaskRegistry, normalize_task_name};
pub use tasks::{TaskServices, register_builtin_tasks};
pub use worker::{JobOutcome, Worker, WorkerConfig};
