//! Queue agent.
//!
//! The agent turns a tile-seeding job queue into render jobs. A primary
//! process supervises a set of worker processes; each worker polls the queue,
//! claims one job at a time, runs it and reports progress and completion back
//! over HTTP.

mod queue;
mod supervisor;
mod worker;

use std::io;
use thiserror::Error;

pub use queue::{
    FinishBody, HttpQueueClient, JobDefaults, JobDetails, ProgressBody, QueueClient, QueueError,
    QueueJob, QueueStorage, SubMatrix, JOBS_PATH, JOB_TYPE,
};
pub use supervisor::{
    available_cpus, worker_count, Supervisor, SupervisorStats, WorkerCommand, WORKER_FLAG,
};
pub use worker::{Worker, WorkerConfig, WorkerStats, DEFAULT_POLL_INTERVAL};

/// Errors of the agent processes.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to start worker process: {0}")]
    Spawn(#[source] io::Error),

    #[error("Worker supervision I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Worker supervision task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
