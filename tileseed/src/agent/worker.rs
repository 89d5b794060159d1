//! Queue polling worker.
//!
//! A worker claims one job at a time, runs it and reports the outcome. When
//! the queue has nothing to offer or cannot be reached it sleeps for the
//! poll interval and tries again, until its cancellation token fires.

use super::queue::{FinishBody, JobDefaults, ProgressBody, QueueClient, QueueError, QueueJob};
use crate::job::{run_job, JobServices, ProgressSink, ProgressUpdate, RenderSummary};
use crate::render::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Pause between polls that returned no job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settings of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub store_root: PathBuf,
    /// Pixel ratio of every job
    pub ratio: u32,
    /// Tiles in flight per job
    pub tile_concurrency: usize,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            ratio: 1,
            tile_concurrency: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_ratio(mut self, ratio: u32) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_tile_concurrency(mut self, concurrency: usize) -> Self {
        self.tile_concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Counters of a worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub jobs: u64,
    /// Jobs finished with an error report
    pub failed: u64,
}

/// Polls a queue and runs the jobs it hands out.
pub struct Worker {
    queue: Arc<dyn QueueClient>,
    config: WorkerConfig,
    services: JobServices,
    connected: bool,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(queue: Arc<dyn QueueClient>, config: WorkerConfig, services: JobServices) -> Self {
        Self {
            queue,
            config,
            services,
            connected: false,
            stats: WorkerStats::default(),
        }
    }

    /// Whether the last poll reached the queue.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Poll until cancelled. A job in progress is finished first.
    pub async fn run(&mut self) -> WorkerStats {
        let cancel = self.services.cancel.clone();
        debug!(pid = std::process::id(), queue = self.queue.endpoint(), "Worker started");

        while !cancel.is_cancelled() {
            match self.poll().await {
                Some(job) => self.process(job).await,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        info!(queue = self.queue.endpoint(), "Disconnected from job queue");
        self.stats
    }

    async fn poll(&mut self) -> Option<QueueJob> {
        self.stats.polls += 1;

        let result = tokio::select! {
            result = self.queue.claim() => result,
            _ = self.services.cancel.cancelled() => return None,
        };

        match result {
            Ok(job) => {
                if !self.connected {
                    info!(queue = self.queue.endpoint(), "Connected to job queue");
                    self.connected = true;
                }
                job
            }
            Err(e) => {
                self.connected = false;
                match e {
                    QueueError::Transport(_) => error!(error = %e, "Polling job queue failed"),
                    _ => warn!(error = %e, "Polling job queue failed"),
                }
                None
            }
        }
    }

    async fn process(&mut self, job: QueueJob) {
        trace!(job = ?job, "Received job from queue");
        self.stats.jobs += 1;

        let defaults = JobDefaults {
            store_root: &self.config.store_root,
            ratio: self.config.ratio,
            concurrency: self.config.tile_concurrency,
        };

        let error = match job.to_parameters(&defaults) {
            Ok(params) => {
                debug!(job_id = %params.id, range = %params.range, "Submitting rendering job");
                let sink = QueueProgress {
                    queue: self.queue.as_ref(),
                    job: &job,
                };
                match run_job(&params, &self.services, &sink).await {
                    Ok(report) => outcome_message(&report.summary, params.range.tile_count()),
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "Error rendering job");
                        Some(e.to_string())
                    }
                }
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Rejected job");
                Some(e.to_string())
            }
        };

        if error.is_some() {
            self.stats.failed += 1;
        }

        let body = FinishBody { error, retry: true };
        if let Err(e) = self.queue.finish(&job.id, &body).await {
            error!(job_id = %job.id, error = %e, "Error finishing job");
        }
    }
}

/// Error reported to the queue for a job that ran, if any.
///
/// A cancelled job is reported as failed so the queue offers it again.
fn outcome_message(summary: &RenderSummary, total: u64) -> Option<String> {
    let cancelled = summary
        .cancelled
        .then(|| format!("Job cancelled after {} of {} tiles", summary.attempted, total));
    match (cancelled, summary.error_message()) {
        (Some(cancelled), Some(errors)) => Some(format!("{} | {}", cancelled, errors)),
        (cancelled, errors) => cancelled.or(errors),
    }
}

/// Forwards job progress to the queue.
struct QueueProgress<'q> {
    queue: &'q dyn QueueClient,
    job: &'q QueueJob,
}

impl ProgressSink for QueueProgress<'_> {
    fn report<'a>(&'a self, update: &'a ProgressUpdate) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let body = ProgressBody {
                tile_set: self.job.details.tile_set.clone(),
                tile_matrix_set: self.job.details.tile_matrix_set.clone(),
                level: update.range.zoom,
                delta: update.delta,
            };

            debug!(job_id = %self.job.id, delta = update.delta, "Updating job progress");
            match self.queue.progress(&self.job.id, &body).await {
                Ok(()) => debug!(job_id = %self.job.id, "Updated job progress"),
                Err(e) => error!(job_id = %self.job.id, error = %e, "Failed to update job progress"),
            }
        })
    }
}
