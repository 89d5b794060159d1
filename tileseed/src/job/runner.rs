//! Running a job end to end.

use super::context::build_context;
use super::progress::{JobProgress, ProgressSink};
use super::registry::MutexRegistry;
use super::tiles::render_tiles;
use super::types::{JobError, JobParameters, RenderSummary};
use crate::archive::ArchivePool;
use crate::render::{BoxFuture, Renderer, TileEncoder};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Default interval between progress pushes.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Intervals of the periodic progress log and progress push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportTiming {
    pub log_interval: Duration,
    pub progress_interval: Duration,
}

impl ReportTiming {
    /// Log every 30s at verbosity 0, every 10s at 1 and every 2s above.
    pub fn for_verbosity(verbosity: u8) -> Self {
        let log_interval = match verbosity {
            0 => Duration::from_secs(30),
            1 => Duration::from_secs(10),
            _ => Duration::from_secs(2),
        };
        Self {
            log_interval,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

impl Default for ReportTiming {
    fn default() -> Self {
        Self::for_verbosity(0)
    }
}

/// Long-lived collaborators shared by every job of a process.
#[derive(Clone)]
pub struct JobServices {
    pub pool: Arc<ArchivePool>,
    pub registry: Arc<MutexRegistry>,
    pub renderer: Arc<dyn Renderer>,
    pub encoder: Arc<dyn TileEncoder>,
    /// Stops dispatching new tiles when cancelled
    pub cancel: CancellationToken,
    pub timing: ReportTiming,
}

impl JobServices {
    /// Services with a fresh pool, registry and cancellation token.
    pub fn new(renderer: Arc<dyn Renderer>, encoder: Arc<dyn TileEncoder>) -> Self {
        Self {
            pool: Arc::new(ArchivePool::new()),
            registry: Arc::new(MutexRegistry::new()),
            renderer,
            encoder,
            cancel: CancellationToken::new(),
            timing: ReportTiming::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timing(mut self, timing: ReportTiming) -> Self {
        self.timing = timing;
        self
    }
}

impl std::fmt::Debug for JobServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobServices")
            .field("pool", &self.pool)
            .field("registry", &self.registry.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("timing", &self.timing)
            .finish()
    }
}

/// Outcome of a job that got past context resolution.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub summary: RenderSummary,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Run a job: resolve its context, render its tiles and report progress.
///
/// Only context resolution fails the job; tile failures end up in the
/// report's summary. `sink` receives periodic deltas and one final update.
pub async fn run_job(
    params: &JobParameters,
    services: &JobServices,
    sink: &dyn ProgressSink,
) -> Result<JobReport, JobError> {
    let span = info_span!("job", job_id = %params.id);
    execute(params, services, sink).instrument(span).await
}

async fn execute(
    params: &JobParameters,
    services: &JobServices,
    sink: &dyn ProgressSink,
) -> Result<JobReport, JobError> {
    let context = build_context(params, Arc::clone(&services.pool), &services.registry).await?;
    let progress = JobProgress::new(&params.id, context.tms.name, params.range);
    let clock = std::time::Instant::now();

    info!(
        tiles = progress.total(),
        range = %params.range,
        tms = %context.tms,
        style = %context.style.id,
        storage = %context.store.storage_kind(),
        overwrite = params.overwrite,
        "Rendering job"
    );

    let summary = {
        let render = render_tiles(
            params,
            &context,
            services.renderer.as_ref(),
            &services.encoder,
            &progress,
            &services.cancel,
        );
        tokio::pin!(render);

        let mut log_timer = timer(services.timing.log_interval);
        let mut push_timer = timer(services.timing.progress_interval);
        // At most one push in flight; tiles keep rendering while it runs.
        let mut push: Option<BoxFuture<'_, ()>> = None;

        let summary = loop {
            tokio::select! {
                summary = &mut render => break summary,
                _ = log_timer.tick() => {
                    info!(
                        current = progress.current(),
                        total = progress.total(),
                        "Job progress {:.1}%",
                        progress.percent()
                    );
                }
                _ = push_timer.tick(), if push.is_none() => {
                    let update = progress.take_update(false);
                    if update.delta > 0 {
                        push = Some(Box::pin(async move { sink.report(&update).await }));
                    }
                }
                _ = in_flight(&mut push), if push.is_some() => push = None,
            }
        };

        if let Some(push) = push {
            push.await;
        }
        summary
    };

    sink.report(&progress.take_update(true)).await;

    if let Err(e) = context.store.close().await {
        warn!(error = %e, "Failed to release job archives");
    }

    let elapsed = clock.elapsed();
    if summary.cancelled {
        info!(
            attempted = summary.attempted,
            total = progress.total(),
            "Job cancelled"
        );
    } else {
        info!(
            rendered = summary.rendered,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_secs = elapsed.as_secs_f64(),
            "Job finished"
        );
    }

    Ok(JobReport {
        job_id: params.id.clone(),
        summary,
        started_at: progress.started_at(),
        elapsed,
    })
}

async fn in_flight(push: &mut Option<BoxFuture<'_, ()>>) {
    match push {
        Some(push) => push.await,
        None => std::future::pending().await,
    }
}

fn timer(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}
