//! Job progress tracking and reporting.

use crate::coord::TileRange;
use crate::render::BoxFuture;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Progress since the previous report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub job_id: String,
    /// Tiling matrix set of the job
    pub tms: String,
    /// Rectangle the job was asked to render
    pub range: TileRange,
    /// Tiles attempted so far
    pub current: u64,
    pub total: u64,
    /// Tiles attempted since the previous update
    pub delta: u64,
    /// Last update of the job
    pub is_final: bool,
}

/// Receives progress updates of a running job.
///
/// Implementations handle their own failures; a lost update never affects
/// the job.
pub trait ProgressSink: Send + Sync {
    fn report<'a>(&'a self, update: &'a ProgressUpdate) -> BoxFuture<'a, ()>;
}

/// Sink that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report<'a>(&'a self, _update: &'a ProgressUpdate) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Attempted-tile counter of one job.
///
/// The counter only grows, so tiles finishing in any order may bump it.
#[derive(Debug)]
pub struct JobProgress {
    job_id: String,
    tms: String,
    range: TileRange,
    started_at: DateTime<Utc>,
    total: u64,
    current: AtomicU64,
    last_reported: AtomicU64,
}

impl JobProgress {
    pub fn new(job_id: &str, tms: &str, range: TileRange) -> Self {
        Self {
            job_id: job_id.to_string(),
            tms: tms.to_string(),
            range,
            started_at: Utc::now(),
            total: range.tile_count(),
            current: AtomicU64::new(0),
            last_reported: AtomicU64::new(0),
        }
    }

    /// Count one attempted tile; returns the new count.
    pub fn increment(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_complete(&self) -> bool {
        self.current() >= self.total
    }

    /// Completion in percent.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.current() as f64 * 100.0 / self.total as f64
    }

    /// Build an update and move the reporting baseline to the current count.
    pub fn take_update(&self, is_final: bool) -> ProgressUpdate {
        let current = self.current();
        let last = self.last_reported.swap(current, Ordering::SeqCst);

        ProgressUpdate {
            job_id: self.job_id.clone(),
            tms: self.tms.clone(),
            range: self.range,
            current,
            total: self.total,
            delta: current.saturating_sub(last),
            is_final,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> JobProgress {
        JobProgress::new("job-1", "WebMercatorQuad", TileRange::new(3, 0, 1, 0, 4).unwrap())
    }

    #[test]
    fn test_total_from_range() {
        let p = progress();
        assert_eq!(p.total(), 10);
        assert_eq!(p.current(), 0);
        assert!(!p.is_complete());
    }

    #[test]
    fn test_delta_resets_after_each_update() {
        let p = progress();
        for _ in 0..3 {
            p.increment();
        }
        let first = p.take_update(false);
        assert_eq!((first.current, first.delta), (3, 3));

        let empty = p.take_update(false);
        assert_eq!((empty.current, empty.delta), (3, 0));

        p.increment();
        p.increment();
        let second = p.take_update(false);
        assert_eq!((second.current, second.delta), (5, 2));
    }

    #[test]
    fn test_final_update_reports_true_count() {
        let p = progress();
        for _ in 0..7 {
            p.increment();
        }
        p.take_update(false);
        p.increment();

        let last = p.take_update(true);
        assert!(last.is_final);
        assert_eq!((last.current, last.delta, last.total), (8, 1, 10));
        assert_eq!(last.range, TileRange::new(3, 0, 1, 0, 4).unwrap());
    }

    #[test]
    fn test_percent() {
        let p = progress();
        for _ in 0..5 {
            p.increment();
        }
        assert!((p.percent() - 50.0).abs() < f64::EPSILON);
        for _ in 0..5 {
            p.increment();
        }
        assert!(p.is_complete());
    }

    #[test]
    fn test_concurrent_increments() {
        let p = std::sync::Arc::new(progress());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let p = std::sync::Arc::clone(&p);
                std::thread::spawn(move || {
                    p.increment();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.current(), 10);
    }
}
