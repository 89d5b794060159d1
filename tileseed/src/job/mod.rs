//! Render jobs.
//!
//! A job renders one rectangle of tiles at one zoom level into a tile store:
//!
//! 1. [`build_context`] resolves the store, tiling matrix set and style, and
//!    picks up a shared lock from the [`MutexRegistry`] when several tiles
//!    may write the same archive at once.
//! 2. [`render_tiles`] walks the rectangle with bounded concurrency,
//!    skipping existing tiles unless asked to overwrite.
//! 3. [`run_job`] ties both together with periodic progress logging and
//!    reporting through a [`ProgressSink`].

mod context;
mod progress;
mod registry;
mod runner;
mod tiles;
mod types;

pub use context::{build_context, JobContext};
pub use progress::{JobProgress, NoopProgressSink, ProgressSink, ProgressUpdate};
pub use registry::MutexRegistry;
pub use runner::{run_job, JobReport, JobServices, ReportTiming, DEFAULT_PROGRESS_INTERVAL};
pub use tiles::{edge_buffer, render_tiles};
pub use types::{JobError, JobParameters, RenderSummary, TileError, SUPPORTED_RATIOS};
