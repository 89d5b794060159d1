//! tileseed - raster tile seeding for tile stores
//!
//! This library renders raster tiles from a vector style into a tile store
//! made of loose files or MBTiles archives, either for a single command-line
//! job or for jobs claimed from an HTTP job queue.
//!
//! # High-Level API
//!
//! ```ignore
//! use tileseed::job::{run_job, JobServices, NoopProgressSink};
//! use tileseed::render::{PngTileEncoder, ProcessRenderer};
//!
//! let services = JobServices::new(
//!     Arc::new(ProcessRenderer::new("tileseed-render")),
//!     Arc::new(PngTileEncoder::new()),
//! );
//! let report = run_job(&params, &services, &NoopProgressSink).await?;
//! ```

pub mod agent;
pub mod archive;
pub mod cache;
pub mod config;
pub mod coord;
pub mod job;
pub mod logging;
pub mod render;
pub mod style;
pub mod tms;

/// Version of the tileseed library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
