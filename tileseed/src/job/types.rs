//! Job parameters, outcomes and errors.

use crate::archive::RowOrigin;
use crate::cache::{CacheError, StorageDescriptor};
use crate::coord::TileRange;
use crate::render::{EncodeError, RenderError};
use crate::style::StyleError;
use thiserror::Error;

/// Pixel ratios accepted by the renderer.
pub const SUPPORTED_RATIOS: [u32; 4] = [1, 2, 4, 8];

/// Everything needed to run one render job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParameters {
    /// Job identifier, echoed in logs and queue reports
    pub id: String,
    /// API (dataset) identifier
    pub api: String,
    pub tileset: String,
    /// Tiling matrix set identifier
    pub tms: String,
    /// Tiles to render
    pub range: TileRange,
    /// Pixel ratio (1, 2, 4 or 8)
    pub ratio: u32,
    /// Maximum number of tiles in flight
    pub concurrency: usize,
    /// Re-render tiles that already exist
    pub overwrite: bool,
    /// Row convention of archives written by this job
    pub row_origin: RowOrigin,
    pub storage: StorageDescriptor,
}

impl JobParameters {
    /// Reject parameters no job can run with.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.concurrency == 0 {
            return Err(JobError::InvalidParameters(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !SUPPORTED_RATIOS.contains(&self.ratio) {
            return Err(JobError::InvalidParameters(format!(
                "ratio {} is not one of 1, 2, 4, 8",
                self.ratio
            )));
        }
        let matrix = 1u64 << self.range.zoom;
        if self.range.max_x as u64 >= matrix || self.range.max_y as u64 >= matrix {
            return Err(JobError::InvalidParameters(format!(
                "range {} exceeds the {}x{} tile matrix",
                self.range, matrix, matrix
            )));
        }
        Ok(())
    }
}

/// Errors that abort a whole job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("Unsupported tiling matrix: {0}")]
    UnsupportedTilingMatrix(String),

    #[error(transparent)]
    Store(#[from] CacheError),

    #[error(transparent)]
    Style(#[from] StyleError),
}

/// Errors of a single tile. These are logged and counted, never fatal.
#[derive(Debug, Error)]
pub enum TileError {
    #[error(transparent)]
    Store(#[from] CacheError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Encoder task failed: {0}")]
    Task(String),
}

/// Tile counts of a finished render loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// Tiles picked up by the loop, whatever their outcome
    pub attempted: u64,
    pub rendered: u64,
    /// Tiles left alone because they already existed
    pub skipped: u64,
    pub failed: u64,
    /// The loop stopped early on cancellation
    pub cancelled: bool,
    /// One message per failed tile
    pub errors: Vec<String>,
}

impl RenderSummary {
    /// Tile errors joined into one message, if any.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join(" | "))
        }
    }
}
