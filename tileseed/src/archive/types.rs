//! Core types for tile archives.

use std::path::PathBuf;
use thiserror::Error;

/// Where row 0 of an archive lies.
///
/// The rest of the crate addresses tiles with rows counted from the top of
/// the grid. MBTiles stores rows counted from the bottom, so the default
/// [`RowOrigin::Bottom`] flips every row on the way in and out and its
/// physical convention never leaks past the handle. [`RowOrigin::Top`] keeps
/// rows as addressed for consumers that expect XYZ archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowOrigin {
    /// Rows stored as addressed (XYZ scheme)
    Top,
    /// Rows flipped to count from the bottom (TMS scheme)
    #[default]
    Bottom,
}

impl RowOrigin {
    /// Value recorded in the archive's `scheme` metadata entry.
    pub fn scheme(&self) -> &'static str {
        match self {
            RowOrigin::Top => "xyz",
            RowOrigin::Bottom => "tms",
        }
    }

    /// Translate a logical row into the row stored in the archive.
    ///
    /// Returns `None` for rows outside the `2^zoom` matrix.
    #[inline]
    pub fn stored_row(&self, zoom: u8, row: u32) -> Option<u32> {
        let last = 1u64.checked_shl(zoom as u32)?.checked_sub(1)?;
        let flipped = last.checked_sub(row as u64)?;
        match self {
            RowOrigin::Top => Some(row),
            RowOrigin::Bottom => u32::try_from(flipped).ok(),
        }
    }
}

/// Options captured when an archive is first opened.
///
/// Later acquisitions of the same path reuse the existing handle and ignore
/// their own options; the first opener decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveOpenOptions {
    /// Open read-write (creating the file if needed) instead of read-only
    pub writable: bool,
    /// Serialize writes through an internal lock shared by all holders
    pub concurrent: bool,
    /// Physical row convention of the archive
    pub row_origin: RowOrigin,
}

impl ArchiveOpenOptions {
    /// Options for read-only access.
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Options for writing with the given row convention.
    pub fn writable(row_origin: RowOrigin) -> Self {
        Self {
            writable: true,
            concurrent: false,
            row_origin,
        }
    }

    /// Enable the internal write lock.
    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }
}

/// Tile archive errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// SQLite failure while opening, reading or writing
    #[error("Archive database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure around the archive file
    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Read-only access requested for a file that does not exist
    #[error("Archive not found: {}", .0.display())]
    Missing(PathBuf),

    /// Write attempted through a handle opened read-only
    #[error("Archive opened read-only: {}", .0.display())]
    ReadOnly(PathBuf),

    /// Operation on a handle whose connection has been closed
    #[error("Archive already closed: {}", .0.display())]
    Closed(PathBuf),

    /// Row outside the tile matrix of its zoom level
    #[error("Row {row} is outside the tile matrix at zoom {zoom}")]
    RowOutOfRange { zoom: u8, row: u32 },

    /// Blocking archive task panicked or was cancelled
    #[error("Archive task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_origin_is_bottom() {
        assert_eq!(RowOrigin::default(), RowOrigin::Bottom);
        assert_eq!(ArchiveOpenOptions::read_only().row_origin, RowOrigin::Bottom);
    }

    #[test]
    fn test_top_origin_keeps_rows() {
        assert_eq!(RowOrigin::Top.stored_row(3, 2), Some(2));
    }

    #[test]
    fn test_bottom_origin_flips_rows() {
        assert_eq!(RowOrigin::Bottom.stored_row(3, 0), Some(7));
        assert_eq!(RowOrigin::Bottom.stored_row(3, 7), Some(0));
        assert_eq!(RowOrigin::Bottom.stored_row(0, 0), Some(0));
    }

    #[test]
    fn test_flip_is_an_involution() {
        for row in 0..16 {
            let once = RowOrigin::Bottom.stored_row(4, row).unwrap();
            assert_eq!(RowOrigin::Bottom.stored_row(4, once), Some(row));
        }
    }

    #[test]
    fn test_rows_outside_matrix_are_rejected() {
        assert_eq!(RowOrigin::Bottom.stored_row(2, 4), None);
        assert_eq!(RowOrigin::Top.stored_row(2, 4), None);
        assert_eq!(RowOrigin::Bottom.stored_row(0, 1), None);
        assert_eq!(RowOrigin::Bottom.stored_row(24, (1 << 24) - 1), Some(0));
    }

    #[test]
    fn test_scheme_names() {
        assert_eq!(RowOrigin::Top.scheme(), "xyz");
        assert_eq!(RowOrigin::Bottom.scheme(), "tms");
    }

    #[test]
    fn test_missing_error_display() {
        let err = ArchiveError::Missing(PathBuf::from("/store/a.mbtiles"));
        assert_eq!(err.to_string(), "Archive not found: /store/a.mbtiles");
    }
}
