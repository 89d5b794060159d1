//! Single-file tile archives.
//!
//! MBTiles archives accessed through a reference-counted [`ArchivePool`] so
//! each physical file has at most one open connection per process.

mod mbtiles;
mod pool;
mod types;

pub use mbtiles::ArchiveHandle;
pub use pool::{ArchivePool, PoolStats};
pub use types::{ArchiveError, ArchiveOpenOptions, RowOrigin};
