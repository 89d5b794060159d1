//! Reference-counted pool of open archive handles.
//!
//! Every logical open of an archive path goes through [`ArchivePool::acquire`]
//! and is paired with one [`ArchivePool::release`]. The pool keeps exactly one
//! physical connection per path and closes it when the last holder releases.

use super::mbtiles::ArchiveHandle;
use super::types::{ArchiveError, ArchiveOpenOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct PoolEntry {
    handle: Arc<ArchiveHandle>,
    refs: usize,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Archives currently open
    pub open: usize,
    /// Physical opens since creation
    pub opened: u64,
    /// Physical closes since creation
    pub closed: u64,
}

/// Shared registry of open archives keyed by path.
///
/// One pool is owned per process (or per test) and passed to every store.
#[derive(Default)]
pub struct ArchivePool {
    entries: Mutex<HashMap<PathBuf, PoolEntry>>,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl ArchivePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle for `path`, opening the archive on first use.
    ///
    /// When the path is already open the existing handle is returned and
    /// `options` is ignored. The map lock is held across the open so two
    /// callers can never race to open the same file.
    pub fn acquire(
        &self,
        path: &Path,
        options: ArchiveOpenOptions,
    ) -> Result<Arc<ArchiveHandle>, ArchiveError> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(path) {
            entry.refs += 1;
            if options.writable && !entry.handle.is_writable() {
                debug!(
                    path = %path.display(),
                    "Archive already open read-only; first opener wins"
                );
            }
            return Ok(Arc::clone(&entry.handle));
        }

        let handle = Arc::new(ArchiveHandle::open(path, options)?);
        self.opened.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            path.to_path_buf(),
            PoolEntry {
                handle: Arc::clone(&handle),
                refs: 1,
            },
        );

        Ok(handle)
    }

    /// Drop one reference to `path`, closing the archive at zero.
    ///
    /// Returns `Ok(true)` when this call physically closed the archive.
    /// Releasing a path that is not open logs a warning and returns
    /// `Ok(false)`.
    ///
    /// The close happens under the map lock so a concurrent `acquire` of the
    /// same path waits for it instead of opening a second connection.
    pub fn release(&self, path: &Path) -> Result<bool, ArchiveError> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            warn!(path = %path.display(), "Release of archive that is not open");
            return Ok(false);
        };

        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(false);
        }

        if let Some(entry) = entries.remove(path) {
            entry.handle.close()?;
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(true)
    }

    /// Number of holders of `path`, zero if not open.
    pub fn ref_count(&self, path: &Path) -> usize {
        self.entries.lock().get(path).map_or(0, |e| e.refs)
    }

    /// Current activity counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.entries.lock().len(),
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ArchivePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivePool").field("stats", &self.stats()).finish()
    }
}
