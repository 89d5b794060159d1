//! MBTiles archive handle.
//!
//! One `ArchiveHandle` wraps one SQLite connection to a single-file tile
//! archive. All methods are blocking; async callers go through
//! `tokio::task::spawn_blocking`.

use super::types::{ArchiveError, ArchiveOpenOptions, RowOrigin};
use crate::coord::TileCoord;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How long SQLite waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tile image format recorded in the metadata table.
const TILE_FORMAT: &str = "png";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Exclusive locking must be set before WAL so no shared-memory index is needed.
const WRITE_PRAGMAS: &str = "
    PRAGMA locking_mode = EXCLUSIVE;
    PRAGMA journal_mode = WAL;
    PRAGMA temp_store = MEMORY;
";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT);
    CREATE UNIQUE INDEX IF NOT EXISTS name ON metadata (name);
    CREATE TABLE IF NOT EXISTS tiles (
        zoom_level INTEGER,
        tile_column INTEGER,
        tile_row INTEGER,
        tile_data BLOB
    );
    CREATE UNIQUE INDEX IF NOT EXISTS tile_index ON tiles (zoom_level, tile_column, tile_row);
";

/// An open MBTiles archive.
pub struct ArchiveHandle {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    writable: bool,
    row_origin: RowOrigin,
    /// Present when opened writable for concurrent use
    write_lock: Option<Mutex<()>>,
}

impl ArchiveHandle {
    /// Open an archive.
    ///
    /// Writable archives are created if missing, configured for WAL
    /// journaling with exclusive locking and in-memory temp storage, and
    /// stamped with `name`, `format` and `scheme` metadata. Read-only opens
    /// fail with [`ArchiveError::Missing`] when the file does not exist.
    pub fn open(path: &Path, options: ArchiveOpenOptions) -> Result<Self, ArchiveError> {
        let conn = if options.writable {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(WRITE_PRAGMAS)?;
            conn.execute_batch(SCHEMA)?;
            write_metadata(&conn, path, options.row_origin)?;
            conn
        } else {
            if !path.exists() {
                return Err(ArchiveError::Missing(path.to_path_buf()));
            }
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn
        };

        debug!(
            path = %path.display(),
            writable = options.writable,
            concurrent = options.concurrent,
            scheme = options.row_origin.scheme(),
            "Opened tile archive"
        );

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Some(conn)),
            writable: options.writable,
            row_origin: options.row_origin,
            write_lock: (options.writable && options.concurrent).then(|| Mutex::new(())),
        })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the archive accepts writes.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Whether writes go through the internal lock.
    pub fn is_concurrent(&self) -> bool {
        self.write_lock.is_some()
    }

    /// Row convention captured at open time.
    pub fn row_origin(&self) -> RowOrigin {
        self.row_origin
    }

    /// Read and decompress a tile. Returns `Ok(None)` when absent.
    pub fn get_tile(&self, tile: &TileCoord) -> Result<Option<Vec<u8>>, ArchiveError> {
        let row = self.stored_row(tile)?;
        let stored: Option<Vec<u8>> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![tile.zoom, tile.col, row],
                |r| r.get(0),
            )
            .optional()
            .map_err(ArchiveError::from)
        })?;

        match stored {
            Some(data) => Ok(Some(decompress(data)?)),
            None => Ok(None),
        }
    }

    /// Check whether a tile exists without reading its data.
    pub fn has_tile(&self, tile: &TileCoord) -> Result<bool, ArchiveError> {
        let row = self.stored_row(tile)?;
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                    params![tile.zoom, tile.col, row],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Compress and store a tile, replacing any existing data.
    pub fn put_tile(&self, tile: &TileCoord, data: &[u8]) -> Result<(), ArchiveError> {
        if !self.writable {
            return Err(ArchiveError::ReadOnly(self.path.clone()));
        }

        let compressed = compress(data)?;
        let row = self.stored_row(tile)?;

        let _guard = self.write_lock.as_ref().map(|lock| lock.lock());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
                params![tile.zoom, tile.col, row, compressed],
            )?;
            Ok(())
        })
    }

    /// Read a metadata value.
    pub fn metadata(&self, name: &str) -> Result<Option<String>, ArchiveError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM metadata WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()
            .map_err(ArchiveError::from)
        })
    }

    /// Flush and close the connection. Closing twice is a no-op.
    ///
    /// Writable archives are checkpointed and left in rollback-journal mode
    /// so later read-only opens do not need a WAL file.
    pub fn close(&self) -> Result<(), ArchiveError> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };

        if self.writable {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); PRAGMA journal_mode = DELETE;")?;
        }
        conn.close().map_err(|(_, e)| ArchiveError::Sqlite(e))?;

        debug!(path = %self.path.display(), "Closed tile archive");
        Ok(())
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    fn stored_row(&self, tile: &TileCoord) -> Result<u32, ArchiveError> {
        self.row_origin
            .stored_row(tile.zoom, tile.row)
            .ok_or(ArchiveError::RowOutOfRange {
                zoom: tile.zoom,
                row: tile.row,
            })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| ArchiveError::Closed(self.path.clone()))?;
        f(conn)
    }
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .field("row_origin", &self.row_origin)
            .field("concurrent", &self.is_concurrent())
            .finish()
    }
}

fn write_metadata(conn: &Connection, path: &Path, row_origin: RowOrigin) -> Result<(), ArchiveError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut stmt = conn.prepare("INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)")?;
    for (key, value) in [
        ("name", name.as_str()),
        ("format", TILE_FORMAT),
        ("scheme", row_origin.scheme()),
    ] {
        stmt.execute(params![key, value])?;
    }
    Ok(())
}

fn compress(data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Tiles written by other tools may be stored uncompressed.
fn decompress(data: Vec<u8>) -> Result<Vec<u8>, ArchiveError> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data.as_slice()).read_to_end(&mut out)?;
    Ok(out)
}
