//! Core types for the tile store.

use crate::archive::ArchiveError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Physical layout of a tile cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Legacy loose files, addressed like `PerTile`
    Plain,
    /// One file per tile
    PerTile,
    /// One archive per job shard
    PerJob,
    /// One archive per tileset and tiling matrix
    PerTileset,
    /// Legacy name for `PerTileset`
    Mbtiles,
}

impl StorageKind {
    /// Loose files, one per tile.
    pub fn is_tile_granular(&self) -> bool {
        matches!(self, StorageKind::Plain | StorageKind::PerTile)
    }

    /// A single archive per tileset and tiling matrix.
    pub fn is_per_tileset(&self) -> bool {
        matches!(self, StorageKind::PerTileset | StorageKind::Mbtiles)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Plain => "PLAIN",
            StorageKind::PerTile => "PER_TILE",
            StorageKind::PerJob => "PER_JOB",
            StorageKind::PerTileset => "PER_TILESET",
            StorageKind::Mbtiles => "MBTILES",
        }
    }
}

impl FromStr for StorageKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(StorageKind::Plain),
            "PER_TILE" => Ok(StorageKind::PerTile),
            "PER_JOB" => Ok(StorageKind::PerJob),
            "PER_TILESET" => Ok(StorageKind::PerTileset),
            "MBTILES" => Ok(StorageKind::Mbtiles),
            _ => Err(CacheError::InvalidStorageKind(s.to_string())),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle class of a cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// Rewritten in place (`cache_dyn`)
    Dynamic,
    /// Published in staged snapshots (`cache_imm`)
    Immutable,
}

impl CacheType {
    /// Directory name below the dataset's tile root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            CacheType::Dynamic => "cache_dyn",
            CacheType::Immutable => "cache_imm",
        }
    }
}

impl FromStr for CacheType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DYNAMIC" => Ok(CacheType::Dynamic),
            "IMMUTABLE" => Ok(CacheType::Immutable),
            _ => Err(CacheError::InvalidCacheType(s.to_string())),
        }
    }
}

/// One physical destination for one (tiling matrix, zoom level) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cache {
    pub tms: String,
    pub level: u8,
    pub storage: StorageKind,
    /// Cache root directory; tilesets live below it
    pub path: PathBuf,
    pub has_raster: bool,
}

/// Categories of resources a store can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Style,
    TileJson,
    Tile,
    ApiResource,
}

impl ResourceType {
    /// Directory of this resource type relative to the store root.
    pub fn dir(&self) -> &'static str {
        match self {
            ResourceType::Style => "values/maplibre-styles",
            ResourceType::TileJson => "resources/tilejson",
            ResourceType::Tile => "resources/tiles",
            ResourceType::ApiResource => "resources/api-resources",
        }
    }

    /// Map a renderer resource kind code to a resource type.
    ///
    /// Codes follow the MapLibre resource kinds: 1 style, 2 source,
    /// 3 tile, 4 glyphs, 5 sprite image, 6 sprite JSON.
    pub fn from_kind(kind: u8) -> Option<Self> {
        match kind {
            1 => Some(ResourceType::Style),
            2 => Some(ResourceType::TileJson),
            3 => Some(ResourceType::Tile),
            4..=6 => Some(ResourceType::ApiResource),
            _ => None,
        }
    }
}

/// What a read from a job shard that does not exist yet resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingShardPolicy {
    /// Treat as an absent tile
    NotFound,
    /// Propagate the archive error
    Error,
}

/// Layout supplied directly by the caller.
///
/// Paths are relative to the store root. Tile-granular templates substitute
/// `{z}`, `{row}` and `{col}`; archive templates substitute `{partition}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitStorage {
    pub tile_storage: StorageKind,
    pub job_size: u32,
    pub vector: String,
    pub raster: String,
    pub style: String,
}

/// How a job's store is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDescriptor {
    /// Layout read from the dataset's catalog entity.
    Detect {
        store_root: PathBuf,
        /// Style document path relative to the style directory
        style: String,
        /// `Some` forces job sharding on or off; `None` detects it from
        /// the cache storage kinds
        per_job: Option<bool>,
    },
    /// Layout supplied by the caller.
    Explicit {
        store_root: PathBuf,
        storage: ExplicitStorage,
    },
}

impl StorageDescriptor {
    pub fn store_root(&self) -> &PathBuf {
        match self {
            StorageDescriptor::Detect { store_root, .. } => store_root,
            StorageDescriptor::Explicit { store_root, .. } => store_root,
        }
    }

    /// Style path to pass to a `ResourceType::Style` read.
    pub fn style_path(&self) -> &str {
        match self {
            StorageDescriptor::Detect { style, .. } => style,
            StorageDescriptor::Explicit { storage, .. } => &storage.style,
        }
    }
}

/// Tile store errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during store operations
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive failure
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// No catalog entity for the provider
    #[error("No tile provider configuration found for id \"{0}\"")]
    ProviderNotFound(String),

    /// Provider has no usable cache
    #[error("No seeded tile cache found for provider \"{0}\"")]
    NoSeededCache(String),

    /// Catalog entity could not be parsed
    #[error("Invalid catalog entity {}: {source}", path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Catalog entity parsed but describes an inconsistent layout
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// No cache covers the requested tiling matrix and level
    #[error("No cache found for tms \"{tms}\" and level \"{level}\"")]
    NoCache { tms: String, level: u8 },

    #[error("Unknown storage kind: {0}")]
    InvalidStorageKind(String),

    #[error("Unknown cache type: {0}")]
    InvalidCacheType(String),

    /// Job size is not 0 or a square with a power-of-two side
    #[error("Invalid job size {0}: must be 0 or the square of a power of two")]
    InvalidJobSize(u32),

    /// Tile path did not look like `{tms}/{z}/{y}/{x}.{ext}`
    #[error("Invalid tile path: {0}")]
    InvalidTilePath(String),

    /// Blocking store task panicked or was cancelled
    #[error("Store task failed: {0}")]
    Task(String),
}

impl CacheError {
    /// Whether this error is a configuration problem rather than I/O.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CacheError::ProviderNotFound(_)
                | CacheError::NoSeededCache(_)
                | CacheError::Catalog { .. }
                | CacheError::InvalidConfig(_)
                | CacheError::NoCache { .. }
                | CacheError::InvalidStorageKind(_)
                | CacheError::InvalidCacheType(_)
                | CacheError::InvalidJobSize(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!("PER_JOB".parse::<StorageKind>().unwrap(), StorageKind::PerJob);
        assert_eq!("mbtiles".parse::<StorageKind>().unwrap(), StorageKind::Mbtiles);
        assert!("FLAT".parse::<StorageKind>().is_err());
    }

    #[test]
    fn test_tile_granular_kinds() {
        assert!(StorageKind::Plain.is_tile_granular());
        assert!(StorageKind::PerTile.is_tile_granular());
        assert!(!StorageKind::PerJob.is_tile_granular());
        assert!(!StorageKind::PerTileset.is_tile_granular());
        assert!(StorageKind::Mbtiles.is_per_tileset());
    }

    #[test]
    fn test_cache_type_dirs() {
        assert_eq!("IMMUTABLE".parse::<CacheType>().unwrap().dir_name(), "cache_imm");
        assert_eq!("DYNAMIC".parse::<CacheType>().unwrap().dir_name(), "cache_dyn");
    }

    #[test]
    fn test_resource_kinds() {
        assert_eq!(ResourceType::from_kind(1), Some(ResourceType::Style));
        assert_eq!(ResourceType::from_kind(6), Some(ResourceType::ApiResource));
        assert_eq!(ResourceType::from_kind(0), None);
        assert_eq!(ResourceType::Tile.dir(), "resources/tiles");
    }

    #[test]
    fn test_no_cache_error_message() {
        let err = CacheError::NoCache {
            tms: "WebMercatorQuad".into(),
            level: 4,
        };
        assert_eq!(
            err.to_string(),
            "No cache found for tms \"WebMercatorQuad\" and level \"4\""
        );
        assert!(err.is_config());
    }
}
