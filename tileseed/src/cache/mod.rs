//! Tile store and cache layout.
//!
//! Resolves logical tile and resource requests to loose files or tile
//! archives, following either the dataset's catalog entity (detect mode) or
//! an explicit caller-supplied layout.

mod catalog;
mod partition;
mod path;
mod store;
mod types;

pub use catalog::{
    find_entity, load_provider, provider_id, resolve_caches, ProviderEntity, SeedingLayout,
};
pub use partition::{JobShards, ShardKey, SizeClass};
pub use store::TileStore;
pub use types::{
    Cache, CacheError, CacheType, ExplicitStorage, MissingShardPolicy, ResourceType,
    StorageDescriptor, StorageKind,
};

// Re-export path utilities for convenience
pub use path::{cache_root, raster_archive_path, raster_tile_path, vector_archive_path};
