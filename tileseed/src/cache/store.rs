//! Tile store.
//!
//! A [`TileStore`] resolves resource and tile requests of one job to files
//! and archives below a store root. Archives are obtained from a shared
//! [`ArchivePool`]; the store remembers what it acquired and releases each
//! archive once on [`TileStore::close`].

use super::catalog::{load_provider, provider_id, resolve_caches, SeedingLayout};
use super::partition::JobShards;
use super::path::{
    fill_template, parse_tile_path, raster_archive_path, raster_tile_path, vector_archive_path,
};
use super::types::{
    Cache, CacheError, ExplicitStorage, MissingShardPolicy, ResourceType, StorageDescriptor,
    StorageKind,
};
use crate::archive::{ArchiveError, ArchiveHandle, ArchiveOpenOptions, ArchivePool, RowOrigin};
use crate::coord::TileCoord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Resolved physical layout of a store.
#[derive(Debug, Clone)]
enum Layout {
    Detected(SeedingLayout),
    Explicit {
        storage: ExplicitStorage,
        shards: JobShards,
    },
}

/// Where one tile lives.
enum TileLocation {
    File(PathBuf),
    Archive(PathBuf),
}

/// Tile and resource access for one job.
pub struct TileStore {
    root: PathBuf,
    api: String,
    tileset: String,
    layout: Layout,
    pool: Arc<ArchivePool>,
    missing_shard_policy: MissingShardPolicy,
    /// Archives acquired by this store, one pool reference each
    handles: Mutex<HashMap<PathBuf, Arc<ArchiveHandle>>>,
}

impl TileStore {
    /// Resolve a storage descriptor into a store.
    ///
    /// Detect mode reads the dataset's catalog entity and fails when it has
    /// no seeded cache. The missing-shard policy defaults to
    /// [`MissingShardPolicy::NotFound`] for job-sharded stores and
    /// [`MissingShardPolicy::Error`] otherwise.
    pub async fn open(
        descriptor: &StorageDescriptor,
        api: &str,
        tileset: &str,
        pool: Arc<ArchivePool>,
    ) -> Result<Self, CacheError> {
        let layout = match descriptor {
            StorageDescriptor::Detect {
                store_root,
                per_job,
                ..
            } => {
                let store_root = store_root.clone();
                let api = api.to_string();
                let per_job = *per_job;
                blocking(move || {
                    let provider = load_provider(&store_root, &api)?;
                    let caches = resolve_caches(&store_root, &api, &provider)?;
                    SeedingLayout::new(caches, per_job, provider.size_class(), &provider_id(&api))
                })
                .await
                .map(Layout::Detected)?
            }
            StorageDescriptor::Explicit { storage, .. } => Layout::Explicit {
                shards: JobShards::new(storage.job_size)?,
                storage: storage.clone(),
            },
        };

        let store = Self {
            root: descriptor.store_root().clone(),
            api: api.to_string(),
            tileset: tileset.to_string(),
            missing_shard_policy: default_policy(&layout),
            layout,
            pool,
            handles: Mutex::new(HashMap::new()),
        };

        debug!(
            root = %store.root.display(),
            api = %store.api,
            tileset = %store.tileset,
            storage = %store.storage_kind(),
            "Opened tile store"
        );

        Ok(store)
    }

    /// Override how reads from job shards that do not exist are handled.
    pub fn with_missing_shard_policy(mut self, policy: MissingShardPolicy) -> Self {
        self.missing_shard_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn tileset(&self) -> &str {
        &self.tileset
    }

    pub fn missing_shard_policy(&self) -> MissingShardPolicy {
        self.missing_shard_policy
    }

    /// Storage kind of the tiles this store writes.
    pub fn storage_kind(&self) -> StorageKind {
        match &self.layout {
            Layout::Detected(layout) => layout.storage_kind(),
            Layout::Explicit { storage, .. } => storage.tile_storage,
        }
    }

    /// Whether every tile is its own file, so writes never share an archive.
    pub fn is_tile_granular(&self) -> bool {
        self.storage_kind().is_tile_granular()
    }

    /// Whether tiles are spread over job-shard archives.
    pub fn is_per_job(&self) -> bool {
        match &self.layout {
            Layout::Detected(layout) => layout.per_job,
            Layout::Explicit { storage, .. } => storage.tile_storage == StorageKind::PerJob,
        }
    }

    /// Read a resource.
    ///
    /// Non-tile resources are plain files; missing files are I/O errors.
    /// Tile resources take a `<tms>/<z>/<y>/<x>.<ext>` path and resolve to
    /// `Ok(None)` when the tile is absent from its archive.
    pub async fn read(
        &self,
        resource: ResourceType,
        rel_path: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        if resource == ResourceType::Tile {
            return self.read_tile(rel_path).await;
        }

        let path = self.resource_path(resource, rel_path);
        trace!(path = %path.display(), "Reading resource");
        Ok(Some(tokio::fs::read(&path).await?))
    }

    /// Physical path of a non-tile resource.
    pub fn resource_path(&self, resource: ResourceType, rel_path: &str) -> PathBuf {
        match (&self.layout, resource) {
            (Layout::Explicit { storage, .. }, ResourceType::Style) => self.root.join(&storage.style),
            _ => self.root.join(resource.dir()).join(rel_path),
        }
    }

    /// Check whether a rendered tile already exists.
    ///
    /// Archive storage checks the archive file first and only opens it
    /// (writable, since a write normally follows) when it exists.
    pub async fn has_tile(
        &self,
        style_id: &str,
        tms: &str,
        tile: &TileCoord,
        row_origin: RowOrigin,
    ) -> Result<bool, CacheError> {
        match self.raster_location(style_id, tms, tile)? {
            TileLocation::File(path) => Ok(tokio::fs::try_exists(&path).await?),
            TileLocation::Archive(path) => {
                if !tokio::fs::try_exists(&path).await? {
                    return Ok(false);
                }
                let handle = self
                    .archive(&path, ArchiveOpenOptions::writable(row_origin))
                    .await?;
                let tile = *tile;
                blocking(move || Ok(handle.has_tile(&tile)?)).await
            }
        }
    }

    /// Store a rendered tile.
    pub async fn write_tile(
        &self,
        style_id: &str,
        tms: &str,
        tile: &TileCoord,
        data: Vec<u8>,
        row_origin: RowOrigin,
    ) -> Result<(), CacheError> {
        match self.raster_location(style_id, tms, tile)? {
            TileLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let temp_path = path.with_extension("tmp");
                tokio::fs::write(&temp_path, &data).await?;
                tokio::fs::rename(&temp_path, &path).await?;
                debug!(tile = %tile, path = %path.display(), "Stored tile");
            }
            TileLocation::Archive(path) => {
                let handle = self
                    .archive(&path, ArchiveOpenOptions::writable(row_origin))
                    .await?;
                let coord = *tile;
                blocking(move || Ok(handle.put_tile(&coord, &data)?)).await?;
                debug!(tile = %tile, path = %path.display(), "Stored tile");
            }
        }
        Ok(())
    }

    /// Release every archive this store acquired.
    ///
    /// The first release error is returned after all releases were tried.
    pub async fn close(&self) -> Result<(), CacheError> {
        let paths: Vec<PathBuf> = self.handles.lock().await.drain().map(|(p, _)| p).collect();
        if paths.is_empty() {
            return Ok(());
        }

        let pool = Arc::clone(&self.pool);
        blocking(move || {
            let mut first_error = None;
            for path in paths {
                if let Err(e) = pool.release(&path) {
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        })
        .await
    }

    /// Get an archive handle, acquiring it from the pool on first use.
    ///
    /// The handle map stays locked across the acquire so concurrent tiles
    /// of this store take one pool reference per archive, not one each.
    async fn archive(
        &self,
        path: &Path,
        options: ArchiveOpenOptions,
    ) -> Result<Arc<ArchiveHandle>, CacheError> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(path) {
            return Ok(Arc::clone(handle));
        }

        let pool = Arc::clone(&self.pool);
        let owned = path.to_path_buf();
        let handle = blocking(move || Ok(pool.acquire(&owned, options)?)).await?;
        handles.insert(path.to_path_buf(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Cache receiving rendered tiles of zoom `z`: the one for `max(z-1, 0)`.
    fn raster_cache(&self, layout: &SeedingLayout, tms: &str, zoom: u8) -> Result<Cache, CacheError> {
        let level = zoom.saturating_sub(1);
        layout
            .find(tms, level)
            .cloned()
            .ok_or_else(|| CacheError::NoCache {
                tms: tms.to_string(),
                level: zoom,
            })
    }

    fn raster_location(
        &self,
        style_id: &str,
        tms: &str,
        tile: &TileCoord,
    ) -> Result<TileLocation, CacheError> {
        match &self.layout {
            Layout::Detected(layout) => {
                let cache = self.raster_cache(layout, tms, tile.zoom)?;
                if cache.storage.is_tile_granular() {
                    return Ok(TileLocation::File(raster_tile_path(
                        &cache.path,
                        &self.tileset,
                        style_id,
                        tms,
                        tile,
                    )));
                }
                let shard = layout
                    .shards
                    .is_sharded()
                    .then(|| layout.shards.key(tile.zoom, tile.col, tile.row));
                Ok(TileLocation::Archive(raster_archive_path(
                    &cache.path,
                    &self.tileset,
                    style_id,
                    tms,
                    shard.as_ref(),
                )))
            }
            Layout::Explicit { storage, shards } => {
                Ok(self.explicit_location(&storage.raster, storage.tile_storage, shards, tile))
            }
        }
    }

    fn explicit_location(
        &self,
        template: &str,
        kind: StorageKind,
        shards: &JobShards,
        tile: &TileCoord,
    ) -> TileLocation {
        if kind.is_tile_granular() {
            let rel = fill_template(
                template,
                &[
                    ("z", tile.zoom.to_string()),
                    ("row", tile.row.to_string()),
                    ("col", tile.col.to_string()),
                ],
            );
            return TileLocation::File(self.root.join(rel));
        }

        let partition = shards.key(tile.zoom, tile.col, tile.row).to_string();
        let rel = fill_template(template, &[("partition", partition)]);
        TileLocation::Archive(self.root.join(rel))
    }

    async fn read_tile(&self, rel_path: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let request = parse_tile_path(rel_path)?;
        let tile = request.tile;

        let location = match &self.layout {
            Layout::Detected(layout) => {
                let cache = layout
                    .find(&request.tms, tile.zoom)
                    .ok_or_else(|| CacheError::NoCache {
                        tms: request.tms.clone(),
                        level: tile.zoom,
                    })?;
                if cache.storage.is_tile_granular() {
                    TileLocation::File(cache.path.join(&self.tileset).join(rel_path))
                } else {
                    let shard = layout
                        .shards
                        .is_sharded()
                        .then(|| layout.shards.key(tile.zoom, tile.col, tile.row));
                    TileLocation::Archive(vector_archive_path(
                        &cache.path,
                        &self.tileset,
                        &request.tms,
                        shard.as_ref(),
                    ))
                }
            }
            Layout::Explicit { storage, shards } => {
                self.explicit_location(&storage.vector, storage.tile_storage, shards, &tile)
            }
        };

        match location {
            TileLocation::File(path) => Ok(Some(tokio::fs::read(&path).await?)),
            TileLocation::Archive(path) => {
                trace!(path = %path.display(), tile = %tile, "Reading tile from archive");
                let handle = match self.archive(&path, ArchiveOpenOptions::read_only()).await {
                    Ok(handle) => handle,
                    Err(CacheError::Archive(ArchiveError::Missing(_)))
                        if self.missing_shard_policy == MissingShardPolicy::NotFound =>
                    {
                        debug!(path = %path.display(), "Job shard not seeded yet");
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                };
                blocking(move || Ok(handle.get_tile(&tile)?)).await
            }
        }
    }
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("root", &self.root)
            .field("api", &self.api)
            .field("tileset", &self.tileset)
            .field("storage", &self.storage_kind())
            .field("missing_shard_policy", &self.missing_shard_policy)
            .finish()
    }
}

fn default_policy(layout: &Layout) -> MissingShardPolicy {
    let per_job = match layout {
        Layout::Detected(layout) => layout.per_job,
        Layout::Explicit { storage, .. } => storage.tile_storage == StorageKind::PerJob,
    };
    if per_job {
        MissingShardPolicy::NotFound
    } else {
        MissingShardPolicy::Error
    }
}

/// Run blocking store work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, CacheError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}
