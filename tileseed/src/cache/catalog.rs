//! Catalog entities describing a dataset's tile caches.
//!
//! Entities are YAML files named `<api>-tiles.yml` somewhere below
//! `<store>/entities/instances` or `<store>/store/entities`.

use super::partition::{JobShards, SizeClass};
use super::path::{cache_root, published_stage};
use super::types::{Cache, CacheError, CacheType, StorageKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directories searched for entities, relative to the store root.
pub const ENTITY_DIRS: &[&str] = &["entities/instances", "store/entities"];

/// Tile provider entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntity {
    #[serde(default)]
    pub caches: Vec<CacheEntry>,
    #[serde(default)]
    pub raster_tilesets: Option<serde_yaml::Value>,
    #[serde(default)]
    pub seeding: Option<SeedingEntry>,
}

/// One cache declared on a provider.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "type")]
    pub cache_type: String,
    pub storage: String,
    #[serde(default)]
    pub seeded: Option<bool>,
    /// Zoom range per tiling matrix
    #[serde(default)]
    pub levels: BTreeMap<String, LevelRange>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LevelRange {
    pub min: u8,
    pub max: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedingEntry {
    #[serde(default)]
    pub job_size: Option<String>,
}

impl ProviderEntity {
    /// Whether the provider publishes raster tilesets.
    pub fn has_raster(&self) -> bool {
        self.raster_tilesets
            .as_ref()
            .is_some_and(|v| !matches!(v, serde_yaml::Value::Null | serde_yaml::Value::Bool(false)))
    }

    /// Configured shard size class, `M` when unset.
    pub fn size_class(&self) -> SizeClass {
        self.seeding
            .as_ref()
            .and_then(|s| s.job_size.as_deref())
            .map(SizeClass::from_letter)
            .unwrap_or_default()
    }
}

/// Provider entity id for a dataset.
pub fn provider_id(api: &str) -> String {
    format!("{}-tiles", api)
}

/// Find the entity file for `entity_id`, searching entity dirs recursively.
pub fn find_entity(store_root: &Path, entity_id: &str) -> Option<PathBuf> {
    let file_name = format!("{}.yml", entity_id);

    ENTITY_DIRS
        .iter()
        .map(|dir| store_root.join(dir))
        .filter(|dir| dir.is_dir())
        .find_map(|dir| find_file(&dir, &file_name))
}

fn find_file(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let (dirs, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|p| p.is_dir());

    files
        .into_iter()
        .find(|p| p.file_name().is_some_and(|n| n == file_name))
        .or_else(|| dirs.iter().find_map(|d| find_file(d, file_name)))
}

/// Load and parse the provider entity of a dataset.
pub fn load_provider(store_root: &Path, api: &str) -> Result<ProviderEntity, CacheError> {
    let id = provider_id(api);
    let path = find_entity(store_root, &id).ok_or_else(|| CacheError::ProviderNotFound(id.clone()))?;

    debug!(path = %path.display(), "Tile provider");

    let content = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&content).map_err(|source| CacheError::Catalog { path, source })
}

/// Expand the provider's first seeded cache into one [`Cache`] per
/// (tiling matrix, level).
///
/// An `IMMUTABLE` cache marked `seeded: false` is rejected: immutable
/// caches only exist as seeded snapshots.
pub fn resolve_caches(
    store_root: &Path,
    api: &str,
    provider: &ProviderEntity,
) -> Result<Vec<Cache>, CacheError> {
    for entry in &provider.caches {
        let cache_type: CacheType = entry.cache_type.parse()?;
        entry.storage.parse::<StorageKind>()?;
        if cache_type == CacheType::Immutable && entry.seeded == Some(false) {
            return Err(CacheError::InvalidConfig(format!(
                "immutable cache of \"{}\" is marked as not seeded",
                provider_id(api)
            )));
        }
    }

    let Some(entry) = provider.caches.iter().find(|c| c.seeded != Some(false)) else {
        return Ok(Vec::new());
    };

    let cache_type: CacheType = entry.cache_type.parse()?;
    let storage: StorageKind = entry.storage.parse()?;
    let root = cache_root(store_root, api, cache_type);
    let path = match cache_type {
        CacheType::Immutable => published_stage(&root),
        CacheType::Dynamic => root,
    };

    let mut caches = Vec::new();
    for (tms, range) in &entry.levels {
        if range.min > range.max {
            return Err(CacheError::InvalidConfig(format!(
                "level range {}..{} of {} is inverted",
                range.min, range.max, tms
            )));
        }
        caches.extend((range.min..=range.max).map(|level| Cache {
            tms: tms.clone(),
            level,
            storage,
            path: path.clone(),
            has_raster: provider.has_raster(),
        }));
    }

    Ok(caches)
}

/// Storage layout derived from a dataset's caches.
#[derive(Debug, Clone)]
pub struct SeedingLayout {
    caches: Vec<Cache>,
    pub per_tile: bool,
    pub per_job: bool,
    pub per_tileset: bool,
    pub shards: JobShards,
}

impl SeedingLayout {
    /// Build the layout.
    ///
    /// `per_job`: `Some` forces job sharding; `None` enables it when every
    /// cache is `PER_JOB`. Caches mixing loose-file and archive storage are
    /// rejected because tile addressing would depend on the level.
    pub fn new(
        caches: Vec<Cache>,
        per_job: Option<bool>,
        size_class: SizeClass,
        provider: &str,
    ) -> Result<Self, CacheError> {
        if caches.is_empty() {
            return Err(CacheError::NoSeededCache(provider.to_string()));
        }

        let per_tile = caches.iter().all(|c| c.storage.is_tile_granular());
        let any_tile = caches.iter().any(|c| c.storage.is_tile_granular());
        if any_tile && !per_tile {
            return Err(CacheError::InvalidConfig(format!(
                "caches of \"{}\" mix per-tile and archive storage",
                provider
            )));
        }

        let per_job = per_job.unwrap_or_else(|| caches.iter().all(|c| c.storage == StorageKind::PerJob));
        let per_tileset = caches.iter().all(|c| c.storage.is_per_tileset());
        let shards = if per_job {
            JobShards::new(size_class.tile_count())?
        } else {
            JobShards::NONE
        };

        Ok(Self {
            caches,
            per_tile,
            per_job,
            per_tileset,
            shards,
        })
    }

    /// Cache for exactly `(tms, level)`.
    pub fn find(&self, tms: &str, level: u8) -> Option<&Cache> {
        self.caches.iter().find(|c| c.tms == tms && c.level == level)
    }

    /// Storage kind shared by every cache.
    pub fn storage_kind(&self) -> StorageKind {
        self.caches[0].storage
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }
}
