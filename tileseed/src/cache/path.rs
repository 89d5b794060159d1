//! Store path construction.
//!
//! Detected layouts place tiles below a cache root:
//!
//! ```text
//! <cache>/<tileset>/<tms>/<z>/<y>/<x>.<ext>                   vector, per tile
//! <cache>/<tileset>_<style>/<tms>/<z>/<y>/<x>.png             raster, per tile
//! <cache>/<tileset>_<style>/<tms>.mbtiles                     raster, per tileset
//! <cache>/<tileset>_<style>/<tms>/<shard>.mbtiles             raster, per job
//! ```

use super::partition::ShardKey;
use super::types::{CacheError, CacheType, ResourceType};
use crate::coord::TileCoord;
use std::path::{Path, PathBuf};

/// Marker file of an immutable cache stage that is still being written.
pub const STAGING_MARKER: &str = ".staging";

/// Extension of tile archives.
pub const ARCHIVE_EXTENSION: &str = "mbtiles";

/// Extension of rendered raster tiles.
pub const RASTER_EXTENSION: &str = "png";

/// Tile root of a dataset: `<store>/resources/tiles/<api>/<cache_dyn|cache_imm>`.
pub fn cache_root(store_root: &Path, api: &str, cache_type: CacheType) -> PathBuf {
    store_root
        .join(ResourceType::Tile.dir())
        .join(api)
        .join(cache_type.dir_name())
}

/// Select the published stage of an immutable cache.
///
/// Returns the first subdirectory, in name order, without a staging marker,
/// or `dir` itself when there is none.
pub fn published_stage(dir: &Path) -> PathBuf {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return dir.to_path_buf();
    };

    let mut stages: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && !p.join(STAGING_MARKER).exists())
        .collect();
    stages.sort();

    stages.into_iter().next().unwrap_or_else(|| dir.to_path_buf())
}

/// Directory name for a styled raster tileset.
pub fn styled_tileset(tileset: &str, style_id: &str) -> String {
    format!("{}_{}", tileset, style_id)
}

/// Path of a loose raster tile.
pub fn raster_tile_path(
    cache: &Path,
    tileset: &str,
    style_id: &str,
    tms: &str,
    tile: &TileCoord,
) -> PathBuf {
    cache
        .join(styled_tileset(tileset, style_id))
        .join(tms)
        .join(tile.zoom.to_string())
        .join(tile.row.to_string())
        .join(format!("{}.{}", tile.col, RASTER_EXTENSION))
}

/// Path of a raster archive, sharded when `shard` is set.
pub fn raster_archive_path(
    cache: &Path,
    tileset: &str,
    style_id: &str,
    tms: &str,
    shard: Option<&ShardKey>,
) -> PathBuf {
    archive_path(&cache.join(styled_tileset(tileset, style_id)), tms, shard)
}

/// Path of a vector source archive, sharded when `shard` is set.
pub fn vector_archive_path(cache: &Path, tileset: &str, tms: &str, shard: Option<&ShardKey>) -> PathBuf {
    archive_path(&cache.join(tileset), tms, shard)
}

fn archive_path(dir: &Path, tms: &str, shard: Option<&ShardKey>) -> PathBuf {
    match shard {
        Some(key) => dir.join(tms).join(format!("{}.{}", key, ARCHIVE_EXTENSION)),
        None => dir.join(format!("{}.{}", tms, ARCHIVE_EXTENSION)),
    }
}

/// Substitute `{name}` placeholders in an explicit path template.
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

/// A parsed vector tile request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePath {
    pub tms: String,
    pub tile: TileCoord,
}

/// Parse `<tms>/<z>/<y>/<x>[.<ext>]`.
pub fn parse_tile_path(rel_path: &str) -> Result<TilePath, CacheError> {
    let invalid = || CacheError::InvalidTilePath(rel_path.to_string());

    let parts: Vec<&str> = rel_path.trim_start_matches('/').split('/').collect();
    let [tms, z, y, x] = parts.as_slice() else {
        return Err(invalid());
    };

    let x = x.split('.').next().unwrap_or_default();
    let zoom = z.parse::<u8>().map_err(|_| invalid())?;
    let row = y.parse::<u32>().map_err(|_| invalid())?;
    let col = x.parse::<u32>().map_err(|_| invalid())?;

    if tms.is_empty() {
        return Err(invalid());
    }

    Ok(TilePath {
        tms: tms.to_string(),
        tile: TileCoord::new(zoom, col, row),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::partition::JobShards;
    use tempfile::TempDir;

    #[test]
    fn test_cache_root() {
        let root = cache_root(Path::new("/store"), "vineyards", CacheType::Dynamic);
        assert_eq!(root, PathBuf::from("/store/resources/tiles/vineyards/cache_dyn"));
    }

    #[test]
    fn test_raster_tile_path() {
        let path = raster_tile_path(
            Path::new("/c"),
            "vineyards",
            "night",
            "WebMercatorQuad",
            &TileCoord::new(5, 17, 11),
        );
        assert_eq!(
            path,
            PathBuf::from("/c/vineyards_night/WebMercatorQuad/5/11/17.png")
        );
    }

    #[test]
    fn test_archive_paths() {
        let cache = Path::new("/c");
        assert_eq!(
            raster_archive_path(cache, "vineyards", "day", "WebMercatorQuad", None),
            PathBuf::from("/c/vineyards_day/WebMercatorQuad.mbtiles")
        );

        let key = JobShards::new(1024).unwrap().key(10, 40, 70);
        assert_eq!(
            vector_archive_path(cache, "vineyards", "WebMercatorQuad", Some(&key)),
            PathBuf::from("/c/vineyards/WebMercatorQuad/10_64-95_32-63.mbtiles")
        );
    }

    #[test]
    fn test_styles_do_not_collide() {
        let tile = TileCoord::new(3, 1, 1);
        let a = raster_tile_path(Path::new("/c"), "t", "day", "WebMercatorQuad", &tile);
        let b = raster_tile_path(Path::new("/c"), "t", "night", "WebMercatorQuad", &tile);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_template() {
        let filled = fill_template(
            "tiles/{z}/{row}/{col}.png",
            &[("z", "4".into()), ("row", "2".into()), ("col", "9".into())],
        );
        assert_eq!(filled, "tiles/4/2/9.png");
        assert_eq!(fill_template("a/{partition}.mbtiles", &[]), "a/{partition}.mbtiles");
    }

    #[test]
    fn test_parse_tile_path() {
        let parsed = parse_tile_path("WebMercatorQuad/10/70/40.pbf").unwrap();
        assert_eq!(parsed.tms, "WebMercatorQuad");
        assert_eq!(parsed.tile, TileCoord::new(10, 40, 70));

        assert!(parse_tile_path("WebMercatorQuad/10/70").is_err());
        assert!(parse_tile_path("WebMercatorQuad/z/70/40.pbf").is_err());
    }

    #[test]
    fn test_published_stage_skips_staging() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("2024-01/")).unwrap();
        std::fs::write(dir.path().join("2024-01").join(STAGING_MARKER), "").unwrap();
        std::fs::create_dir_all(dir.path().join("2024-02")).unwrap();

        assert_eq!(published_stage(dir.path()), dir.path().join("2024-02"));
    }

    #[test]
    fn test_published_stage_falls_back_to_root() {
        let dir = TempDir::new().unwrap();
        assert_eq!(published_stage(dir.path()), dir.path().to_path_buf());
        assert_eq!(
            published_stage(&dir.path().join("missing")),
            dir.path().join("missing")
        );
    }
}
