//! Coordinate and grid utilities
//!
//! Pure functions over the quadtree tile grid: tile centers, grid-edge
//! detection and conversion between geographic bounding boxes and tile
//! index rectangles. Rows follow the XYZ convention (0 at the north edge).

mod types;

pub use types::{
    CoordError, EdgeFlags, LonLatBounds, TileCoord, TileRange, TileRangeIter, MAX_LAT, MAX_LON,
    MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Pixel size of a tile in the reference grid used for bbox conversion.
const REFERENCE_TILE_SIZE: f64 = 256.0;

/// Converts geographic coordinates to tile coordinates.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let n = 2.0_f64.powi(zoom as i32);
    let max_index = (n as u32).saturating_sub(1);

    let col = (((lon + 180.0) / 360.0 * n) as u32).min(max_index);

    let lat_rad = lat * PI / 180.0;
    let row = (((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32).min(max_index);

    Ok(TileCoord { row, col, zoom })
}

/// Returns the geographic center of a tile as `(lon, lat)`.
///
/// The center is independent of the tile's pixel size, so callers working in
/// tiling matrices with 256 or 512 pixel tiles get the same point.
#[inline]
pub fn tile_center_lon_lat(tile: &TileCoord) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);

    let lon = (tile.col as f64 + 0.5) / n * 360.0 - 180.0;

    let y = (tile.row as f64 + 0.5) / n;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan() * 180.0 / PI;

    (lon, lat)
}

/// Detects whether a tile sits on the first/last column or row of its grid.
#[inline]
pub fn edge_flags(tile: &TileCoord) -> EdgeFlags {
    let last = tile.matrix_size() - 1;

    EdgeFlags {
        x: tile.col == 0 || tile.col as u64 == last,
        y: tile.row == 0 || tile.row as u64 == last,
    }
}

/// Converts a geographic bounding box to the rectangle of tiles covering it.
///
/// Latitudes are clamped to the Web Mercator range. A box whose edge lies
/// exactly on a tile boundary does not pull in the neighbouring tile.
pub fn bounds_to_tile_range(bounds: &LonLatBounds, zoom: u8) -> Result<TileRange, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    for lon in [bounds.min_lon, bounds.max_lon] {
        if !(MIN_LON..=MAX_LON).contains(&lon) {
            return Err(CoordError::InvalidLongitude(lon));
        }
    }

    let world = REFERENCE_TILE_SIZE * 2.0_f64.powi(zoom as i32);
    let (west, south) = lon_lat_to_pixel(bounds.min_lon, bounds.min_lat, world);
    let (east, north) = lon_lat_to_pixel(bounds.max_lon, bounds.max_lat, world);

    let to_index = |px: f64| (px / REFERENCE_TILE_SIZE).floor().max(0.0) as u32;

    let xs = [to_index(west), to_index(east - 1.0)];
    let ys = [to_index(north), to_index(south - 1.0)];

    TileRange::new(
        zoom,
        xs[0].min(xs[1]),
        xs[0].max(xs[1]),
        ys[0].min(ys[1]),
        ys[0].max(ys[1]),
    )
}

/// Projects a lon/lat pair to global pixel coordinates in a world of `world` pixels.
fn lon_lat_to_pixel(lon: f64, lat: f64, world: f64) -> (f64, f64) {
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let x = (lon + 180.0) / 360.0 * world;

    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * world;

    (x.clamp(0.0, world), y.clamp(0.0, world))
}
