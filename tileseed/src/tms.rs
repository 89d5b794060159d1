//! Tiling matrix set definitions.
//!
//! A tiling matrix set names a quadtree grid. Grids other than the web
//! standard `WebMercatorQuad` are addressed with a zoom offset relative to it,
//! which the style adjustment uses to remap zoom-dependent properties.

use std::fmt;

/// Identifier of the web-standard tiling matrix set.
pub const WEB_MERCATOR_QUAD: &str = "WebMercatorQuad";

/// A named tiling matrix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMatrixSet {
    /// Identifier used in paths, catalog entries and job payloads
    pub name: &'static str,
    /// Tile edge length in logical pixels
    pub tile_size: u32,
    /// Zoom offset relative to `WebMercatorQuad`
    pub zoom_delta: i32,
}

impl TileMatrixSet {
    /// Returns true for the web-standard grid (no style adjustment needed).
    pub fn is_web_mercator(&self) -> bool {
        self.name == WEB_MERCATOR_QUAD
    }
}

impl fmt::Display for TileMatrixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// All supported tiling matrix sets.
pub const TILE_MATRIX_SETS: &[TileMatrixSet] = &[
    TileMatrixSet {
        name: WEB_MERCATOR_QUAD,
        tile_size: 256,
        zoom_delta: 0,
    },
    TileMatrixSet {
        name: "AdV_25832",
        tile_size: 256,
        zoom_delta: -5,
    },
    TileMatrixSet {
        name: "AdV_25833",
        tile_size: 256,
        zoom_delta: -5,
    },
];

/// Look up a tiling matrix set by identifier.
pub fn find_tile_matrix_set(id: &str) -> Option<TileMatrixSet> {
    TILE_MATRIX_SETS.iter().find(|tms| tms.name == id).copied()
}
