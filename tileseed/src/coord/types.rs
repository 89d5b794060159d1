//! Coordinate type definitions

use std::fmt;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Zoom levels addressable by the tile grid
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 24;

/// Tile coordinates in a quadtree tiling matrix.
///
/// Rows are counted from the top of the grid (XYZ convention). Archives that
/// store rows counted from the bottom translate at their own boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Y coordinate (north-south), 0 at north
    pub row: u32,
    /// X coordinate (east-west), 0 at west
    pub col: u32,
    /// Zoom level
    pub zoom: u8,
}

impl TileCoord {
    /// Create a tile coordinate from zoom, column and row.
    #[inline]
    pub fn new(zoom: u8, col: u32, row: u32) -> Self {
        Self { row, col, zoom }
    }

    /// Number of tiles along one axis at this tile's zoom level.
    #[inline]
    pub fn matrix_size(&self) -> u64 {
        1u64 << self.zoom
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// Which axes of a tile touch the border of the full grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeFlags {
    /// Tile is in the first or last column
    pub x: bool,
    /// Tile is in the first or last row
    pub y: bool,
}

/// Geographic bounding box in degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLatBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl std::str::FromStr for LonLatBounds {
    type Err = CoordError;

    /// Parses `minLon,minLat,maxLon,maxLat`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Vec<f64> = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| CoordError::InvalidBounds(s.to_string()))?;

        match values.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => Ok(Self {
                min_lon: *min_lon,
                min_lat: *min_lat,
                max_lon: *max_lon,
                max_lat: *max_lat,
            }),
            _ => Err(CoordError::InvalidBounds(s.to_string())),
        }
    }
}

/// Inclusive rectangle of tile indices at one zoom level.
///
/// This is the unit of work of a render job: `[min_x, max_x] × [min_y, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Create a tile range, rejecting inverted rectangles.
    pub fn new(zoom: u8, min_x: u32, max_x: u32, min_y: u32, max_y: u32) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        if min_x > max_x || min_y > max_y {
            return Err(CoordError::EmptyRange {
                min_x,
                max_x,
                min_y,
                max_y,
            });
        }
        Ok(Self {
            zoom,
            min_x,
            max_x,
            min_y,
            max_y,
        })
    }

    /// Total number of tiles: `(max_x - min_x + 1) × (max_y - min_y + 1)`.
    #[inline]
    pub fn tile_count(&self) -> u64 {
        (self.max_x - self.min_x + 1) as u64 * (self.max_y - self.min_y + 1) as u64
    }

    /// Returns true if the tile lies inside this range.
    pub fn contains(&self, tile: &TileCoord) -> bool {
        tile.zoom == self.zoom
            && (self.min_x..=self.max_x).contains(&tile.col)
            && (self.min_y..=self.max_y).contains(&tile.row)
    }

    /// Iterates every tile in the range.
    ///
    /// Columns form the outer loop and rows the inner loop, so tiles are
    /// yielded column by column: (x0,y0), (x0,y1), ..., (x1,y0), ...
    pub fn tiles(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            next: Some((self.min_x, self.min_y)),
        }
    }
}

impl fmt::Display for TileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "z{} x[{}..{}] y[{}..{}]",
            self.zoom, self.min_x, self.max_x, self.min_y, self.max_y
        )
    }
}

/// Iterator over all tiles of a [`TileRange`].
#[derive(Debug, Clone)]
pub struct TileRangeIter {
    range: TileRange,
    next: Option<(u32, u32)>,
}

impl Iterator for TileRangeIter {
    type Item = TileCoord;

    fn next(&mut self) -> Option<Self::Item> {
        let (x, y) = self.next?;

        self.next = if y < self.range.max_y {
            Some((x, y + 1))
        } else if x < self.range.max_x {
            Some((x + 1, self.range.min_y))
        } else {
            None
        };

        Some(TileCoord::new(self.range.zoom, x, y))
    }
}

/// Coordinate conversion errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoordError {
    /// Latitude is outside valid range (-85.05112878 to 85.05112878)
    InvalidLatitude(f64),
    /// Longitude is outside valid range (-180.0 to 180.0)
    InvalidLongitude(f64),
    /// Zoom level is outside valid range
    InvalidZoom(u8),
    /// Bounding box string could not be parsed
    InvalidBounds(String),
    /// Tile rectangle with min greater than max
    EmptyRange {
        min_x: u32,
        max_x: u32,
        min_y: u32,
        max_y: u32,
    },
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::InvalidLatitude(lat) => {
                write!(
                    f,
                    "Invalid latitude: {} (must be between {} and {})",
                    lat, MIN_LAT, MAX_LAT
                )
            }
            CoordError::InvalidLongitude(lon) => {
                write!(
                    f,
                    "Invalid longitude: {} (must be between {} and {})",
                    lon, MIN_LON, MAX_LON
                )
            }
            CoordError::InvalidZoom(zoom) => {
                write!(
                    f,
                    "Invalid zoom level: {} (must be between {} and {})",
                    zoom, MIN_ZOOM, MAX_ZOOM
                )
            }
            CoordError::InvalidBounds(bounds) => {
                write!(
                    f,
                    "Invalid bounding box: '{}' (expected minLon,minLat,maxLon,maxLat)",
                    bounds
                )
            }
            CoordError::EmptyRange {
                min_x,
                max_x,
                min_y,
                max_y,
            } => {
                write!(
                    f,
                    "Empty tile range: x[{}..{}] y[{}..{}]",
                    min_x, max_x, min_y, max_y
                )
            }
        }
    }
}

impl std::error::Error for CoordError {}
