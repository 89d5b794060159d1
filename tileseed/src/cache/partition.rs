//! Job-shard partitioning.
//!
//! A job-sharded tileset splits each zoom level into square blocks of
//! `side × side` tiles, one archive per block. Levels small enough to fit in
//! a single block are kept whole.

use super::types::CacheError;
use std::fmt;

/// Named job-shard sizes recorded on a dataset's seeding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeClass {
    S,
    #[default]
    M,
    L,
    XL,
}

impl SizeClass {
    /// Parse a size letter. Anything unrecognized falls back to `M`.
    pub fn from_letter(letter: &str) -> Self {
        match letter.trim().to_ascii_uppercase().as_str() {
            "S" => SizeClass::S,
            "L" => SizeClass::L,
            "XL" => SizeClass::XL,
            _ => SizeClass::M,
        }
    }

    /// Number of tiles in one shard.
    pub fn tile_count(&self) -> u32 {
        match self {
            SizeClass::S => 256,
            SizeClass::M => 1024,
            SizeClass::L => 16384,
            SizeClass::XL => 65536,
        }
    }
}

/// Maps tiles to shard keys for a given job size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobShards {
    job_size: u32,
    side: u32,
    split_level: u8,
}

impl JobShards {
    /// Unsharded: every tile belongs to the tileset-wide archive.
    pub const NONE: JobShards = JobShards {
        job_size: 0,
        side: 0,
        split_level: 0,
    };

    /// Create a partitioning for `job_size` tiles per shard.
    ///
    /// `job_size` must be 0 or the square of a power of two.
    pub fn new(job_size: u32) -> Result<Self, CacheError> {
        if job_size == 0 {
            return Ok(Self::NONE);
        }

        let side = (job_size as f64).sqrt().round() as u32;
        if side * side != job_size || !side.is_power_of_two() {
            return Err(CacheError::InvalidJobSize(job_size));
        }

        Ok(Self {
            job_size,
            side,
            split_level: side.trailing_zeros() as u8,
        })
    }

    /// Whether tiles are spread over several archives.
    pub fn is_sharded(&self) -> bool {
        self.job_size > 0
    }

    pub fn job_size(&self) -> u32 {
        self.job_size
    }

    /// Block edge length in tiles.
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Highest zoom level stored as a single shard.
    pub fn split_level(&self) -> u8 {
        self.split_level
    }

    /// Shard key of a tile.
    ///
    /// `"{z}"` at or below the split level, otherwise
    /// `"{z}_{rowMin}-{rowMax}_{colMin}-{colMax}"` for the enclosing block.
    pub fn key(&self, zoom: u8, col: u32, row: u32) -> ShardKey {
        if !self.is_sharded() || zoom <= self.split_level {
            return ShardKey::Level(zoom);
        }

        let row_min = (row / self.side) * self.side;
        let col_min = (col / self.side) * self.side;

        ShardKey::Block {
            zoom,
            row_min,
            row_max: row_min + self.side - 1,
            col_min,
            col_max: col_min + self.side - 1,
        }
    }
}

/// Identifies one shard archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardKey {
    /// Whole zoom level
    Level(u8),
    /// One block of a zoom level, inclusive bounds
    Block {
        zoom: u8,
        row_min: u32,
        row_max: u32,
        col_min: u32,
        col_max: u32,
    },
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKey::Level(zoom) => write!(f, "{}", zoom),
            ShardKey::Block {
                zoom,
                row_min,
                row_max,
                col_min,
                col_max,
            } => write!(
                f,
                "{}_{}-{}_{}-{}",
                zoom, row_min, row_max, col_min, col_max
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_block_key_at_zoom_10() {
        let shards = JobShards::new(1024).unwrap();
        assert_eq!(shards.side(), 32);
        assert_eq!(shards.split_level(), 5);
        assert_eq!(shards.key(10, 40, 70).to_string(), "10_64-95_32-63");
    }

    #[test]
    fn test_levels_at_or_below_split_are_whole() {
        let shards = JobShards::new(1024).unwrap();
        assert_eq!(shards.key(5, 31, 31).to_string(), "5");
        assert_eq!(shards.key(0, 0, 0), ShardKey::Level(0));
        assert!(matches!(shards.key(6, 0, 0), ShardKey::Block { .. }));
    }

    #[test]
    fn test_unsharded() {
        let shards = JobShards::new(0).unwrap();
        assert!(!shards.is_sharded());
        assert_eq!(shards.key(14, 9000, 5000).to_string(), "14");
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        assert!(matches!(JobShards::new(1000), Err(CacheError::InvalidJobSize(1000))));
        // 36 = 6², side not a power of two
        assert!(JobShards::new(36).is_err());
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(SizeClass::from_letter("S").tile_count(), 256);
        assert_eq!(SizeClass::from_letter("xl").tile_count(), 65536);
        assert_eq!(SizeClass::from_letter("").tile_count(), 1024);
        assert_eq!(SizeClass::from_letter("huge"), SizeClass::M);
        for class in [SizeClass::S, SizeClass::M, SizeClass::L, SizeClass::XL] {
            assert!(JobShards::new(class.tile_count()).is_ok());
        }
    }

    fn size_class() -> impl Strategy<Value = u32> {
        prop_oneof![Just(256u32), Just(1024u32), Just(16384u32), Just(65536u32)]
    }

    proptest! {
        /// Property: key is a pure function of its inputs.
        #[test]
        fn prop_key_is_deterministic(
            job_size in size_class(),
            zoom in 0u8..=20,
            col in 0u32..1_000_000,
            row in 0u32..1_000_000,
        ) {
            let shards = JobShards::new(job_size).unwrap();
            prop_assert_eq!(shards.key(zoom, col, row), shards.key(zoom, col, row));
        }

        /// Property: tiles in the same block share a key and the block contains them.
        #[test]
        fn prop_same_block_same_key(
            job_size in size_class(),
            zoom in 9u8..=20,
            col in 0u32..100_000,
            row in 0u32..100_000,
            dx in 0u32..256,
            dy in 0u32..256,
        ) {
            let shards = JobShards::new(job_size).unwrap();
            let side = shards.side();
            let base_col = (col / side) * side;
            let base_row = (row / side) * side;

            let a = shards.key(zoom, base_col, base_row);
            let b = shards.key(zoom, base_col + dx % side, base_row + dy % side);
            prop_assert_eq!(a, b);

            if let ShardKey::Block { row_min, row_max, col_min, col_max, .. } = a {
                prop_assert!((row_min..=row_max).contains(&row));
                prop_assert!((col_min..=col_max).contains(&col));
            }
        }
    }
}
