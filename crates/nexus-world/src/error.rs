//! Error types for the `nexus-world` crate.

/// Errors raised while building a map or validating positions on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    /// A map was declared with a zero dimension.
    #[error("map must be at least 1x1, got {width}x{height}")]
    EmptyMap {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
    },

    /// A row of an ASCII map has the wrong length.
    #[error("map row {row} has {len} tiles, expected {expected}")]
    RaggedRow {
        /// Zero-based row index.
        row: usize,
        /// Tiles in that row.
        len: usize,
        /// Tiles in the first row.
        expected: usize,
    },

    /// A character in an ASCII map is neither open nor blocked.
    #[error("unknown map tile {tile:?} at ({x}, {y})")]
    UnknownTile {
        /// The offending character.
        tile: char,
        /// Column.
        x: usize,
        /// Row.
        y: usize,
    },

    /// An obstacle lies outside the map.
    #[error("obstacle at ({x}, {y}) is outside the map")]
    ObstacleOutOfBounds {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// A destination is not a tile-aligned point inside the map.
    #[error("invalid destination ({x}, {y})")]
    InvalidDestination {
        /// Requested x.
        x: f64,
        /// Requested y.
        y: f64,
    },
}
