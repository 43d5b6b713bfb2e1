//! The tile map all players share.
//!
//! A [`WorldMap`] is a `width` x `height` grid of unit tiles, some of which
//! are blocked by scenery. Player positions are continuous, but movement
//! happens along tile edges, so every stationary player sits on a tile
//! corner with integral coordinates.

use std::collections::BTreeSet;

use nexus_types::Point;
use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// Character marking an open tile in an ASCII map.
pub const OPEN_TILE: char = '.';
/// Character marking a blocked tile in an ASCII map.
pub const BLOCKED_TILE: char = '#';

/// Integral tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tile {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl Tile {
    /// The point at this tile's origin.
    pub fn point(self) -> Point {
        Point::new(f64::from(self.x), f64::from(self.y))
    }
}

/// Grid of open and blocked tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMap {
    width: u32,
    height: u32,
    obstacles: BTreeSet<Tile>,
}

impl WorldMap {
    /// Create an open map with no obstacles.
    pub fn new(width: u32, height: u32) -> Result<Self, WorldError> {
        Self::with_obstacles(width, height, [])
    }

    /// Create a map with the given blocked tiles.
    pub fn with_obstacles(
        width: u32,
        height: u32,
        obstacles: impl IntoIterator<Item = Tile>,
    ) -> Result<Self, WorldError> {
        if width == 0 || height == 0 {
            return Err(WorldError::EmptyMap { width, height });
        }
        let mut set = BTreeSet::new();
        for tile in obstacles {
            if tile.x >= width || tile.y >= height {
                return Err(WorldError::ObstacleOutOfBounds {
                    x: tile.x,
                    y: tile.y,
                });
            }
            set.insert(tile);
        }
        Ok(Self {
            width,
            height,
            obstacles: set,
        })
    }

    /// Parse an ASCII map: one string per row, `.` open, `#` blocked.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Result<Self, WorldError> {
        let expected = rows.first().map_or(0, |r| r.as_ref().chars().count());
        let mut obstacles = Vec::new();
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let len = row.chars().count();
            if len != expected {
                return Err(WorldError::RaggedRow {
                    row: y,
                    len,
                    expected,
                });
            }
            for (x, tile) in row.chars().enumerate() {
                match tile {
                    OPEN_TILE => {}
                    BLOCKED_TILE => obstacles.push(Tile {
                        x: to_u32(x),
                        y: to_u32(y),
                    }),
                    other => {
                        return Err(WorldError::UnknownTile {
                            tile: other,
                            x,
                            y,
                        });
                    }
                }
            }
        }
        Self::with_obstacles(to_u32(expected), to_u32(rows.len()), obstacles)
    }

    /// Map width in tiles.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Map height in tiles.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether a point lies inside the map.
    pub fn in_bounds(&self, point: Point) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x < f64::from(self.width)
            && point.y < f64::from(self.height)
    }

    /// The tile containing a point, if it is inside the map.
    pub fn tile_at(&self, point: Point) -> Option<Tile> {
        if !self.in_bounds(point) {
            return None;
        }
        // In-bounds points are non-negative and below a u32 dimension.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(Tile {
            x: point.x.floor() as u32,
            y: point.y.floor() as u32,
        })
    }

    /// Whether a tile is blocked by scenery.
    pub fn is_obstacle(&self, tile: Tile) -> bool {
        self.obstacles.contains(&tile)
    }

    /// All tiles not blocked by scenery, in row-major order.
    pub fn open_tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width)
                .map(move |x| Tile { x, y })
                .filter(|t| !self.obstacles.contains(t))
        })
    }

    /// Check that a destination is tile-aligned, inside the map, and open.
    pub fn validate_destination(&self, point: Point) -> Result<Tile, WorldError> {
        let invalid = WorldError::InvalidDestination {
            x: point.x,
            y: point.y,
        };
        if point.x.fract().abs() > f64::EPSILON || point.y.fract().abs() > f64::EPSILON {
            return Err(invalid);
        }
        match self.tile_at(point) {
            Some(tile) if !self.is_obstacle(tile) => Ok(tile),
            _ => Err(invalid),
        }
    }
}

/// Convert an index to `u32`, saturating on overflow.
fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_ascii_rows() {
        let map = WorldMap::from_rows(&["..#", "...", "#.."]).unwrap();
        assert_eq!(map.width(), 3);
        assert_eq!(map.height(), 3);
        assert!(map.is_obstacle(Tile { x: 2, y: 0 }));
        assert!(map.is_obstacle(Tile { x: 0, y: 2 }));
        assert!(!map.is_obstacle(Tile { x: 1, y: 1 }));
        assert_eq!(map.open_tiles().count(), 7);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = WorldMap::from_rows(&["...", ".."]).unwrap_err();
        assert!(matches!(err, WorldError::RaggedRow { row: 1, .. }));
    }

    #[test]
    fn rejects_unknown_tiles() {
        let err = WorldMap::from_rows(&[".x."]).unwrap_err();
        assert!(matches!(err, WorldError::UnknownTile { tile: 'x', .. }));
    }

    #[test]
    fn rejects_empty_map() {
        assert!(WorldMap::new(0, 4).is_err());
    }

    #[test]
    fn tile_lookup_respects_bounds() {
        let map = WorldMap::new(4, 4).unwrap();
        assert_eq!(map.tile_at(Point::new(1.5, 2.9)), Some(Tile { x: 1, y: 2 }));
        assert_eq!(map.tile_at(Point::new(4.0, 0.0)), None);
        assert_eq!(map.tile_at(Point::new(-0.1, 0.0)), None);
    }

    #[test]
    fn destinations_must_be_integral_and_open() {
        let map = WorldMap::from_rows(&[".#", ".."]).unwrap();
        assert!(map.validate_destination(Point::new(0.0, 1.0)).is_ok());
        assert!(map.validate_destination(Point::new(0.5, 1.0)).is_err());
        assert!(map.validate_destination(Point::new(1.0, 0.0)).is_err());
        assert!(map.validate_destination(Point::new(5.0, 0.0)).is_err());
    }
}
