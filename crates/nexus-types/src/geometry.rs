//! Geometry primitives shared by the world, the engine and the dashboard.
//!
//! Positions are continuous tile coordinates. A [`Path`] is a sequence of
//! timed waypoints produced by route-finding and sampled every tick.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A position on the tile map.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Point {
    /// Horizontal tile coordinate.
    pub x: f64,
    /// Vertical tile coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Snap both coordinates down to the containing tile.
    pub fn floor(self) -> Self {
        Self {
            x: self.x.floor(),
            y: self.y.floor(),
        }
    }
}

/// A direction or velocity on the tile map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Vector {
    /// Horizontal component.
    pub dx: f64,
    /// Vertical component.
    pub dy: f64,
}

impl Vector {
    /// Create a vector.
    pub const fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }
}

impl Default for Vector {
    /// Players face down the map unless told otherwise.
    fn default() -> Self {
        Self { dx: 0.0, dy: 1.0 }
    }
}

/// One timed waypoint of a [`Path`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PathComponent {
    /// Position reached at time `t`.
    pub position: Point,
    /// Facing while travelling toward this waypoint.
    pub facing: Vector,
    /// Arrival time in milliseconds.
    pub t: u64,
}

/// A timed route through the map, ordered by ascending `t`.
pub type Path = Vec<PathComponent>;
