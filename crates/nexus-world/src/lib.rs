//! Tile map, geometry, and movement for the Nexus simulation.
//!
//! # Modules
//!
//! - [`error`] -- Error types for map construction and destination checks.
//! - [`geometry`] -- Distances, directions, and timed path sampling.
//! - [`map`] -- The shared [`WorldMap`] of open and blocked tiles.
//! - [`movement`] -- Collision checks, A* route-finding, and random
//!   placement for joins and wandering.

pub mod error;
pub mod geometry;
pub mod map;
pub mod movement;

pub use error::WorldError;
pub use geometry::{PathSample, distance, midpoint, path_position, points_equal};
pub use map::{Tile, WorldMap};
pub use movement::{BlockReason, MovementRules, Route, blocked, find_route};
