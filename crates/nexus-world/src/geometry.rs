//! Point and vector arithmetic, plus sampling of timed paths.

use nexus_types::{Path, Point, Vector};

/// Tolerance for treating two coordinates as the same grid position.
pub const POSITION_EPSILON: f64 = 1e-4;

/// Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Manhattan distance between two points.
pub fn manhattan_distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).abs() + (a.y - b.y).abs()
}

/// Whether two points coincide to map-grid precision.
pub fn points_equal(a: Point, b: Point) -> bool {
    (a.x - b.x).abs() < POSITION_EPSILON && (a.y - b.y).abs() < POSITION_EPSILON
}

/// Midpoint of two points.
pub fn midpoint(a: Point, b: Point) -> Point {
    Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Length of a vector.
pub fn vector_length(v: Vector) -> f64 {
    v.dx.hypot(v.dy)
}

/// Unit vector in the direction of `v`, or `None` for a zero vector.
pub fn normalize(v: Vector) -> Option<Vector> {
    let len = vector_length(v);
    if len < POSITION_EPSILON {
        return None;
    }
    Some(Vector::new(v.dx / len, v.dy / len))
}

/// Unit vector pointing from `from` toward `to`, if they differ.
pub fn direction(from: Point, to: Point) -> Option<Vector> {
    normalize(Vector::new(to.x - from.x, to.y - from.y))
}

/// State of a traveller sampled from a [`Path`] at some instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSample {
    /// Interpolated position.
    pub position: Point,
    /// Facing of the current segment.
    pub facing: Vector,
    /// Speed along the current segment in tiles per second.
    pub velocity: f64,
}

/// Sample a path at time `t` (milliseconds).
///
/// Before the first waypoint the traveller rests at it; after the last it
/// rests at the last with zero velocity. Returns `None` for an empty path.
pub fn path_position(path: &Path, t: u64) -> Option<PathSample> {
    let first = path.first()?;
    if t <= first.t {
        return Some(PathSample {
            position: first.position,
            facing: first.facing,
            velocity: 0.0,
        });
    }
    for pair in path.windows(2) {
        let [start, end] = pair else {
            continue;
        };
        if t >= end.t {
            continue;
        }
        let span = end.t.saturating_sub(start.t);
        if span == 0 {
            continue;
        }
        let elapsed = t.saturating_sub(start.t);
        #[allow(clippy::cast_precision_loss)]
        let fraction = elapsed as f64 / span as f64;
        let position = Point::new(
            start.position.x + (end.position.x - start.position.x) * fraction,
            start.position.y + (end.position.y - start.position.y) * fraction,
        );
        #[allow(clippy::cast_precision_loss)]
        let velocity = distance(start.position, end.position) / (span as f64 / 1000.0);
        return Some(PathSample {
            position,
            facing: end.facing,
            velocity,
        });
    }
    let last = path.last()?;
    Some(PathSample {
        position: last.position,
        facing: last.facing,
        velocity: 0.0,
    })
}
