//! Collision checks and route-finding.
//!
//! Routes are found with A* over the four-connected grid of tile corners,
//! using travel time in milliseconds as the cost and the Manhattan distance
//! to the destination as the heuristic. The frontier is a `BTreeSet` used
//! as a priority queue, keyed on `(estimate, insertion order)` so ties
//! resolve deterministically.
//!
//! Other players are obstacles too: a point within
//! [`MovementRules::collision_threshold`] of another player is blocked.

use std::collections::{BTreeMap, BTreeSet};

use nexus_types::{Path, PathComponent, Point, Vector};
use rand::Rng;
use tracing::debug;

use crate::geometry::{direction, distance, manhattan_distance, points_equal};
use crate::map::{Tile, WorldMap};

/// Tunables for movement shared by route-finding and collision checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementRules {
    /// Travel speed in tiles per second.
    pub speed: f64,
    /// Minimum distance kept from other players.
    pub collision_threshold: f64,
}

/// Why a point cannot be occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The point is off the map.
    OutOfBounds,
    /// Scenery occupies the tile.
    Obstacle,
    /// Another player stands too close.
    PlayerCollision,
}

impl core::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::OutOfBounds => "out of bounds",
            Self::Obstacle => "world blocked",
            Self::PlayerCollision => "player collision",
        };
        f.write_str(s)
    }
}

/// Check whether `point` can be occupied, given the positions of every
/// other player.
pub fn blocked(
    map: &WorldMap,
    rules: &MovementRules,
    point: Point,
    others: &[Point],
) -> Option<BlockReason> {
    let Some(tile) = map.tile_at(point) else {
        return Some(BlockReason::OutOfBounds);
    };
    if map.is_obstacle(tile) {
        return Some(BlockReason::Obstacle);
    }
    if others
        .iter()
        .any(|other| distance(*other, point) < rules.collision_threshold)
    {
        return Some(BlockReason::PlayerCollision);
    }
    None
}

/// A route produced by [`find_route`].
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Timed waypoints starting at the traveller's current position.
    pub path: Path,
    /// Set when the requested destination was unreachable and the route
    /// leads to the closest reachable point instead.
    pub new_destination: Option<Point>,
}

/// A search node in the A* arena.
struct Node {
    position: Point,
    facing: Vector,
    t: u64,
    prev: Option<usize>,
}

/// Grid key for a point; positions on the search grid are multiples of
/// whole tiles or the traveller's fractional start.
type Key = (i64, i64);

#[allow(clippy::cast_possible_truncation)]
fn key(point: Point) -> Key {
    ((point.x * 1000.0).round() as i64, (point.y * 1000.0).round() as i64)
}

/// Travel time in milliseconds for `tiles` at `speed` tiles per second.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn travel_ms(tiles: f64, speed: f64) -> u64 {
    if speed <= 0.0 {
        return u64::MAX;
    }
    (tiles / speed * 1000.0).round().max(0.0) as u64
}

/// Neighbouring search points. A fractional coordinate first snaps to the
/// adjacent grid lines; an integral position steps one tile in each
/// cardinal direction.
fn neighbors(position: Point) -> Vec<Point> {
    let mut out = Vec::with_capacity(4);
    let x_integral = position.x.fract().abs() < f64::EPSILON;
    let y_integral = position.y.fract().abs() < f64::EPSILON;
    if !x_integral {
        out.push(Point::new(position.x.floor(), position.y));
        out.push(Point::new(position.x.ceil(), position.y));
    }
    if !y_integral {
        out.push(Point::new(position.x, position.y.floor()));
        out.push(Point::new(position.x, position.y.ceil()));
    }
    if x_integral && y_integral {
        out.push(Point::new(position.x - 1.0, position.y));
        out.push(Point::new(position.x + 1.0, position.y));
        out.push(Point::new(position.x, position.y - 1.0));
        out.push(Point::new(position.x, position.y + 1.0));
    }
    out
}

/// Find a timed route from `start` to `destination` departing at `now`.
///
/// Returns `None` when no step away from `start` is possible. When the
/// destination itself cannot be reached, the route ends at the explored
/// point closest to it and [`Route::new_destination`] reports that point.
pub fn find_route(
    map: &WorldMap,
    rules: &MovementRules,
    start: Point,
    facing: Vector,
    destination: Point,
    now: u64,
    others: &[Point],
) -> Option<Route> {
    let mut arena = vec![Node {
        position: start,
        facing,
        t: now,
        prev: None,
    }];
    let mut best_cost: BTreeMap<Key, u64> = BTreeMap::new();
    best_cost.insert(key(start), now);
    let mut frontier: BTreeSet<(u64, usize)> = BTreeSet::new();
    let start_estimate = now.saturating_add(travel_ms(
        manhattan_distance(start, destination),
        rules.speed,
    ));
    frontier.insert((start_estimate, 0));

    let mut best = 0_usize;
    let mut best_remaining = manhattan_distance(start, destination);
    let mut reached = None;

    while let Some(entry) = frontier.pop_first() {
        let (_, index) = entry;
        let Some(node) = arena.get(index) else {
            continue;
        };
        let (position, t) = (node.position, node.t);
        if points_equal(position, destination) {
            reached = Some(index);
            break;
        }
        let remaining = manhattan_distance(position, destination);
        if remaining < best_remaining {
            best_remaining = remaining;
            best = index;
        }
        for next in neighbors(position) {
            if blocked(map, rules, next, others).is_some() {
                continue;
            }
            let step_t = t.saturating_add(travel_ms(distance(position, next), rules.speed));
            let next_key = key(next);
            if best_cost
                .get(&next_key)
                .is_some_and(|&existing| existing <= step_t)
            {
                continue;
            }
            best_cost.insert(next_key, step_t);
            let facing = direction(position, next).unwrap_or(facing);
            arena.push(Node {
                position: next,
                facing,
                t: step_t,
                prev: Some(index),
            });
            let next_index = arena.len().saturating_sub(1);
            let estimate = step_t.saturating_add(travel_ms(
                manhattan_distance(next, destination),
                rules.speed,
            ));
            frontier.insert((estimate, next_index));
        }
    }

    let (end, new_destination) = match reached {
        Some(index) => (index, None),
        None if best == 0 => {
            debug!(
                start_x = start.x,
                start_y = start.y,
                dest_x = destination.x,
                dest_y = destination.y,
                "no route found"
            );
            return None;
        }
        None => (best, arena.get(best).map(|n| n.position)),
    };

    let mut path = Vec::new();
    let mut cursor = Some(end);
    while let Some(index) = cursor {
        let Some(node) = arena.get(index) else {
            break;
        };
        path.push(PathComponent {
            position: node.position,
            facing: node.facing,
            t: node.t,
        });
        cursor = node.prev;
    }
    path.reverse();
    Some(Route {
        path,
        new_destination,
    })
}

/// Pick a random tile-aligned point that nobody occupies.
///
/// Tries random tiles first and falls back to a scan so a nearly full map
/// still yields a point when one exists.
pub fn random_unblocked_point<R: Rng>(
    map: &WorldMap,
    rules: &MovementRules,
    others: &[Point],
    rng: &mut R,
) -> Option<Point> {
    for _ in 0..16 {
        let candidate = Tile {
            x: rng.random_range(0..map.width()),
            y: rng.random_range(0..map.height()),
        }
        .point();
        if blocked(map, rules, candidate, others).is_none() {
            return Some(candidate);
        }
    }
    map.open_tiles()
        .map(Tile::point)
        .find(|p| blocked(map, rules, *p, others).is_none())
}

/// Pick a random open tile within `max_distance` of `position`, other than
/// the tile the traveller already stands on.
pub fn wander_destination<R: Rng>(
    map: &WorldMap,
    position: Point,
    max_distance: f64,
    rng: &mut R,
) -> Option<Point> {
    let here = position.floor();
    let candidates: Vec<Point> = map
        .open_tiles()
        .map(Tile::point)
        .filter(|p| !points_equal(*p, here) && distance(*p, position) <= max_distance)
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates
        .get(rng.random_range(0..candidates.len()))
        .copied()
}

/// One of the four cardinal facings, chosen at random.
pub fn random_facing<R: Rng>(rng: &mut R) -> Vector {
    match rng.random_range(0..4_u8) {
        0 => Vector::new(1.0, 0.0),
        1 => Vector::new(-1.0, 0.0),
        2 => Vector::new(0.0, -1.0),
        _ => Vector::new(0.0, 1.0),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    const RULES: MovementRules = MovementRules {
        speed: 1.0,
        collision_threshold: 0.75,
    };

    #[test]
    fn blocked_reasons() {
        let map = WorldMap::from_rows(&["..", ".#"]).unwrap();
        assert_eq!(
            blocked(&map, &RULES, Point::new(5.0, 0.0), &[]),
            Some(BlockReason::OutOfBounds)
        );
        assert_eq!(
            blocked(&map, &RULES, Point::new(1.0, 1.0), &[]),
            Some(BlockReason::Obstacle)
        );
        assert_eq!(
            blocked(&map, &RULES, Point::new(0.0, 0.0), &[Point::new(0.5, 0.0)]),
            Some(BlockReason::PlayerCollision)
        );
        assert_eq!(blocked(&map, &RULES, Point::new(0.0, 1.0), &[]), None);
    }

    #[test]
    fn straight_route_is_timed_by_speed() {
        let map = WorldMap::new(5, 1).unwrap();
        let route = find_route(
            &map,
            &RULES,
            Point::new(0.0, 0.0),
            Vector::default(),
            Point::new(3.0, 0.0),
            10_000,
            &[],
        )
        .unwrap();
        assert!(route.new_destination.is_none());
        assert_eq!(route.path.len(), 4);
        let last = route.path.last().unwrap();
        assert!(points_equal(last.position, Point::new(3.0, 0.0)));
        assert_eq!(last.t, 13_000);
        assert!((last.facing.dx - 1.0).abs() < 1e-9);
    }

    #[test]
    fn routes_around_walls() {
        let map = WorldMap::from_rows(&["...", "##.", "..."]).unwrap();
        let route = find_route(
            &map,
            &RULES,
            Point::new(0.0, 0.0),
            Vector::default(),
            Point::new(0.0, 2.0),
            0,
            &[],
        )
        .unwrap();
        assert!(route.new_destination.is_none());
        // Around the wall: right two, down two, left two.
        assert_eq!(route.path.len(), 7);
        for step in &route.path {
            assert!(blocked(&map, &RULES, step.position, &[]).is_none());
        }
    }

    #[test]
    fn unreachable_destination_reports_closest_point() {
        let map = WorldMap::from_rows(&["..#.", "..#.", "..#."]).unwrap();
        let route = find_route(
            &map,
            &RULES,
            Point::new(0.0, 1.0),
            Vector::default(),
            Point::new(3.0, 1.0),
            0,
            &[],
        )
        .unwrap();
        let new_destination = route.new_destination.unwrap();
        assert!(points_equal(new_destination, Point::new(1.0, 1.0)));
    }

    #[test]
    fn boxed_in_start_has_no_route() {
        let map = WorldMap::from_rows(&[".#", "#."]).unwrap();
        let route = find_route(
            &map,
            &RULES,
            Point::new(0.0, 0.0),
            Vector::default(),
            Point::new(1.0, 1.0),
            0,
            &[],
        );
        assert!(route.is_none());
    }

    #[test]
    fn fractional_start_snaps_to_grid() {
        let map = WorldMap::new(4, 1).unwrap();
        let route = find_route(
            &map,
            &RULES,
            Point::new(1.5, 0.0),
            Vector::default(),
            Point::new(3.0, 0.0),
            0,
            &[],
        )
        .unwrap();
        let second = route.path.get(1).unwrap();
        assert!(points_equal(second.position, Point::new(2.0, 0.0)));
        assert_eq!(second.t, 500);
    }

    #[test]
    fn random_points_avoid_obstacles_and_players() {
        let map = WorldMap::from_rows(&["#.", ".."]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let taken = [Point::new(1.0, 0.0), Point::new(0.0, 1.0)];
        for _ in 0..10 {
            let p = random_unblocked_point(&map, &RULES, &taken, &mut rng).unwrap();
            assert!(points_equal(p, Point::new(1.0, 1.0)));
        }
    }

    #[test]
    fn wander_stays_within_range() {
        let map = WorldMap::new(30, 30).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let origin = Point::new(15.0, 15.0);
        for _ in 0..20 {
            let p = wander_destination(&map, origin, 4.0, &mut rng).unwrap();
            assert!(distance(p, origin) <= 4.0);
            assert!(!points_equal(p, origin));
        }
    }
}
