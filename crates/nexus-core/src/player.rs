//! Players: position, movement along timed paths, joining and leaving.

use nexus_types::{Activity, Path, PlayerDescription, PlayerId, Point, Vector};
use nexus_world::movement::{random_facing, random_unblocked_point};
use nexus_world::{WorldMap, blocked, find_route, path_position, points_equal};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MovementConfig;
use crate::conversation::{self, MemberStatus};
use crate::error::GameError;
use crate::game::Game;

/// Where a moving player is in its route-finding cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PathfindingState {
    /// A route must be computed on the next tick.
    NeedsPath,
    /// Blocked by a collision; reroute after `until`.
    Waiting {
        /// Backoff deadline.
        until: u64,
    },
    /// Following a timed path.
    Moving {
        /// The route being followed.
        path: Path,
    },
}

/// An active movement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pathfinding {
    /// Target tile.
    pub destination: Point,
    /// When the request was made.
    pub started: u64,
    /// Current sub-state.
    pub state: PathfindingState,
}

/// A character in the world, human or agent-driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Game id.
    pub id: PlayerId,
    /// Session token of the controlling human, if any.
    pub human: Option<String>,
    /// Active movement request.
    pub pathfinding: Option<Pathfinding>,
    /// What the player is busy with.
    pub activity: Option<Activity>,
    /// Last time the player sent an input.
    pub last_input: u64,
    /// Continuous tile position.
    pub position: Point,
    /// Facing direction.
    pub facing: Vector,
    /// Current speed in tiles per second.
    pub speed: f64,
    /// Whether the player holds the secret code.
    pub has_secret_code: bool,
    /// Whether someone reported this player as human.
    pub reported_as_human: bool,
}

impl Player {
    /// Whether a human controls this player.
    pub const fn is_human(&self) -> bool {
        self.human.is_some()
    }

    /// Whether an activity is still running at `now`.
    pub fn is_doing_activity(&self, now: u64) -> bool {
        self.activity.as_ref().is_some_and(|a| a.until > now)
    }

    /// Drop any movement request.
    pub fn stop(&mut self) {
        self.pathfinding = None;
        self.speed = 0.0;
    }

    /// Advance the route-finding state machine.
    ///
    /// Stops on arrival or after the pathfinding timeout, turns an expired
    /// wait back into a route request, and computes routes when needed.
    pub fn tick_pathfinding(
        &mut self,
        now: u64,
        map: &WorldMap,
        movement: &MovementConfig,
        others: &[Point],
    ) {
        let Some(pathfinding) = self.pathfinding.as_mut() else {
            return;
        };
        if matches!(pathfinding.state, PathfindingState::Moving { .. })
            && points_equal(pathfinding.destination, self.position)
        {
            self.stop();
            return;
        }
        if pathfinding
            .started
            .saturating_add(movement.pathfinding_timeout_ms)
            < now
        {
            warn!(player_id = %self.id, "timing out pathfinding");
            self.stop();
            return;
        }
        if let PathfindingState::Waiting { until } = pathfinding.state
            && until < now
        {
            pathfinding.state = PathfindingState::NeedsPath;
        }
        if pathfinding.state != PathfindingState::NeedsPath {
            return;
        }
        let rules = movement.rules();
        match find_route(
            map,
            &rules,
            self.position,
            self.facing,
            pathfinding.destination,
            now,
            others,
        ) {
            None => {
                debug!(
                    player_id = %self.id,
                    x = pathfinding.destination.x,
                    y = pathfinding.destination.y,
                    "failed to route"
                );
                self.stop();
            }
            Some(route) => {
                if let Some(new_destination) = route.new_destination {
                    debug!(
                        player_id = %self.id,
                        x = new_destination.x,
                        y = new_destination.y,
                        "destination unreachable, rerouting to closest point"
                    );
                    pathfinding.destination = new_destination;
                }
                pathfinding.state = PathfindingState::Moving { path: route.path };
            }
        }
    }

    /// Move along the current path, backing off on collision.
    pub fn tick_position<R: Rng>(
        &mut self,
        now: u64,
        map: &WorldMap,
        movement: &MovementConfig,
        others: &[Point],
        rng: &mut R,
    ) {
        let Some(pathfinding) = self.pathfinding.as_mut() else {
            self.speed = 0.0;
            return;
        };
        let PathfindingState::Moving { path } = &pathfinding.state else {
            self.speed = 0.0;
            return;
        };
        let Some(sample) = path_position(path, now) else {
            warn!(player_id = %self.id, "path out of range");
            return;
        };
        if let Some(reason) = blocked(map, &movement.rules(), sample.position, others) {
            let backoff = rng.random_range(0..movement.pathfinding_backoff_ms.max(1));
            debug!(player_id = %self.id, %reason, backoff, "path blocked, waiting");
            pathfinding.state = PathfindingState::Waiting {
                until: now.saturating_add(backoff),
            };
            self.speed = 0.0;
            return;
        }
        self.position = sample.position;
        self.facing = sample.facing;
        self.speed = sample.velocity;
    }
}

/// Arguments of a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlayer {
    /// Display name.
    pub name: String,
    /// Sprite key.
    pub character: String,
    /// Public description.
    pub description: String,
    /// Session token when a human joins.
    #[serde(default)]
    pub human: Option<String>,
    /// Voice id for text-to-speech.
    #[serde(default)]
    pub voice: Option<String>,
    /// Whether the player starts with the secret code.
    #[serde(default)]
    pub has_secret_code: bool,
    /// Whether the player starts reported.
    #[serde(default)]
    pub reported_as_human: bool,
}

/// Place a new player on a random free tile.
pub fn join(game: &mut Game<'_>, now: u64, new: NewPlayer) -> Result<PlayerId, GameError> {
    if let Some(token) = &new.human {
        if game
            .world
            .players
            .values()
            .any(|p| p.human.as_ref() == Some(token))
        {
            return Err(GameError::AlreadyJoined);
        }
        let max = game.config.agent.max_human_players;
        if game.world.human_count() >= max {
            return Err(GameError::TooManyHumans { max });
        }
    }
    let others: Vec<Point> = game.world.players.values().map(|p| p.position).collect();
    let rules = game.config.movement.rules();
    let position = random_unblocked_point(game.map, &rules, &others, &mut game.rng)
        .ok_or(GameError::NoFreePosition)?;
    let facing = random_facing(&mut game.rng);
    let player_id = game.world.allocate_player_id();
    game.world.players.insert(
        player_id,
        Player {
            id: player_id,
            human: new.human,
            pathfinding: None,
            activity: None,
            last_input: now,
            position,
            facing,
            speed: 0.0,
            has_secret_code: new.has_secret_code,
            reported_as_human: new.reported_as_human,
        },
    );
    game.descriptions.players.insert(
        player_id,
        PlayerDescription {
            player_id,
            name: new.name,
            description: new.description,
            character: new.character,
            voice: new.voice,
        },
    );
    game.effects.descriptions_changed = true;
    info!(player_id = %player_id, x = position.x, y = position.y, "player joined");
    Ok(player_id)
}

/// Remove a player, ending its conversation and deleting its agent.
pub fn leave(game: &mut Game<'_>, now: u64, player_id: PlayerId) -> Result<(), GameError> {
    if !game.world.players.contains_key(&player_id) {
        return Err(GameError::PlayerNotFound(player_id));
    }
    if let Some(conversation_id) = game.world.player_conversation_id(player_id) {
        conversation::stop(game, now, conversation_id);
    }
    game.world.agents.retain(|_, a| a.player_id != player_id);
    game.world.players.remove(&player_id);
    info!(player_id = %player_id, "player left");
    Ok(())
}

/// Request movement to an open, integral tile.
///
/// Participants of a running conversation must leave it first.
pub fn move_player(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
    destination: Point,
) -> Result<(), GameError> {
    game.map.validate_destination(destination)?;
    if let Some(conversation) = game.world.player_conversation(player_id)
        && conversation
            .participants
            .get(&player_id)
            .is_some_and(|m| matches!(m.status, MemberStatus::Participating { .. }))
    {
        return Err(GameError::MovingInConversation(player_id));
    }
    let player = game
        .world
        .players
        .get_mut(&player_id)
        .ok_or(GameError::PlayerNotFound(player_id))?;
    player.pathfinding = Some(Pathfinding {
        destination,
        started: now,
        state: PathfindingState::NeedsPath,
    });
    Ok(())
}

/// Per-tick player update: idle humans leave, then every player advances
/// its route and its position.
pub fn tick(game: &mut Game<'_>, now: u64) {
    let idle_cutoff = now.saturating_sub(game.config.agent.human_idle_too_long_ms);
    let idle: Vec<PlayerId> = game
        .world
        .players
        .values()
        .filter(|p| p.is_human() && p.last_input < idle_cutoff)
        .map(|p| p.id)
        .collect();
    for player_id in idle {
        info!(player_id = %player_id, "human idle too long, leaving");
        if let Err(error) = leave(game, now, player_id) {
            debug!(player_id = %player_id, %error, "idle leave failed");
        }
    }

    let ids: Vec<PlayerId> = game.world.players.keys().copied().collect();
    for player_id in &ids {
        let others = game.world.positions_except(*player_id);
        if let Some(player) = game.world.players.get_mut(player_id) {
            player.tick_pathfinding(now, game.map, &game.config.movement, &others);
        }
    }
    for player_id in &ids {
        let others = game.world.positions_except(*player_id);
        if let Some(player) = game.world.players.get_mut(player_id) {
            player.tick_position(now, game.map, &game.config.movement, &others, &mut game.rng);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn make_player(x: f64, y: f64) -> Player {
        Player {
            id: PlayerId(1),
            human: None,
            pathfinding: None,
            activity: None,
            last_input: 0,
            position: Point::new(x, y),
            facing: Vector::default(),
            speed: 0.0,
            has_secret_code: false,
            reported_as_human: false,
        }
    }

    fn make_map() -> WorldMap {
        WorldMap::from_rows(&["......", "......", "......"]).unwrap()
    }

    #[test]
    fn route_then_walk_to_destination() {
        let map = make_map();
        let movement = MovementConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut player = make_player(0.0, 0.0);
        player.pathfinding = Some(Pathfinding {
            destination: Point::new(2.0, 0.0),
            started: 0,
            state: PathfindingState::NeedsPath,
        });

        player.tick_pathfinding(0, &map, &movement, &[]);
        assert!(matches!(
            player.pathfinding.as_ref().unwrap().state,
            PathfindingState::Moving { .. }
        ));

        player.tick_position(10_000, &map, &movement, &[], &mut rng);
        assert!(points_equal(player.position, Point::new(2.0, 0.0)));

        player.tick_pathfinding(10_100, &map, &movement, &[]);
        assert!(player.pathfinding.is_none());
    }

    #[test]
    fn collision_enters_waiting_with_bounded_backoff() {
        let map = make_map();
        let movement = MovementConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut player = make_player(0.0, 0.0);
        player.pathfinding = Some(Pathfinding {
            destination: Point::new(3.0, 0.0),
            started: 0,
            state: PathfindingState::NeedsPath,
        });
        player.tick_pathfinding(0, &map, &movement, &[]);

        let blocker = [Point::new(1.0, 0.0)];
        player.tick_position(1_400, &map, &movement, &blocker, &mut rng);

        let PathfindingState::Waiting { until } = player.pathfinding.as_ref().unwrap().state else {
            panic!("expected waiting");
        };
        assert!(until >= 1_400 && until < 1_400 + movement.pathfinding_backoff_ms);
        assert!(points_equal(player.position, Point::new(0.0, 0.0)));

        player.tick_pathfinding(until + 1, &map, &movement, &[]);
        assert!(matches!(
            player.pathfinding.as_ref().unwrap().state,
            PathfindingState::Moving { .. }
        ));
    }

    #[test]
    fn pathfinding_times_out() {
        let map = make_map();
        let movement = MovementConfig::default();
        let mut player = make_player(0.0, 0.0);
        player.pathfinding = Some(Pathfinding {
            destination: Point::new(5.0, 2.0),
            started: 0,
            state: PathfindingState::Waiting { until: 0 },
        });
        player.tick_pathfinding(movement.pathfinding_timeout_ms + 1, &map, &movement, &[]);
        assert!(player.pathfinding.is_none());
    }

    #[test]
    fn unreachable_destination_stops_player() {
        let map = WorldMap::from_rows(&["..#.", "..#.", "..#."]).unwrap();
        let movement = MovementConfig::default();
        let mut player = make_player(0.0, 0.0);
        let walls = [Point::new(1.0, 0.0), Point::new(0.0, 1.0)];
        player.pathfinding = Some(Pathfinding {
            destination: Point::new(3.0, 0.0),
            started: 0,
            state: PathfindingState::NeedsPath,
        });
        player.tick_pathfinding(0, &map, &movement, &walls);
        assert!(player.pathfinding.is_none());
    }
}
