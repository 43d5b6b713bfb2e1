//! The engine step: a pure function from one world snapshot to the next.
//!
//! A step applies queued inputs in submission order, advances every
//! player, conversation and agent exactly once, checks for inactivity, and
//! bumps the generation. Each input is applied atomically: a failing input
//! leaves no trace besides its recorded error.
//!
//! The step never touches the repository, the scheduler or the wall
//! clock. It returns the new snapshot together with the effects to persist
//! and the tasks to schedule; the driver in [`crate::runner`] does the I/O
//! and picks how many queued inputs a step receives, so a step replays
//! exactly from its snapshot, inputs, `now` and generation.

use nexus_types::{InputId, WorldStatus};
use nexus_world::WorldMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::NexusConfig;
use crate::error::GameError;
use crate::game::{Game, StepEffects};
use crate::input::{self, Input, InputValue};
use crate::operation::ScheduledTask;
use crate::world::{Descriptions, World};
use crate::{agent, conversation, player};

/// Bookkeeping of the engine driving a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Incremented by every step; saves tagged with an older value are
    /// rejected.
    pub generation: u64,
    /// Last input applied.
    pub processed_input: Option<InputId>,
    /// Whether steps keep being scheduled.
    pub running: bool,
    /// Time of the latest step.
    pub current_time: Option<u64>,
    /// Time of the step before it.
    pub last_step: Option<u64>,
}

impl EngineState {
    /// A fresh running engine.
    pub const fn new() -> Self {
        Self {
            generation: 0,
            processed_input: None,
            running: true,
            current_time: None,
            last_step: None,
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a step reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The world.
    pub world: World,
    /// Player and agent descriptions.
    pub descriptions: Descriptions,
    /// Engine bookkeeping.
    pub engine: EngineState,
}

impl Snapshot {
    /// An empty running world at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            world: World::new(now),
            descriptions: Descriptions::default(),
            engine: EngineState::new(),
        }
    }
}

/// Read-only inputs of a step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The map.
    pub map: &'a WorldMap,
    /// Engine configuration.
    pub config: &'a NexusConfig,
}

impl<'a> StepContext<'a> {
    /// Context over a map and configuration.
    pub const fn new(map: &'a WorldMap, config: &'a NexusConfig) -> Self {
        Self { map, config }
    }
}

/// Result of one step.
#[derive(Debug)]
pub struct StepOutcome {
    /// The new snapshot, tagged with the next generation.
    pub snapshot: Snapshot,
    /// Effects to persist with it.
    pub effects: StepEffects,
    /// Outcome of every applied input, in order.
    pub results: Vec<(InputId, Result<InputValue, GameError>)>,
}

fn apply_atomically(
    game: &mut Game<'_>,
    now: u64,
    input: Input,
) -> Result<InputValue, GameError> {
    let world = game.world.clone();
    let descriptions = game.descriptions.clone();
    let effects = game.effects.clone();
    let result = input::apply(game, now, input);
    if result.is_err() {
        game.world = world;
        game.descriptions = descriptions;
        game.effects = effects;
    }
    result
}

/// Advance the world by one step.
///
/// Inputs must be ordered by id and newer than the last processed input.
/// Every given input is applied; the caller bounds the batch.
pub fn step(
    snapshot: Snapshot,
    inputs: Vec<(InputId, Input)>,
    ctx: StepContext<'_>,
    now: u64,
) -> StepOutcome {
    let Snapshot {
        world,
        descriptions,
        mut engine,
    } = snapshot;
    let mut game = Game::new(world, descriptions, ctx.map, ctx.config, engine.generation);
    let mut results = Vec::with_capacity(inputs.len());

    for (input_id, input) in inputs {
        let name = input.name();
        let result = apply_atomically(&mut game, now, input);
        match &result {
            Ok(value) => debug!(input_id = %input_id, name, ?value, "input applied"),
            Err(error) => debug!(input_id = %input_id, name, %error, "input failed"),
        }
        engine.processed_input = Some(input_id);
        results.push((input_id, result));
    }

    if game.world.status == WorldStatus::Running {
        player::tick(&mut game, now);
        conversation::tick(&mut game, now);
        agent::tick(&mut game, now);

        let idle_for = now.saturating_sub(game.world.last_viewed);
        if idle_for > ctx.config.engine.idle_world_timeout_ms {
            info!(idle_for, "nobody is watching, world going inactive");
            game.world.status = WorldStatus::Inactive;
        }
    }

    let (world, descriptions, mut effects) = game.into_parts();
    engine.generation = engine.generation.saturating_add(1);
    engine.last_step = engine.current_time;
    engine.current_time = Some(now);
    engine.running = world.status == WorldStatus::Running;
    if engine.running {
        effects.schedule(
            ctx.config.engine.step_interval_ms,
            ScheduledTask::RunStep {
                generation: engine.generation,
            },
        );
    } else {
        warn!(status = ?world.status, generation = engine.generation, "engine halting");
    }

    StepOutcome {
        snapshot: Snapshot {
            world,
            descriptions,
            engine,
        },
        effects,
        results,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use nexus_types::PlayerId;

    use super::*;
    use crate::player::NewPlayer;

    fn make_map() -> WorldMap {
        WorldMap::from_rows(&vec![".".repeat(12); 12]).unwrap()
    }

    fn make_human(token: &str) -> Input {
        Input::Join(NewPlayer {
            name: token.to_owned(),
            character: String::from("f1"),
            description: String::from("a visitor"),
            human: Some(token.to_owned()),
            voice: None,
            has_secret_code: false,
            reported_as_human: false,
        })
    }

    #[test]
    fn step_applies_inputs_and_bumps_generation() {
        let map = make_map();
        let config = NexusConfig::default();
        let outcome = step(
            Snapshot::new(0),
            vec![(InputId(0), make_human("h1"))],
            StepContext::new(&map, &config),
            1_000,
        );
        assert_eq!(outcome.snapshot.engine.generation, 1);
        assert_eq!(outcome.snapshot.engine.processed_input, Some(InputId(0)));
        assert_eq!(outcome.snapshot.engine.current_time, Some(1_000));
        assert!(matches!(
            outcome.results.first().unwrap().1,
            Ok(InputValue::Player { .. })
        ));
        assert_eq!(outcome.snapshot.world.players.len(), 1);
        assert!(outcome.effects.scheduled.iter().any(|s| s.task
            == ScheduledTask::RunStep { generation: 1 }));
    }

    #[test]
    fn failed_input_leaves_no_trace() {
        let map = make_map();
        let config = NexusConfig::default();
        let outcome = step(
            Snapshot::new(0),
            vec![
                (InputId(0), make_human("h1")),
                (InputId(1), make_human("h1")),
                (
                    InputId(2),
                    Input::Leave {
                        player_id: PlayerId(42),
                    },
                ),
            ],
            StepContext::new(&map, &config),
            1_000,
        );
        let [(_, first), (_, second), (_, third)] = outcome.results.as_slice() else {
            panic!("expected three results");
        };
        assert!(first.is_ok());
        assert_eq!(second, &Err(GameError::AlreadyJoined));
        assert_eq!(third, &Err(GameError::PlayerNotFound(PlayerId(42))));
        assert_eq!(outcome.snapshot.world.players.len(), 1);
        assert_eq!(outcome.snapshot.world.next_id, 1);
        assert_eq!(outcome.snapshot.engine.processed_input, Some(InputId(2)));
    }

    #[test]
    fn same_inputs_replay_to_the_same_world() {
        let map = make_map();
        let config = NexusConfig::default();
        let run = || {
            step(
                Snapshot::new(0),
                vec![(InputId(0), make_human("h1")), (InputId(1), make_human("h2"))],
                StepContext::new(&map, &config),
                500,
            )
            .snapshot
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn step_applies_every_input_whatever_the_budget() {
        let map = make_map();
        let mut config = NexusConfig::default();
        config.engine.step_budget_ms = 0;
        let inputs: Vec<_> = (0..64).map(|id| (InputId(id), Input::Heartbeat)).collect();
        let outcome = step(
            Snapshot::new(0),
            inputs,
            StepContext::new(&map, &config),
            1_000,
        );
        assert_eq!(outcome.results.len(), 64);
        assert_eq!(outcome.snapshot.engine.processed_input, Some(InputId(63)));
    }

    #[test]
    fn unwatched_world_goes_inactive_and_stops_scheduling() {
        let map = make_map();
        let config = NexusConfig::default();
        let now = config.engine.idle_world_timeout_ms + 1;
        let outcome = step(
            Snapshot::new(0),
            Vec::new(),
            StepContext::new(&map, &config),
            now,
        );
        assert_eq!(outcome.snapshot.world.status, WorldStatus::Inactive);
        assert!(!outcome.snapshot.engine.running);
        assert!(outcome.effects.scheduled.is_empty());
    }

    #[test]
    fn heartbeat_keeps_the_world_alive() {
        let map = make_map();
        let config = NexusConfig::default();
        let now = config.engine.idle_world_timeout_ms + 1;
        let outcome = step(
            Snapshot::new(0),
            vec![(InputId(0), Input::Heartbeat)],
            StepContext::new(&map, &config),
            now,
        );
        assert_eq!(outcome.snapshot.world.status, WorldStatus::Running);
        assert_eq!(outcome.snapshot.world.last_viewed, now);
    }
}
