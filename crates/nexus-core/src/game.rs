//! Mutable context of one engine step.
//!
//! A [`Game`] owns the world and descriptions for the duration of a step,
//! borrows the map and configuration, and collects every side effect the
//! step produces in [`StepEffects`]. Effects are persisted together with
//! the new world in one save.

use nexus_types::{ArchivedConversation, Message, ParticipatedTogether};
use nexus_world::WorldMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::NexusConfig;
use crate::operation::ScheduledTask;
use crate::world::{Descriptions, World};

/// A task with the delay it should run after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheduled {
    /// Delay in milliseconds, measured from the save.
    pub delay_ms: u64,
    /// The task.
    pub task: ScheduledTask,
}

/// Side effects produced during a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepEffects {
    /// Conversations that ended.
    pub archived: Vec<ArchivedConversation>,
    /// Directed participation edges, two per ended conversation.
    pub participated: Vec<ParticipatedTogether>,
    /// Messages posted.
    pub messages: Vec<Message>,
    /// Whether player or agent descriptions changed.
    pub descriptions_changed: bool,
    /// Work to hand to the scheduler after the save.
    pub scheduled: Vec<Scheduled>,
}

impl StepEffects {
    /// Queue a task.
    pub fn schedule(&mut self, delay_ms: u64, task: ScheduledTask) {
        self.scheduled.push(Scheduled { delay_ms, task });
    }

    /// Whether nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.archived.is_empty()
            && self.participated.is_empty()
            && self.messages.is_empty()
            && !self.descriptions_changed
            && self.scheduled.is_empty()
    }
}

/// Step context handed to every input handler and tick function.
pub struct Game<'a> {
    /// The live world.
    pub world: World,
    /// Player and agent descriptions.
    pub descriptions: Descriptions,
    /// The immutable map.
    pub map: &'a WorldMap,
    /// Engine configuration.
    pub config: &'a NexusConfig,
    /// Effects collected so far.
    pub effects: StepEffects,
    /// Random source for this step.
    pub rng: StdRng,
}

impl<'a> Game<'a> {
    /// Open a step over `world`.
    ///
    /// The random source is seeded from the configured seed and the step's
    /// generation, so replaying a generation with the same inputs yields the
    /// same world.
    pub fn new(
        world: World,
        descriptions: Descriptions,
        map: &'a WorldMap,
        config: &'a NexusConfig,
        generation: u64,
    ) -> Self {
        Self {
            world,
            descriptions,
            map,
            config,
            effects: StepEffects::default(),
            rng: StdRng::seed_from_u64(config.engine.seed ^ generation),
        }
    }

    /// Close the step, returning the world, descriptions and effects.
    pub fn into_parts(self) -> (World, Descriptions, StepEffects) {
        (self.world, self.descriptions, self.effects)
    }
}
