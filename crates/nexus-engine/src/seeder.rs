//! Seed characters for a fresh world.
//!
//! Every configured character is queued as a `createAgent` input; the
//! first step joins them at random open tiles.

use nexus_core::agent::NewAgent;
use nexus_core::config::CharacterConfig;
use nexus_core::input::Input;
use nexus_core::runner::{Engine, now_ms};
use nexus_core::scheduler::Scheduler;
use tracing::{debug, warn};

use crate::error::EngineBinError;

/// `createAgent` inputs for the configured characters, in order.
pub fn character_inputs(characters: &[CharacterConfig]) -> Vec<Input> {
    characters
        .iter()
        .map(|c| {
            Input::CreateAgent(NewAgent {
                name: c.name.clone(),
                character: c.character.clone(),
                description: c.description.clone(),
                identity: c.identity.clone(),
                plan: c.plan.clone(),
                voice: c.voice.clone(),
                has_secret_code: c.has_secret_code,
            })
        })
        .collect()
}

/// Queue the seed characters and return how many were queued.
pub fn seed_characters(
    engine: &Engine,
    characters: &[CharacterConfig],
    scheduler: &dyn Scheduler,
) -> Result<usize, EngineBinError> {
    if characters.is_empty() {
        warn!("no seed characters configured, the world starts empty");
    } else if !characters.iter().any(|c| c.has_secret_code) {
        warn!("no seed character holds the secret code");
    }
    let now = now_ms();
    for input in character_inputs(characters) {
        let input_id = engine.submit(input, now, scheduler)?;
        debug!(%input_id, "seed character queued");
    }
    Ok(characters.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use nexus_core::config::NexusConfig;
    use nexus_core::engine::Snapshot;
    use nexus_core::input_log::InputLog;
    use nexus_core::scheduler::ManualScheduler;
    use nexus_core::store::WorldStore;
    use nexus_world::WorldMap;

    use super::*;

    fn make_engine(config: NexusConfig) -> Engine {
        let map = WorldMap::from_rows(&config.world.map).unwrap();
        Engine::new(
            Arc::new(WorldStore::new(Snapshot::new(now_ms()))),
            Arc::new(InputLog::new()),
            Arc::new(map),
            Arc::new(config),
        )
    }

    #[test]
    fn inputs_follow_the_configured_characters() {
        let config = NexusConfig::default();
        let inputs = character_inputs(&config.world.characters);
        assert_eq!(inputs.len(), config.world.characters.len());
        let Some(Input::CreateAgent(first)) = inputs.first() else {
            return;
        };
        let expected = config.world.characters.first().unwrap();
        assert_eq!(first.name, expected.name);
        assert_eq!(first.has_secret_code, expected.has_secret_code);
    }

    #[test]
    fn first_step_joins_every_seed_character() {
        let config = NexusConfig::default();
        let expected = config.world.characters.len();
        let engine = make_engine(config);
        let scheduler = ManualScheduler::new();

        let queued = seed_characters(&engine, &engine.config().world.characters, &scheduler).unwrap();
        assert_eq!(queued, expected);

        let generation = engine.store().generation().unwrap();
        let (summary, snapshot) = engine
            .run_step(generation, now_ms(), &scheduler)
            .unwrap()
            .unwrap();
        assert_eq!(summary.inputs_applied, expected);
        assert_eq!(snapshot.world.agents.len(), expected);
        assert_eq!(snapshot.descriptions.players.len(), expected);
    }
}
