//! Win and loss rules of the hidden-human game.
//!
//! Humans try to obtain the secret code without being reported; agents
//! try to spot them. Every rule runs inside the step, so outcomes are as
//! deterministic as the rest of the world.

use nexus_types::{ConversationId, GameEvent, PlayerId, WorldStatus};
use tracing::{info, warn};

use crate::error::GameError;
use crate::game::Game;
use crate::operation::{EventMemory, ScheduledTask};
use crate::player;

/// Mark a player as reported.
///
/// A reported human is removed. With two humans in the world the other
/// one is the last human standing: it wins and the world ends. The world
/// also ends once no humans are left. A reported agent that does not
/// hold the secret code is removed too.
pub fn report_player(
    game: &mut Game<'_>,
    now: u64,
    player_id: PlayerId,
) -> Result<(), GameError> {
    let player = game
        .world
        .players
        .get_mut(&player_id)
        .ok_or(GameError::PlayerNotFound(player_id))?;
    player.reported_as_human = true;
    let human = player.is_human();
    let has_code = player.has_secret_code;

    if human {
        let humans_before = game.world.human_count();
        info!(player_id = %player_id, humans = humans_before, "human reported, removing");
        player::leave(game, now, player_id)?;
        if humans_before == 2 {
            let winner = game
                .world
                .players
                .values()
                .find(|p| p.is_human())
                .map(|p| p.id);
            warn!(caught = %player_id, winner = ?winner, "last human standing, stopping world");
            game.world.winner = winner;
            game.world.status = WorldStatus::StoppedByHumanCaught;
        } else if game.world.human_count() == 0 {
            warn!("last human caught, stopping world");
            game.world.status = WorldStatus::StoppedByHumanCaught;
        }
    } else if !has_code {
        info!(player_id = %player_id, "agent without the code reported, removing");
        player::leave(game, now, player_id)?;
    }
    Ok(())
}

/// Hand the secret code from `sharer` to `receiver`.
///
/// Both sides remember the exchange when agents drive them. A human
/// receiving the code wins and stops the world.
pub fn share_secret_code(
    game: &mut Game<'_>,
    sharer: PlayerId,
    receiver: PlayerId,
    conversation_id: Option<ConversationId>,
) -> Result<(), GameError> {
    let player = game
        .world
        .players
        .get_mut(&receiver)
        .ok_or(GameError::PlayerNotFound(receiver))?;
    player.has_secret_code = true;
    let human = player.is_human();

    remember_event(game, sharer, receiver, GameEvent::AgentSharedSecretCode, conversation_id);
    if human {
        warn!(player_id = %receiver, "human obtained the secret code, stopping world");
        game.world.status = WorldStatus::StoppedByHumanVictory;
    } else {
        remember_event(
            game,
            receiver,
            sharer,
            GameEvent::AgentObtainedSecretCode,
            conversation_id,
        );
    }
    Ok(())
}

/// Schedule an event memory for an agent-driven player.
pub fn remember_event(
    game: &mut Game<'_>,
    player_id: PlayerId,
    other_player_id: PlayerId,
    event: GameEvent,
    conversation_id: Option<ConversationId>,
) {
    if game.world.agent_for_player(player_id).is_none() {
        return;
    }
    game.effects.schedule(
        0,
        ScheduledTask::RememberEvent(EventMemory {
            player_id,
            other_player_id,
            event,
            conversation_id,
        }),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use nexus_world::WorldMap;

    use super::*;
    use crate::agent::{self, NewAgent};
    use crate::config::NexusConfig;
    use crate::player::NewPlayer;
    use crate::world::{Descriptions, World};

    fn make_agent(game: &mut Game<'_>, name: &str, has_secret_code: bool) -> PlayerId {
        let (_, player_id) = agent::create(
            game,
            0,
            NewAgent {
                name: name.to_owned(),
                character: String::from("f1"),
                description: String::from("a resident"),
                identity: String::from("quiet"),
                plan: String::from("watch"),
                voice: None,
                has_secret_code,
            },
        )
        .unwrap();
        player_id
    }

    fn make_human(game: &mut Game<'_>, token: &str) -> PlayerId {
        player::join(
            game,
            0,
            NewPlayer {
                name: token.to_owned(),
                character: String::from("f5"),
                description: String::from("a visitor"),
                human: Some(token.to_owned()),
                voice: None,
                has_secret_code: false,
                reported_as_human: false,
            },
        )
        .unwrap()
    }

    fn remembered(game: &Game<'_>) -> Vec<(PlayerId, GameEvent)> {
        game.effects
            .scheduled
            .iter()
            .filter_map(|s| match &s.task {
                ScheduledTask::RememberEvent(e) => Some((e.player_id, e.event)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn catching_the_only_human_ends_the_world() {
        let map = WorldMap::from_rows(&vec![".".repeat(8); 8]).unwrap();
        let config = NexusConfig::default();
        let mut game = Game::new(World::new(0), Descriptions::default(), &map, &config, 1);
        let only = make_human(&mut game, "alice");

        report_player(&mut game, 10, only).unwrap();
        assert_eq!(game.world.human_count(), 0);
        assert_eq!(game.world.status, WorldStatus::StoppedByHumanCaught);
        assert_eq!(game.world.winner, None);
    }

    #[test]
    fn reporting_one_of_two_humans_crowns_the_other() {
        let map = WorldMap::from_rows(&vec![".".repeat(8); 8]).unwrap();
        let config = NexusConfig::default();
        let mut game = Game::new(World::new(0), Descriptions::default(), &map, &config, 1);
        let first = make_human(&mut game, "alice");
        let second = make_human(&mut game, "bob");

        report_player(&mut game, 10, first).unwrap();
        assert!(!game.world.players.contains_key(&first));
        assert_eq!(game.world.status, WorldStatus::StoppedByHumanCaught);
        assert_eq!(game.world.winner, Some(second));
    }

    #[test]
    fn reporting_one_of_three_humans_keeps_playing() {
        let map = WorldMap::from_rows(&vec![".".repeat(8); 8]).unwrap();
        let config = NexusConfig::default();
        let mut game = Game::new(World::new(0), Descriptions::default(), &map, &config, 1);
        let first = make_human(&mut game, "alice");
        make_human(&mut game, "bob");
        make_human(&mut game, "carol");

        report_player(&mut game, 10, first).unwrap();
        assert_eq!(game.world.human_count(), 2);
        assert_eq!(game.world.status, WorldStatus::Running);
        assert_eq!(game.world.winner, None);
    }

    #[test]
    fn reported_agents_stay_only_with_the_code() {
        let map = WorldMap::from_rows(&vec![".".repeat(8); 8]).unwrap();
        let config = NexusConfig::default();
        let mut game = Game::new(World::new(0), Descriptions::default(), &map, &config, 1);
        let keeper = make_agent(&mut game, "Vega", true);
        let other = make_agent(&mut game, "Orin", false);

        report_player(&mut game, 10, keeper).unwrap();
        report_player(&mut game, 10, other).unwrap();

        assert!(game.world.players.get(&keeper).unwrap().reported_as_human);
        assert!(!game.world.players.contains_key(&other));
        assert!(game.world.agent_for_player(other).is_none());
        assert_eq!(game.world.status, WorldStatus::Running);
    }

    #[test]
    fn sharing_with_an_agent_is_remembered_by_both() {
        let map = WorldMap::from_rows(&vec![".".repeat(8); 8]).unwrap();
        let config = NexusConfig::default();
        let mut game = Game::new(World::new(0), Descriptions::default(), &map, &config, 1);
        let sharer = make_agent(&mut game, "Vega", true);
        let receiver = make_agent(&mut game, "Orin", false);

        share_secret_code(&mut game, sharer, receiver, Some(ConversationId(4))).unwrap();

        assert!(game.world.players.get(&receiver).unwrap().has_secret_code);
        assert_eq!(
            remembered(&game),
            vec![
                (sharer, GameEvent::AgentSharedSecretCode),
                (receiver, GameEvent::AgentObtainedSecretCode),
            ]
        );
        assert_eq!(game.world.status, WorldStatus::Running);
    }

    #[test]
    fn sharing_with_a_human_is_a_human_victory() {
        let map = WorldMap::from_rows(&vec![".".repeat(8); 8]).unwrap();
        let config = NexusConfig::default();
        let mut game = Game::new(World::new(0), Descriptions::default(), &map, &config, 1);
        let sharer = make_agent(&mut game, "Vega", true);
        let human = make_human(&mut game, "alice");

        share_secret_code(&mut game, sharer, human, None).unwrap();

        assert_eq!(game.world.status, WorldStatus::StoppedByHumanVictory);
        assert_eq!(
            remembered(&game),
            vec![(sharer, GameEvent::AgentSharedSecretCode)]
        );
    }
}
