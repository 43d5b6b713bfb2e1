//! The world aggregate: every live player, conversation and agent.
//!
//! A [`World`] is a plain value. The engine step takes it by value, mutates
//! it through a [`Game`](crate::game::Game) and hands it back, so nothing
//! outside a step ever holds a mutable reference to it.

use std::collections::BTreeMap;

use nexus_types::{
    AgentDescription, AgentId, ConversationId, MessageId, OperationId, PlayerDescription, PlayerId,
    Point, WorldStatus,
};
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::conversation::Conversation;
use crate::player::Player;

/// The live simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// Whether steps still run.
    pub status: WorldStatus,
    /// Last time a viewer sent a heartbeat.
    pub last_viewed: u64,
    /// Counter for every game id allocated in this world.
    pub next_id: u64,
    /// Live players.
    pub players: BTreeMap<PlayerId, Player>,
    /// Live conversations.
    pub conversations: BTreeMap<ConversationId, Conversation>,
    /// Agents driving non-human players.
    pub agents: BTreeMap<AgentId, Agent>,
    /// Last human standing when a two-human game ends with a report.
    #[serde(default)]
    pub winner: Option<PlayerId>,
}

impl World {
    /// An empty running world.
    pub const fn new(now: u64) -> Self {
        Self {
            status: WorldStatus::Running,
            last_viewed: now,
            next_id: 0,
            players: BTreeMap::new(),
            conversations: BTreeMap::new(),
            agents: BTreeMap::new(),
            winner: None,
        }
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Allocate a player id.
    pub fn allocate_player_id(&mut self) -> PlayerId {
        PlayerId(self.allocate())
    }

    /// Allocate a conversation id.
    pub fn allocate_conversation_id(&mut self) -> ConversationId {
        ConversationId(self.allocate())
    }

    /// Allocate an agent id.
    pub fn allocate_agent_id(&mut self) -> AgentId {
        AgentId(self.allocate())
    }

    /// Allocate an operation correlation id.
    pub fn allocate_operation_id(&mut self) -> OperationId {
        OperationId(self.allocate())
    }

    /// Allocate a message correlation id.
    pub fn allocate_message_id(&mut self) -> MessageId {
        MessageId(self.allocate())
    }

    /// The conversation a player is a member of, if any.
    pub fn player_conversation(&self, player_id: PlayerId) -> Option<&Conversation> {
        self.conversations
            .values()
            .find(|c| c.participants.contains_key(&player_id))
    }

    /// Id of the conversation a player is a member of, if any.
    pub fn player_conversation_id(&self, player_id: PlayerId) -> Option<ConversationId> {
        self.player_conversation(player_id).map(|c| c.id)
    }

    /// The agent driving a player, if any.
    pub fn agent_for_player(&self, player_id: PlayerId) -> Option<&Agent> {
        self.agents.values().find(|a| a.player_id == player_id)
    }

    /// Positions of every player other than `player_id`.
    pub fn positions_except(&self, player_id: PlayerId) -> Vec<Point> {
        self.players
            .values()
            .filter(|p| p.id != player_id)
            .map(|p| p.position)
            .collect()
    }

    /// Number of human-controlled players.
    pub fn human_count(&self) -> usize {
        self.players.values().filter(|p| p.is_human()).count()
    }

    /// Players that are not in any conversation, other than `player_id`.
    pub fn free_players_except(&self, player_id: PlayerId) -> Vec<Player> {
        self.players
            .values()
            .filter(|p| p.id != player_id && self.player_conversation(p.id).is_none())
            .cloned()
            .collect()
    }
}

/// Descriptive records kept beside the world: names, identities, plans.
///
/// Descriptions outlive their player so archived transcripts keep their
/// author names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptions {
    /// Per-player names and descriptions.
    pub players: BTreeMap<PlayerId, PlayerDescription>,
    /// Per-agent identity and plan.
    pub agents: BTreeMap<AgentId, AgentDescription>,
}

impl Descriptions {
    /// Display name of a player, falling back to its id.
    pub fn name(&self, player_id: PlayerId) -> String {
        self.players
            .get(&player_id)
            .map_or_else(|| player_id.to_string(), |d| d.name.clone())
    }
}
