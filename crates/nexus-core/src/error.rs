//! Error types for the world engine.
//!
//! [`GameError`] is an invariant violation raised while applying one input;
//! it fails that input only and is recorded in the input's result.
//! [`StoreError`] and [`EngineError`] describe repository and driver
//! failures.

use nexus_types::{AgentId, ConversationId, InputId, PlayerId, WorldStatus};
use nexus_world::WorldError;

/// An input could not be applied to the world.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    /// The player does not exist.
    #[error("invalid player id {0}")]
    PlayerNotFound(PlayerId),

    /// The agent does not exist.
    #[error("invalid agent id {0}")]
    AgentNotFound(AgentId),

    /// The conversation does not exist.
    #[error("invalid conversation id {0}")]
    ConversationNotFound(ConversationId),

    /// A human with this token is already playing.
    #[error("human is already in this world")]
    AlreadyJoined,

    /// The human player cap was reached.
    #[error("only {max} human players allowed at once")]
    TooManyHumans {
        /// The configured cap.
        max: usize,
    },

    /// No free tile is left to spawn on.
    #[error("failed to find a free position")]
    NoFreePosition,

    /// The player already has an agent attached.
    #[error("player {player_id} is already controlled by {agent_id}")]
    AgentAlreadyAttached {
        /// The player.
        player_id: PlayerId,
        /// The existing agent.
        agent_id: AgentId,
    },

    /// A player tried to invite themselves.
    #[error("player {0} cannot invite themselves")]
    SelfInvite(PlayerId),

    /// The player is already a member of a conversation.
    #[error("player {player_id} is already in {conversation_id}")]
    AlreadyInConversation {
        /// The busy player.
        player_id: PlayerId,
        /// Their current conversation.
        conversation_id: ConversationId,
    },

    /// The player is not a member of the conversation.
    #[error("player {player_id} is not in {conversation_id}")]
    NotInConversation {
        /// The player.
        player_id: PlayerId,
        /// The conversation.
        conversation_id: ConversationId,
    },

    /// The membership status does not allow the requested transition.
    #[error("player {player_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The member.
        player_id: PlayerId,
        /// Current status name.
        from: &'static str,
        /// Requested status name.
        to: &'static str,
    },

    /// Someone else holds the typing lock.
    #[error("{holder} is already typing in {conversation_id}")]
    TypingLocked {
        /// The conversation.
        conversation_id: ConversationId,
        /// The current lock holder.
        holder: PlayerId,
    },

    /// Players in a conversation cannot walk away mid-talk.
    #[error("player {0} must leave the conversation before moving")]
    MovingInConversation(PlayerId),

    /// An operation slot is already occupied.
    #[error("agent {agent_id} already runs {slot} operation {name}")]
    OperationInProgress {
        /// The agent.
        agent_id: AgentId,
        /// `fast` or `slow`.
        slot: &'static str,
        /// Name of the running operation.
        name: String,
    },

    /// A destination or map problem.
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Repository failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A save was tagged with a generation other than the stored one.
    #[error("stale generation: expected {expected}, stored {actual}")]
    StaleGeneration {
        /// Generation the writer read.
        expected: u64,
        /// Generation currently stored.
        actual: u64,
    },

    /// An input id that was never submitted.
    #[error("unknown input {0}")]
    InputNotFound(InputId),

    /// A store lock was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot serialization failed: {source}")]
    Serialization {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Engine driver failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The repository failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The map in the configuration is invalid.
    #[error("map error: {source}")]
    Map {
        /// The underlying map error.
        #[from]
        source: WorldError,
    },

    /// The world is not running.
    #[error("world is not running: {status:?}")]
    NotRunning {
        /// Current status.
        status: WorldStatus,
    },

    /// The scheduler channel closed.
    #[error("scheduler channel closed")]
    SchedulerClosed,
}
