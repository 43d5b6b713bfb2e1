//! Records shared between the engine, the operation layer and the
//! presentation layer.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{AgentId, ConversationId, MessageId, PlayerId};

/// Something a player is busy doing, shown as an emoji above them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Activity {
    /// Human-readable description ("reading a book").
    pub description: String,
    /// Emoji shown to viewers.
    pub emoji: Option<String>,
    /// Time the activity ends, in milliseconds.
    pub until: u64,
}

/// Static description of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlayerDescription {
    /// The described player.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Short public description.
    pub description: String,
    /// Sprite key used by the renderer.
    pub character: String,
    /// Voice used for speech synthesis, if any.
    pub voice: Option<String>,
}

/// Static identity and evolving plan of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AgentDescription {
    /// The described agent.
    pub agent_id: AgentId,
    /// Background story written in the second person.
    pub identity: String,
    /// Current plan; rewritten after reflection.
    pub plan: String,
}

/// A message posted in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Message {
    /// Correlation id; matches the typing lock it released.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub author: PlayerId,
    /// Message body.
    pub text: String,
    /// Time the message was accepted by the engine, in milliseconds.
    pub timestamp: u64,
    /// Players overhearing the conversation when the message was posted.
    pub eavesdroppers: Vec<PlayerId>,
    /// Reference to synthesized audio, attached after posting.
    pub audio: Option<String>,
}

/// Read-only record of an ended conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ArchivedConversation {
    /// Identifier the conversation had while live.
    pub id: ConversationId,
    /// Player who sent the invite.
    pub creator: PlayerId,
    /// Creation time in milliseconds.
    pub created: u64,
    /// End time in milliseconds.
    pub ended: u64,
    /// The two participants.
    pub participants: Vec<PlayerId>,
    /// Messages posted before it ended.
    pub num_messages: u32,
}

/// Directed edge recording that two players shared a conversation.
///
/// Written once per direction when a conversation ends; used for the
/// per-pair re-invite cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipatedTogether {
    /// The conversation both took part in.
    pub conversation_id: ConversationId,
    /// The player owning the edge.
    pub player1: PlayerId,
    /// The other participant.
    pub player2: PlayerId,
    /// End time in milliseconds.
    pub ended: u64,
}

/// Audio overheard by a human eavesdropper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EavesdropFeedEntry {
    /// Session token of the listening human.
    pub human: String,
    /// Player whose message was overheard.
    pub author: PlayerId,
    /// Reference to the synthesized audio.
    pub audio: String,
    /// Time the entry was pushed, in milliseconds.
    pub timestamp: u64,
    /// Time after which the entry is dropped, in milliseconds.
    pub expires: u64,
}
