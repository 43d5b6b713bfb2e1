//! Memory records produced by the operation layer and ranked during recall.
//!
//! The `data` payload is a closed sum type so every consumer matches the
//! five memory kinds exhaustively.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ConversationId, EmbeddingId, MemoryId, PlayerId};

/// Kind-specific payload of a [`Memory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum MemoryData {
    /// Standing impression of another player.
    Relationship {
        /// The player the impression is about.
        player_id: PlayerId,
    },
    /// Summary of a finished conversation.
    Conversation {
        /// The archived conversation.
        conversation_id: ConversationId,
        /// Other authors who spoke in it.
        player_ids: Vec<PlayerId>,
    },
    /// Higher-level insight synthesized from other memories.
    Reflection {
        /// Memories the insight was derived from.
        related_memory_ids: Vec<MemoryId>,
    },
    /// A rewritten plan and the reflections behind it.
    Plan {
        /// Reflections the plan was derived from.
        related_memory_ids: Vec<MemoryId>,
    },
    /// Something that happened to the owner.
    Event {
        /// Conversation the event happened in, if any.
        conversation_id: Option<ConversationId>,
        /// Other players involved.
        player_ids: Vec<PlayerId>,
    },
}

/// Discriminant of [`MemoryData`], used for indexed lookups by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum MemoryKind {
    /// See [`MemoryData::Relationship`].
    Relationship,
    /// See [`MemoryData::Conversation`].
    Conversation,
    /// See [`MemoryData::Reflection`].
    Reflection,
    /// See [`MemoryData::Plan`].
    Plan,
    /// See [`MemoryData::Event`].
    Event,
}

impl MemoryData {
    /// The kind of this payload.
    pub const fn kind(&self) -> MemoryKind {
        match self {
            Self::Relationship { .. } => MemoryKind::Relationship,
            Self::Conversation { .. } => MemoryKind::Conversation,
            Self::Reflection { .. } => MemoryKind::Reflection,
            Self::Plan { .. } => MemoryKind::Plan,
            Self::Event { .. } => MemoryKind::Event,
        }
    }

    /// Conversation this memory belongs to, if any.
    pub const fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::Conversation {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Event {
                conversation_id, ..
            } => *conversation_id,
            Self::Relationship { .. } | Self::Reflection { .. } | Self::Plan { .. } => None,
        }
    }
}

/// A stored memory. Immutable once inserted except for `last_access`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Memory {
    /// Store-assigned identifier.
    pub id: MemoryId,
    /// Player who holds the memory.
    pub player_id: PlayerId,
    /// Free-text description, also the text that was embedded.
    pub description: String,
    /// Embedding row for similarity search.
    pub embedding_id: EmbeddingId,
    /// Poignancy on a 0 to 9 scale.
    pub importance: f64,
    /// Last time the memory was recalled, in milliseconds.
    pub last_access: u64,
    /// Creation time in milliseconds.
    pub created: u64,
    /// Kind-specific payload.
    pub data: MemoryData,
}
