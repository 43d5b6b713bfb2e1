//! Shared type definitions for the Nexus simulation.
//!
//! Types defined here are used by every other crate in the workspace and
//! flow downstream to `TypeScript` via `ts-rs` for the presentation layer.
//!
//! # Modules
//!
//! - [`ids`] -- Game ids (counter-allocated) and store ids (UUID v7)
//! - [`geometry`] -- Points, vectors and timed paths
//! - [`enums`] -- World status, message kinds, game actions and events
//! - [`memory`] -- Memory records and their closed `data` payload
//! - [`structs`] -- Descriptions, messages, archives and feed entries

pub mod enums;
pub mod geometry;
pub mod ids;
pub mod memory;
pub mod structs;

pub use enums::{AgentAction, GameEvent, MessageKind, WorldStatus};
pub use geometry::{Path, PathComponent, Point, Vector};
pub use ids::{
    AgentId, ConversationId, EmbeddingId, EngineId, InputId, MemoryId, MessageId, OperationId,
    PlayerId, WorldId,
};
pub use memory::{Memory, MemoryData, MemoryKind};
pub use structs::{
    Activity, AgentDescription, ArchivedConversation, EavesdropFeedEntry, Message,
    ParticipatedTogether, PlayerDescription,
};
