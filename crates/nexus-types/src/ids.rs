//! Type-safe identifier wrappers.
//!
//! Two families of identifiers exist:
//!
//! - **Game ids** ([`PlayerId`], [`ConversationId`], [`AgentId`],
//!   [`OperationId`], [`MessageId`]) are allocated by the world's `next_id`
//!   counter inside an engine step. They are plain integers so that a step
//!   replayed from the same world and inputs allocates the same ids.
//! - **Store ids** ([`WorldId`], [`EngineId`], [`MemoryId`],
//!   [`EmbeddingId`]) are UUID v7 values generated outside the
//!   deterministic core, by the stores that own those records.
//!
//! [`InputId`] is the engine-scoped sequence number of a submitted input.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

/// Generates a newtype wrapper around a `u64` counter value.
///
/// Displayed as `<prefix>:<n>` so log lines make the entity kind obvious.
macro_rules! define_game_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[serde(transparent)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub u64);

        impl $name {
            /// Return the raw counter value.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n)
            }
        }
    };
}

define_game_id! {
    /// Identifier of a character (human or agent-driven) in the world.
    PlayerId, "p"
}

define_game_id! {
    /// Identifier of a live or archived conversation.
    ConversationId, "c"
}

define_game_id! {
    /// Identifier of the decision-making agent attached to a player.
    AgentId, "a"
}

define_game_id! {
    /// Correlation id of an out-of-band operation.
    OperationId, "o"
}

define_game_id! {
    /// Correlation id of a message, shared between the typing lock and the
    /// posted message.
    MessageId, "m"
}

define_game_id! {
    /// Engine-scoped sequence number of a submitted input.
    InputId, "i"
}

define_id! {
    /// Identifier of a persisted world document.
    WorldId
}

define_id! {
    /// Identifier of an engine instance driving a world.
    EngineId
}

define_id! {
    /// Identifier of a stored memory.
    MemoryId
}

define_id! {
    /// Identifier of a stored embedding vector.
    EmbeddingId
}
