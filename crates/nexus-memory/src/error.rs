//! Error types for the memory subsystem.

use nexus_types::{EmbeddingId, MemoryId};

/// Errors raised by the memory store and vector index.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// An embedding did not match the index dimension.
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch {
        /// Dimension fixed by the first insert.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },

    /// An embedding was inserted twice.
    #[error("duplicate embedding id: {0}")]
    DuplicateEmbedding(EmbeddingId),

    /// A referenced memory does not exist.
    #[error("memory not found: {0}")]
    MemoryNotFound(MemoryId),

    /// The store lock was poisoned by a panicking holder.
    #[error("memory store lock poisoned")]
    LockPoisoned,

    /// Model output for a reflection could not be interpreted.
    #[error("malformed reflection output: {0}")]
    MalformedReflection(String),
}
