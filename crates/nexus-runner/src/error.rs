//! Error types for the operation runner.
//!
//! Uses `thiserror` for typed errors that surface through the operation
//! pipeline: model calls, prompt rendering, response parsing, memory writes
//! and input submission.

use nexus_core::error::{EngineError, StoreError};
use nexus_memory::MemoryError;

/// Errors that can occur while running an agent operation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Failed to render a prompt template.
    #[error("template render error: {0}")]
    Template(String),

    /// An LLM backend returned an error or was unreachable.
    #[error("LLM backend error: {0}")]
    LlmBackend(String),

    /// The embedding endpoint failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The speech endpoint failed.
    #[error("speech error: {0}")]
    Speech(String),

    /// A model response could not be parsed.
    #[error("response parse error: {0}")]
    Parse(String),

    /// The operation exceeded its deadline.
    #[error("operation exceeded {timeout_ms} ms")]
    Timeout {
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// Something the operation needs is no longer in the world.
    #[error("missing from world: {0}")]
    Missing(String),

    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// The memory store failed.
    #[error("memory error: {source}")]
    Memory {
        /// The underlying memory error.
        #[from]
        source: MemoryError,
    },

    /// The world repository failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A finish input could not be submitted.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: EngineError,
    },

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
