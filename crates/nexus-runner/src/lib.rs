//! Operation runner for the Nexus simulation.
//!
//! The engine schedules agent operations, message propagation and event
//! memories as tasks. This crate runs them out of band: it recalls
//! memories, renders prompts, calls the chat, embedding and speech
//! backends, writes memories, and reports every operation back to the
//! engine as a finish input carrying the operation's correlation id.
//!
//! # Architecture
//!
//! ```text
//! run_engine --> OperationDispatcher --> OperationRunner --> finish input
//!                                          |   |   |
//!                              PromptEngine  LlmBackend  MemoryStore
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Runner configuration from environment variables.
//! - [`dispatcher`] -- [`Dispatch`](nexus_core::runner::Dispatch)
//!   implementation spawning background tasks.
//! - [`embedding`] -- Text embeddings with a per-text cache.
//! - [`error`] -- Runner error type.
//! - [`llm`] -- Chat backends (OpenAI-compatible, Anthropic, scripted).
//! - [`operations`] -- The five agent operations, propagation and event
//!   memories.
//! - [`parse`] -- Model response cleanup and JSON recovery.
//! - [`prompt`] -- `minijinja` prompt templates.
//! - [`tts`] -- Speech synthesis and the audio store.

pub mod config;
pub mod dispatcher;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod operations;
pub mod parse;
pub mod prompt;
pub mod tts;
