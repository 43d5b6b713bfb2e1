//! World engine for the Nexus simulation.
//!
//! This crate owns the deterministic step that advances the world: inputs
//! are applied in order, then players, conversations and agents tick once.
//! Long-running agent work (LLM calls, embeddings, speech) never runs
//! inside a step; it is handed out as correlated operations whose results
//! come back as inputs.
//!
//! # Modules
//!
//! - [`agent`] -- Agent decision state machine and operation slots.
//! - [`config`] -- Configuration loading from `nexus-config.yaml`.
//! - [`conversation`] -- Conversation lifecycle and typing lock.
//! - [`engine`] -- The pure step function and engine bookkeeping.
//! - [`error`] -- Game, store and engine errors.
//! - [`game`] -- Per-step mutable view of the world.
//! - [`input`] -- Input commands and their application.
//! - [`input_log`] -- Ordered input queue with settle-once results.
//! - [`operation`] -- Operation arguments, scheduled tasks and the
//!   `doSomething` decision.
//! - [`operator`] -- Pause and stop control for the driver.
//! - [`player`] -- Players, movement and pathfinding ticks.
//! - [`rules`] -- Secret code and reporting rules.
//! - [`runner`] -- The driver loop around the step.
//! - [`scheduler`] -- Deferred task delivery.
//! - [`store`] -- World repository with generation checks.
//! - [`world`] -- World state and descriptions.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod game;
pub mod input;
pub mod input_log;
pub mod operation;
pub mod operator;
pub mod player;
pub mod rules;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod world;
