//! Memory storage, relevance ranking, and reflection for Nexus agents.
//!
//! Agents remember conversations, events, reflections and plans as text
//! with an embedding. Recall ranks nearest neighbours by a blend of
//! similarity, importance, and recency; reflection condenses recent
//! memories into insights once their importance passes a budget.
//!
//! # Modules
//!
//! - [`config`] -- [`MemoryConfig`] tunables with serde defaults.
//! - [`error`] -- [`MemoryError`].
//! - [`importance`] -- Parsing model-rated importance.
//! - [`ranking`] -- Min-max normalized relevance ranking.
//! - [`reflection`] -- Reflection trigger and insight resolution.
//! - [`store`] -- The append-only [`MemoryStore`].
//! - [`vector`] -- The [`VectorIndex`] seam and a brute-force index.

pub mod config;
pub mod error;
pub mod importance;
pub mod ranking;
pub mod reflection;
pub mod store;
pub mod vector;

pub use config::MemoryConfig;
pub use error::MemoryError;
pub use importance::{EVENT_IMPORTANCE, parse_importance};
pub use reflection::{Insight, ResolvedInsight, resolve_insights};
pub use store::{MemoryStore, NewMemory};
pub use vector::{BruteForceIndex, SearchHit, VectorIndex};
